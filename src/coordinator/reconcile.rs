//! Authoritative state reconciliation
//!
//! Turns the per-replica reports gathered during invalidation into one canonical
//! per-object version map.

use crate::common::{Error, Result};
use crate::coordinator::transport::{
    AuthoritativeState, ObjectVersionMapping, ReplicaStatus, TruncateRecord,
};
use std::collections::{BTreeMap, BTreeSet};

pub trait Reconciler: Send + Sync {
    /// `replicas[i]` is the head OSD that produced `statuses[i]`; `None` marks a
    /// replica that did not respond.
    fn reconcile(
        &self,
        file_id: &str,
        replicas: &[String],
        statuses: &[Option<ReplicaStatus>],
    ) -> Result<AuthoritativeState>;
}

/// Highest version of each object wins; its holders are the replicas reporting it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LatestVersionReconciler;

impl Reconciler for LatestVersionReconciler {
    fn reconcile(
        &self,
        file_id: &str,
        replicas: &[String],
        statuses: &[Option<ReplicaStatus>],
    ) -> Result<AuthoritativeState> {
        if replicas.len() != statuses.len() {
            return Err(Error::Reconcile(format!(
                "{} replicas but {} status slots for {}",
                replicas.len(),
                statuses.len(),
                file_id
            )));
        }

        let mut truncate_epoch = 0;
        let mut max_object_version = 0;
        let mut truncate_log: BTreeMap<u64, TruncateRecord> = BTreeMap::new();
        let mut objects: BTreeMap<u64, ObjectVersionMapping> = BTreeMap::new();
        let mut responders = Vec::new();

        for (uuid, status) in replicas.iter().zip(statuses) {
            let Some(status) = status else { continue };
            responders.push(uuid);

            truncate_epoch = truncate_epoch.max(status.truncate_epoch);
            max_object_version = max_object_version.max(status.max_object_version);
            for record in &status.truncate_log {
                truncate_log.insert(record.version, *record);
            }

            for reported in &status.object_versions {
                max_object_version = max_object_version.max(reported.version);
                let mapping = objects
                    .entry(reported.object_number)
                    .or_insert_with(|| ObjectVersionMapping {
                        object_number: reported.object_number,
                        version: reported.version,
                        osd_uuids: Vec::new(),
                    });
                if mapping.version < reported.version {
                    mapping.version = reported.version;
                    mapping.osd_uuids.clear();
                }
                if mapping.version == reported.version {
                    mapping.osd_uuids.push(uuid.clone());
                }
            }
        }

        if responders.is_empty() {
            return Err(Error::Reconcile(format!(
                "no replica of {} reported its status",
                file_id
            )));
        }

        // Objects cut off by a later truncate no longer exist
        for record in truncate_log.values() {
            objects.retain(|&number, mapping| {
                number <= record.last_object_number || mapping.version >= record.version
            });
        }

        let replicas_holding_all: BTreeSet<String> = responders
            .into_iter()
            .filter(|uuid| objects.values().all(|m| m.osd_uuids.contains(uuid)))
            .cloned()
            .collect();

        tracing::debug!(
            "Authoritative state for {}: {} objects, max version {}, truncate epoch {}, held fully by {:?}",
            file_id,
            objects.len(),
            max_object_version,
            truncate_epoch,
            replicas_holding_all
        );

        Ok(AuthoritativeState {
            truncate_epoch,
            max_object_version,
            object_versions: objects.into_values().collect(),
            truncate_log: truncate_log.into_values().collect(),
            replicas_holding_all,
        })
    }
}
