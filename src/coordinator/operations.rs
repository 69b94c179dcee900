//! Replica operations on the metadata stage
//!
//! These run on the [`ProcessingStage`](crate::coordinator::stage::ProcessingStage):
//! they validate a request against the stored file, take the reconfiguration
//! lock in the same batch that records nothing else, and hand the change to the
//! coordinator. The coordinator calls back into [`XLocSetInstaller`] once the
//! replicas are in a safe state.

use crate::common::metrics::METRICS;
use crate::common::{Error, Result};
use crate::coordinator::capability::CapabilityContext;
use crate::coordinator::classify::ErrorClassifier;
use crate::coordinator::lock::LockManager;
use crate::coordinator::metadata::{FileMetadata, MetadataStore, MetadataUpdate};
use crate::coordinator::xloc::{Replica, ReplicaSet};
use crate::coordinator::xloc_coordinator::{
    Completion, CoordinatorHandle, JobKind, JobRequest, XLocSetInstaller,
};
use std::sync::Arc;

pub struct ReplicaOperations {
    locks: Arc<LockManager>,
    coordinator: CoordinatorHandle,
    classifier: ErrorClassifier,
}

impl ReplicaOperations {
    pub fn new(
        locks: Arc<LockManager>,
        coordinator: CoordinatorHandle,
        classifier: ErrorClassifier,
    ) -> Arc<Self> {
        Arc::new(Self {
            locks,
            coordinator,
            classifier,
        })
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Register a new file with its initial replica set
    pub fn create_file(&self, store: &MetadataStore, file_id: &str, xloc: ReplicaSet) -> Result<FileMetadata> {
        if file_id.is_empty() {
            return Err(Error::InvalidArgument("empty file ID".into()));
        }
        if xloc.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "file {} needs at least one replica",
                file_id
            )));
        }
        if store.get_file(file_id)?.is_some() {
            return Err(Error::InvalidArgument(format!("file {} already exists", file_id)));
        }

        let file = FileMetadata::new(file_id, xloc);
        let mut update = MetadataUpdate::new();
        update.put_file(file.clone());
        store.apply(update)?;
        tracing::info!("Created {} with {} replicas", file_id, file.xloc.len());
        Ok(file)
    }

    /// Start adding `replicas` to the file. The outcome arrives on `completion`.
    pub fn add_replicas(
        self: &Arc<Self>,
        store: &MetadataStore,
        file_id: &str,
        replicas: Vec<Replica>,
        completion: Completion,
    ) {
        match self.prepare_add(store, file_id, replicas) {
            Ok((file, proposed, update)) => {
                self.submit(store, JobKind::AddReplicas, file, proposed, update, completion)
            }
            Err(e) => completion.finish(Err(self.classifier.report(file_id, &e))),
        }
    }

    /// Start removing the replica headed by `osd_uuid`. The outcome arrives on `completion`.
    pub fn remove_replica(
        self: &Arc<Self>,
        store: &MetadataStore,
        file_id: &str,
        osd_uuid: &str,
        completion: Completion,
    ) {
        match self.prepare_remove(store, file_id, osd_uuid) {
            Ok((file, proposed, update)) => {
                self.submit(store, JobKind::RemoveReplicas, file, proposed, update, completion)
            }
            Err(e) => completion.finish(Err(self.classifier.report(file_id, &e))),
        }
    }

    fn prepare_add(
        &self,
        store: &MetadataStore,
        file_id: &str,
        replicas: Vec<Replica>,
    ) -> Result<(FileMetadata, ReplicaSet, MetadataUpdate)> {
        if replicas.is_empty() {
            return Err(Error::InvalidArgument("no replicas to add".into()));
        }
        let file = store.require_file(file_id)?;
        ensure_replicated(&file)?;

        for replica in &replicas {
            if file.xloc.contains_head(replica.head_osd()) {
                return Err(Error::InvalidArgument(format!(
                    "OSD {} already holds a replica of {}",
                    replica.head_osd(),
                    file_id
                )));
            }
        }
        let proposed = file.xloc.with_added(replicas)?;

        let mut update = MetadataUpdate::new();
        self.lock_for_change(store, file_id, &mut update)?;
        Ok((file, proposed, update))
    }

    fn prepare_remove(
        &self,
        store: &MetadataStore,
        file_id: &str,
        osd_uuid: &str,
    ) -> Result<(FileMetadata, ReplicaSet, MetadataUpdate)> {
        let file = store.require_file(file_id)?;
        ensure_replicated(&file)?;

        let proposed = file.xloc.without_head(osd_uuid).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "OSD {} is not the head OSD of any replica of {}",
                osd_uuid, file_id
            ))
        })?;
        if proposed.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "cannot remove the last replica of {}",
                file_id
            )));
        }
        if proposed.update_policy().is_read_only()
            && !proposed.replicas().iter().any(|r| r.is_full() || r.is_complete())
        {
            return Err(Error::InvalidArgument(format!(
                "at least one full or complete replica of {} must remain",
                file_id
            )));
        }

        let mut update = MetadataUpdate::new();
        self.lock_for_change(store, file_id, &mut update)?;
        Ok((file, proposed, update))
    }

    fn lock_for_change(&self, store: &MetadataStore, file_id: &str, update: &mut MetadataUpdate) -> Result<()> {
        let result = self.locks.acquire(store, file_id, update)?;
        match (result.already_held, result.crash_suspected) {
            (false, _) => Ok(()),
            (true, false) => Err(Error::Busy(
                "xLocSet change already in progress. Please retry.".into(),
            )),
            (true, true) => {
                METRICS.crashed_locks_recovered.inc();
                self.locks.take_over(file_id, update);
                Ok(())
            }
        }
    }

    fn submit(
        self: &Arc<Self>,
        store: &MetadataStore,
        kind: JobKind,
        file: FileMetadata,
        proposed: ReplicaSet,
        update: MetadataUpdate,
        completion: Completion,
    ) {
        let file_id = file.file_id.clone();
        if let Err(e) = store.apply(update) {
            completion.finish(Err(self.classifier.report(&file_id, &e)));
            return;
        }

        let request = JobRequest {
            file_id: file_id.clone(),
            context: CapabilityContext { epoch: file.epoch },
            current: file.xloc,
            proposed,
            installer: self.clone() as Arc<dyn XLocSetInstaller>,
            completion,
        };
        let submitted = match kind {
            JobKind::AddReplicas => self.coordinator.submit_add_replicas(request),
            JobKind::RemoveReplicas => self.coordinator.submit_remove_replicas(request),
        };

        if let Err(e) = submitted {
            tracing::error!("Could not submit {} for {}: {}", kind, file_id, e);
            let mut update = MetadataUpdate::new();
            self.locks.release(&file_id, &mut update);
            if let Err(e) = store.apply(update) {
                tracing::warn!("Could not release replica set lock of {}: {}", file_id, e);
            }
        }
    }

    /// Clear a lock left behind by a crashed coordinator. The current replica set
    /// is re-installed under a new version so that replicas invalidated by the
    /// interrupted change revalidate against it.
    pub fn revalidate(&self, store: &MetadataStore, file_id: &str) -> Result<FileMetadata> {
        let mut file = store.require_file(file_id)?;
        let lock = self.locks.inspect(store, file_id)?;

        if !lock.is_locked() {
            return Ok(file);
        }
        if lock.is_live() {
            return Err(Error::Busy(format!(
                "replica set change of {} in progress",
                file_id
            )));
        }

        file.xloc = file.xloc.with_version(file.xloc.version() + 1);
        let mut update = MetadataUpdate::new();
        update.put_file(file.clone());
        self.locks.release(file_id, &mut update);
        store.apply(update)?;

        METRICS.crashed_locks_recovered.inc();
        tracing::warn!(
            "Recovered {} from an interrupted replica set change, now at version {}",
            file_id,
            file.xloc.version()
        );
        Ok(file)
    }
}

fn ensure_replicated(file: &FileMetadata) -> Result<()> {
    if !file.xloc.update_policy().is_replicated() {
        return Err(Error::InvalidArgument(format!(
            "file {} is not replicated",
            file.file_id
        )));
    }
    Ok(())
}

impl XLocSetInstaller for ReplicaOperations {
    fn install_xloc_set(
        &self,
        store: &MetadataStore,
        file_id: &str,
        proposed: &ReplicaSet,
        current: &ReplicaSet,
    ) -> Result<ReplicaSet> {
        let mut file = store.require_file(file_id)?;
        if file.xloc.version() != current.version() {
            return Err(Error::Internal(format!(
                "replica set of {} moved from version {} to {} during reconfiguration",
                file_id,
                current.version(),
                file.xloc.version()
            )));
        }

        let installed = proposed.with_version(current.version() + 1);
        if installed.len() == 1 {
            file.read_only = false;
        }
        file.xloc = installed.clone();

        let mut update = MetadataUpdate::new();
        update.put_file(file);
        self.locks.release(file_id, &mut update);
        store.apply(update)?;
        Ok(installed)
    }

    fn reject_xloc_set(&self, store: &MetadataStore, file_id: &str, current: &ReplicaSet) -> Result<()> {
        let mut file = store.require_file(file_id)?;
        file.xloc = current.with_version(current.version().max(file.xloc.version()) + 1);

        let mut update = MetadataUpdate::new();
        update.put_file(file);
        self.locks.release(file_id, &mut update);
        store.apply(update)
    }
}
