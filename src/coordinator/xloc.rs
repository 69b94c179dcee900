//! Replica sets (X-Locations Sets)
//!
//! A [`ReplicaSet`] is the versioned, ordered list of replicas responsible for a
//! file's data. Each [`Replica`] is an ordered list of OSD UUIDs whose first entry
//! is the head OSD, the one the coordinator talks to.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Replica is complete: every object has been fetched
pub const REPL_FLAG_IS_COMPLETE: u32 = 0x1;
/// Replica is a full replica rather than a partial, on-demand one
pub const REPL_FLAG_FULL_REPLICA: u32 = 0x2;

/// Minimum acknowledgements for a fan-out over `n` replicas: `ceil((n + 1) / 2)`.
pub fn required_acks(n: usize) -> usize {
    (n + 1).div_ceil(2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Not replicated
    None,
    /// Read-only replication, coordinated by clients
    ReadOnly,
    /// Read/write quorum replication
    Quorum,
    /// Primary/backup replication with quorum writes
    PrimaryBackupQuorum,
}

impl UpdatePolicy {
    pub fn is_read_only(&self) -> bool {
        matches!(self, UpdatePolicy::ReadOnly)
    }

    pub fn is_replicated(&self) -> bool {
        !matches!(self, UpdatePolicy::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdatePolicy::None => "none",
            UpdatePolicy::ReadOnly => "read_only",
            UpdatePolicy::Quorum => "quorum",
            UpdatePolicy::PrimaryBackupQuorum => "primary_backup_quorum",
        }
    }
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UpdatePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(UpdatePolicy::None),
            "read_only" | "ronly" => Ok(UpdatePolicy::ReadOnly),
            "quorum" | "wqrq" => Ok(UpdatePolicy::Quorum),
            "primary_backup_quorum" | "wara" => Ok(UpdatePolicy::PrimaryBackupQuorum),
            other => Err(Error::InvalidArgument(format!(
                "unknown replica update policy: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripingPolicy {
    pub stripe_size_kb: u32,
    pub width: u32,
}

impl Default for StripingPolicy {
    fn default() -> Self {
        Self {
            stripe_size_kb: 128,
            width: 1,
        }
    }
}

/// One replica of a file. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    osd_uuids: Vec<String>,
    striping: StripingPolicy,
    flags: u32,
}

impl Replica {
    pub fn new(osd_uuids: Vec<String>, striping: StripingPolicy, flags: u32) -> Result<Self> {
        if osd_uuids.is_empty() || osd_uuids.iter().any(|u| u.trim().is_empty()) {
            return Err(Error::InvalidArgument(
                "a replica needs at least one OSD and no empty OSD UUIDs".into(),
            ));
        }
        if striping.width as usize != osd_uuids.len() {
            return Err(Error::InvalidArgument(format!(
                "striping width {} does not match {} OSDs",
                striping.width,
                osd_uuids.len()
            )));
        }
        Ok(Self {
            osd_uuids,
            striping,
            flags,
        })
    }

    /// Single-OSD replica with default striping
    pub fn single(osd_uuid: impl Into<String>, flags: u32) -> Result<Self> {
        Self::new(vec![osd_uuid.into()], StripingPolicy::default(), flags)
    }

    pub fn head_osd(&self) -> &str {
        self.osd_uuids.first().map(String::as_str).unwrap_or_default()
    }

    pub fn osd_uuids(&self) -> &[String] {
        &self.osd_uuids
    }

    pub fn striping(&self) -> StripingPolicy {
        self.striping
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn is_complete(&self) -> bool {
        self.flags & REPL_FLAG_IS_COMPLETE != 0
    }

    pub fn is_full(&self) -> bool {
        self.flags & REPL_FLAG_FULL_REPLICA != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSet {
    replicas: Vec<Replica>,
    version: u32,
    update_policy: UpdatePolicy,
    read_only_file_size: u64,
}

impl ReplicaSet {
    pub fn new(replicas: Vec<Replica>, version: u32, update_policy: UpdatePolicy) -> Result<Self> {
        let set = Self {
            replicas,
            version,
            update_policy,
            read_only_file_size: 0,
        };
        set.check_distinct_heads()?;
        Ok(set)
    }

    fn check_distinct_heads(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for replica in &self.replicas {
            if !seen.insert(replica.head_osd()) {
                return Err(Error::InvalidArgument(format!(
                    "OSD {} is head of more than one replica",
                    replica.head_osd()
                )));
            }
        }
        Ok(())
    }

    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn update_policy(&self) -> UpdatePolicy {
        self.update_policy
    }

    pub fn read_only_file_size(&self) -> u64 {
        self.read_only_file_size
    }

    /// Head OSD UUIDs in replica order
    pub fn head_osds(&self) -> Vec<String> {
        self.replicas
            .iter()
            .map(|r| r.head_osd().to_string())
            .collect()
    }

    pub fn contains_head(&self, osd_uuid: &str) -> bool {
        self.replicas.iter().any(|r| r.head_osd() == osd_uuid)
    }

    pub fn find_by_head(&self, osd_uuid: &str) -> Option<&Replica> {
        self.replicas.iter().find(|r| r.head_osd() == osd_uuid)
    }

    /// Proposed set with `added` appended; keeps this set's version.
    pub fn with_added(&self, added: Vec<Replica>) -> Result<Self> {
        let mut replicas = self.replicas.clone();
        replicas.extend(added);
        let proposed = Self {
            replicas,
            ..self.clone()
        };
        proposed.check_distinct_heads()?;
        Ok(proposed)
    }

    /// Proposed set without the replica headed by `osd_uuid`; keeps this set's version.
    pub fn without_head(&self, osd_uuid: &str) -> Option<Self> {
        if !self.contains_head(osd_uuid) {
            return None;
        }
        Some(Self {
            replicas: self
                .replicas
                .iter()
                .filter(|r| r.head_osd() != osd_uuid)
                .cloned()
                .collect(),
            ..self.clone()
        })
    }

    /// Same membership under a new version
    pub fn with_version(&self, version: u32) -> Self {
        Self {
            version,
            ..self.clone()
        }
    }

    pub fn with_read_only_file_size(mut self, size: u64) -> Self {
        self.read_only_file_size = size;
        self
    }

    /// Heads present here but absent from `other`
    pub fn heads_missing_from(&self, other: &ReplicaSet) -> Vec<String> {
        self.replicas
            .iter()
            .map(|r| r.head_osd())
            .filter(|head| !other.contains_head(head))
            .map(str::to_string)
            .collect()
    }
}
