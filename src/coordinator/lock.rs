//! Crash-recovery lock for replica set changes
//!
//! While a file's replica set is being reconfigured, an extended attribute named
//! [`XLOCSET_CHANGE_ATTR`] holds the owner tag of the coordinator process doing
//! it. The tag is a random UUID generated once per process, so a lock carrying a
//! different tag was left behind by a process that is gone.

use crate::common::Result;
use crate::coordinator::metadata::{MetadataStore, MetadataUpdate};
use serde::Serialize;

pub const XLOCSET_CHANGE_ATTR: &str = "XLocSetChange";

/// Outcome of [`LockManager::acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockResult {
    pub already_held: bool,
    pub crash_suspected: bool,
}

/// Persisted lock state of a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconfigurationLock {
    pub owner_tag: Option<String>,
    pub crash_suspected: bool,
}

impl ReconfigurationLock {
    pub fn is_locked(&self) -> bool {
        self.owner_tag.is_some()
    }

    /// Locked by this process: a reconfiguration is in flight
    pub fn is_live(&self) -> bool {
        self.is_locked() && !self.crash_suspected
    }
}

#[derive(Debug, Clone)]
pub struct LockManager {
    owner_tag: String,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_owner_tag(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_owner_tag(owner_tag: impl Into<String>) -> Self {
        Self {
            owner_tag: owner_tag.into(),
        }
    }

    pub fn owner_tag(&self) -> &str {
        &self.owner_tag
    }

    pub fn inspect(&self, store: &MetadataStore, file_id: &str) -> Result<ReconfigurationLock> {
        let owner_tag = store
            .get_xattr(file_id, XLOCSET_CHANGE_ATTR)?
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
            .filter(|tag| !tag.is_empty());
        let crash_suspected = owner_tag.as_deref().is_some_and(|tag| tag != self.owner_tag);
        Ok(ReconfigurationLock {
            owner_tag,
            crash_suspected,
        })
    }

    /// Take the lock for `file_id`. When it is free, the write is staged in
    /// `update`; otherwise nothing is staged.
    pub fn acquire(
        &self,
        store: &MetadataStore,
        file_id: &str,
        update: &mut MetadataUpdate,
    ) -> Result<LockResult> {
        let lock = self.inspect(store, file_id)?;
        if !lock.is_locked() {
            update.set_xattr(file_id, XLOCSET_CHANGE_ATTR, self.owner_tag.as_bytes());
            return Ok(LockResult {
                already_held: false,
                crash_suspected: false,
            });
        }
        Ok(LockResult {
            already_held: true,
            crash_suspected: lock.crash_suspected,
        })
    }

    /// Re-tag a lock left by a dead process with this process's tag
    pub fn take_over(&self, file_id: &str, update: &mut MetadataUpdate) {
        tracing::warn!("Taking over reconfiguration lock of {} from a crashed coordinator", file_id);
        update.set_xattr(file_id, XLOCSET_CHANGE_ATTR, self.owner_tag.as_bytes());
    }

    pub fn release(&self, file_id: &str, update: &mut MetadataUpdate) {
        update.remove_xattr(file_id, XLOCSET_CHANGE_ATTR);
    }
}
