//! Metadata store using RocksDB
//!
//! Stores:
//! - File metadata (epoch, read-only flag, current replica set, timestamps)
//! - Extended attributes per file (the reconfiguration lock lives here)
//!
//! All mutations go through a [`MetadataUpdate`] that is applied as one atomic
//! write batch.

use crate::common::utils::timestamp_now;
use crate::common::{Error, Result};
use crate::coordinator::xloc::ReplicaSet;
use rocksdb::{ColumnFamily, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::path::Path;

const CF_FILES: &str = "files";
const CF_XATTRS: &str = "xattrs";

/// Separates file ID and attribute name in xattr keys
const XATTR_KEY_SEPARATOR: char = '\u{0}';

/// File metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_id: String,
    pub epoch: u32,
    pub issued_epoch: u32,
    pub read_only: bool,
    pub xloc: ReplicaSet,
    pub created_at: u64,
    pub updated_at: u64,
}

impl FileMetadata {
    pub fn new(file_id: impl Into<String>, xloc: ReplicaSet) -> Self {
        let now = timestamp_now();
        Self {
            file_id: file_id.into(),
            epoch: 0,
            issued_epoch: 0,
            read_only: xloc.update_policy().is_read_only(),
            xloc,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone)]
enum UpdateOp {
    PutFile(FileMetadata),
    SetXattr {
        file_id: String,
        name: String,
        value: Vec<u8>,
    },
    RemoveXattr {
        file_id: String,
        name: String,
    },
}

/// A batch of metadata mutations, applied atomically by [`MetadataStore::apply`]
#[derive(Debug, Clone, Default)]
pub struct MetadataUpdate {
    ops: Vec<UpdateOp>,
}

impl MetadataUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_file(&mut self, mut file: FileMetadata) {
        file.updated_at = timestamp_now();
        self.ops.push(UpdateOp::PutFile(file));
    }

    pub fn set_xattr(&mut self, file_id: &str, name: &str, value: impl Into<Vec<u8>>) {
        self.ops.push(UpdateOp::SetXattr {
            file_id: file_id.to_string(),
            name: name.to_string(),
            value: value.into(),
        });
    }

    pub fn remove_xattr(&mut self, file_id: &str, name: &str) {
        self.ops.push(UpdateOp::RemoveXattr {
            file_id: file_id.to_string(),
            name: name.to_string(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

fn xattr_key(file_id: &str, name: &str) -> String {
    format!("{}{}{}", file_id, XATTR_KEY_SEPARATOR, name)
}

/// Metadata store
pub struct MetadataStore {
    db: DB,
    master: Option<String>,
}

impl MetadataStore {
    /// Open or create metadata store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, vec![CF_FILES, CF_XATTRS])?;

        Ok(Self { db, master: None })
    }

    /// Mark this store as a replica of `master`; writes are then redirected there.
    pub fn with_master(mut self, master: Option<String>) -> Self {
        self.master = master;
        self
    }

    pub fn master(&self) -> Option<&str> {
        self.master.as_deref()
    }

    pub fn is_master(&self) -> bool {
        self.master.is_none()
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Internal(format!("missing column family {}", name)))
    }

    // === File operations ===

    /// Get file metadata
    pub fn get_file(&self, file_id: &str) -> Result<Option<FileMetadata>> {
        match self.db.get_cf(self.cf(CF_FILES)?, file_id.as_bytes())? {
            Some(bytes) => {
                let file: FileMetadata = bincode::deserialize(&bytes)
                    .map_err(|e| Error::MetadataCorrupted(e.to_string()))?;
                Ok(Some(file))
            }
            None => Ok(None),
        }
    }

    /// Get file metadata or fail with `NotFound`
    pub fn require_file(&self, file_id: &str) -> Result<FileMetadata> {
        self.get_file(file_id)?
            .ok_or_else(|| Error::NotFound(file_id.to_string()))
    }

    /// List all file IDs
    pub fn list_files(&self) -> Result<Vec<String>> {
        let iter = self
            .db
            .iterator_cf(self.cf(CF_FILES)?, rocksdb::IteratorMode::Start);

        let mut files = Vec::new();
        for item in iter {
            let (key_bytes, _) = item?;
            let file_id = String::from_utf8(key_bytes.to_vec())
                .map_err(|_| Error::MetadataCorrupted("Invalid UTF-8".into()))?;
            files.push(file_id);
        }

        Ok(files)
    }

    // === Extended attributes ===

    pub fn get_xattr(&self, file_id: &str, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .db
            .get_cf(self.cf(CF_XATTRS)?, xattr_key(file_id, name).as_bytes())?)
    }

    // === Writes ===

    /// Apply a batch atomically. Fails with `Redirect` on a non-master store.
    pub fn apply(&self, update: MetadataUpdate) -> Result<()> {
        if let Some(master) = &self.master {
            return Err(Error::Redirect {
                target: Some(master.clone()),
            });
        }
        if update.is_empty() {
            return Ok(());
        }

        let files = self.cf(CF_FILES)?;
        let xattrs = self.cf(CF_XATTRS)?;
        let mut batch = WriteBatch::default();
        for op in update.ops {
            match op {
                UpdateOp::PutFile(file) => {
                    let value = bincode::serialize(&file)
                        .map_err(|e| Error::Internal(format!("Serialize error: {}", e)))?;
                    batch.put_cf(files, file.file_id.as_bytes(), value);
                }
                UpdateOp::SetXattr {
                    file_id,
                    name,
                    value,
                } => batch.put_cf(xattrs, xattr_key(&file_id, &name).as_bytes(), value),
                UpdateOp::RemoveXattr { file_id, name } => {
                    batch.delete_cf(xattrs, xattr_key(&file_id, &name).as_bytes())
                }
            }
        }
        self.db.write(batch)?;
        Ok(())
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::xloc::{Replica, UpdatePolicy};
    use tempfile::tempdir;

    fn xloc() -> ReplicaSet {
        ReplicaSet::new(
            vec![
                Replica::single("osd-a", 0).unwrap(),
                Replica::single("osd-b", 0).unwrap(),
            ],
            1,
            UpdatePolicy::Quorum,
        )
        .unwrap()
    }

    #[test]
    fn test_metadata_store() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::open(dir.path().join("test.db")).unwrap();

        let mut update = MetadataUpdate::new();
        update.put_file(FileMetadata::new("vol:1", xloc()));
        update.set_xattr("vol:1", "user.tag", "blue");
        assert_eq!(update.len(), 2);
        store.apply(update).unwrap();

        let file = store.get_file("vol:1").unwrap().unwrap();
        assert_eq!(file.xloc.head_osds(), vec!["osd-a", "osd-b"]);
        assert!(!file.read_only);
        assert_eq!(
            store.get_xattr("vol:1", "user.tag").unwrap().as_deref(),
            Some(&b"blue"[..])
        );
        assert!(store.get_xattr("vol:2", "user.tag").unwrap().is_none());
        assert_eq!(store.list_files().unwrap(), vec!["vol:1"]);

        let mut update = MetadataUpdate::new();
        update.remove_xattr("vol:1", "user.tag");
        store.apply(update).unwrap();
        assert!(store.get_xattr("vol:1", "user.tag").unwrap().is_none());

        assert!(store.get_file("vol:9").unwrap().is_none());
        assert!(matches!(store.require_file("vol:9"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_xattr_names_do_not_collide_across_files() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::open(dir.path().join("test.db")).unwrap();

        let mut update = MetadataUpdate::new();
        update.set_xattr("a", "bc", "1");
        update.set_xattr("ab", "c", "2");
        store.apply(update).unwrap();

        assert_eq!(store.get_xattr("a", "bc").unwrap().unwrap(), b"1");
        assert_eq!(store.get_xattr("ab", "c").unwrap().unwrap(), b"2");
    }

    #[test]
    fn test_replica_store_redirects_writes() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::open(dir.path().join("test.db"))
            .unwrap()
            .with_master(Some("mrc-master:32636".into()));
        assert!(!store.is_master());

        let mut update = MetadataUpdate::new();
        update.put_file(FileMetadata::new("vol:1", xloc()));
        match store.apply(update) {
            Err(Error::Redirect { target }) => {
                assert_eq!(target.as_deref(), Some("mrc-master:32636"))
            }
            other => panic!("expected redirect, got {:?}", other),
        }
        assert!(store.get_file("vol:1").unwrap().is_none());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let store = MetadataStore::open(&path).unwrap();
            let mut update = MetadataUpdate::new();
            update.put_file(FileMetadata::new("vol:1", xloc()));
            store.apply(update).unwrap();
            store.flush().unwrap();
        }
        let store = MetadataStore::open(&path).unwrap();
        assert_eq!(store.require_file("vol:1").unwrap().xloc.version(), 1);
    }
}
