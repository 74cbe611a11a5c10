//! Persistence layer for the snapshot store

use crate::error::StorageError;
use crate::store::{SnapshotRecord, SnapshotStore};
use std::path::Path;
use tracing::debug;

const SNAPSHOT_PREFIX: &str = "snapshot:";

fn storage_error(kind: std::io::ErrorKind, what: &str, e: impl std::fmt::Display) -> StorageError {
    StorageError::IoError(std::io::Error::new(kind, format!("{}: {}", what, e)))
}

fn snapshot_key(name: &str) -> Vec<u8> {
    format!("{}{}", SNAPSHOT_PREFIX, name).into_bytes()
}

/// Sled-based implementation of SnapshotStore
pub struct SledSnapshotStore {
    db: sled::Db,
}

impl SledSnapshotStore {
    /// Open (or create) a store in the directory at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)
            .map_err(|e| storage_error(std::io::ErrorKind::Other, "Failed to open sled database", e))?;
        Ok(Self { db })
    }

    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    pub fn contains(&self, name: &str) -> Result<bool, StorageError> {
        self.db
            .contains_key(snapshot_key(name))
            .map_err(|e| storage_error(std::io::ErrorKind::Other, "Failed to check snapshot existence", e))
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db
            .flush()
            .map_err(|e| storage_error(std::io::ErrorKind::Other, "Failed to flush database", e))?;
        Ok(())
    }
}

impl SnapshotStore for SledSnapshotStore {
    fn get(&self, name: &str) -> Result<Option<SnapshotRecord>, StorageError> {
        match self
            .db
            .get(snapshot_key(name))
            .map_err(|e| storage_error(std::io::ErrorKind::Other, "Failed to get snapshot", e))?
        {
            Some(value) => {
                let record: SnapshotRecord = bincode::deserialize(&value).map_err(|e| {
                    storage_error(std::io::ErrorKind::InvalidData, "Failed to deserialize snapshot", e)
                })?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn put(&self, record: &SnapshotRecord) -> Result<(), StorageError> {
        let value = bincode::serialize(record).map_err(|e| {
            storage_error(std::io::ErrorKind::InvalidData, "Failed to serialize snapshot", e)
        })?;
        self.db
            .insert(snapshot_key(&record.name), value)
            .map_err(|e| storage_error(std::io::ErrorKind::Other, "Failed to put snapshot", e))?;
        debug!(name = %record.name, bytes = record.payload.len(), "Stored snapshot");
        Ok(())
    }

    fn list(&self) -> Result<Vec<SnapshotRecord>, StorageError> {
        let mut records = Vec::new();
        for item in self.db.scan_prefix(SNAPSHOT_PREFIX.as_bytes()) {
            let (_, value) = item
                .map_err(|e| storage_error(std::io::ErrorKind::Other, "Failed to iterate store", e))?;
            let record: SnapshotRecord = bincode::deserialize(&value).map_err(|e| {
                storage_error(std::io::ErrorKind::InvalidData, "Failed to deserialize snapshot", e)
            })?;
            records.push(record);
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(records)
    }

    fn remove(&self, name: &str) -> Result<bool, StorageError> {
        let removed = self
            .db
            .remove(snapshot_key(name))
            .map_err(|e| storage_error(std::io::ErrorKind::Other, "Failed to remove snapshot", e))?;
        Ok(removed.is_some())
    }
}
