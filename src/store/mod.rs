//! Snapshot Store
//!
//! Keeps exported observer streams between runs. Each snapshot is stored as a
//! bincode-encoded [`SnapshotRecord`] keyed by its name, together with a blake3
//! digest of the payload that is checked on load.

pub mod persistence;

pub use persistence::SledSnapshotStore;

use crate::error::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One exported context tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub name: String,
    /// Name of the object hosting the exported context
    pub root_name: String,
    /// Number of relational table entries in the payload
    pub entry_count: u64,
    pub created_at: DateTime<Utc>,
    /// Hex encoded blake3 digest of `payload`
    pub digest: String,
    pub payload: Vec<u8>,
}

impl SnapshotRecord {
    pub fn new(
        name: impl Into<String>,
        root_name: impl Into<String>,
        entry_count: u64,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            root_name: root_name.into(),
            entry_count,
            created_at: Utc::now(),
            digest: digest_payload(&payload),
            payload,
        }
    }

    /// Check the payload against the stored digest.
    pub fn verify(&self) -> Result<(), StorageError> {
        let actual = digest_payload(&self.payload);
        if actual != self.digest {
            return Err(StorageError::DigestMismatch {
                name: self.name.clone(),
                expected: self.digest.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// First bytes of the digest, for display.
    pub fn short_digest(&self) -> &str {
        self.digest.get(..12).unwrap_or(&self.digest)
    }
}

pub fn digest_payload(payload: &[u8]) -> String {
    hex::encode(blake3::hash(payload).as_bytes())
}

/// Snapshot store interface
pub trait SnapshotStore {
    fn get(&self, name: &str) -> Result<Option<SnapshotRecord>, StorageError>;
    fn put(&self, record: &SnapshotRecord) -> Result<(), StorageError>;
    fn list(&self) -> Result<Vec<SnapshotRecord>, StorageError>;
    fn remove(&self, name: &str) -> Result<bool, StorageError>;

    /// Fetch a snapshot and verify its digest.
    fn load(&self, name: &str) -> Result<SnapshotRecord, StorageError> {
        let record = self
            .get(name)?
            .ok_or_else(|| StorageError::SnapshotNotFound(name.to_string()))?;
        record.verify()?;
        Ok(record)
    }
}
