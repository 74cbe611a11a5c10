//! Error types for the observer graph.

use crate::types::{ObjectId, SessionId, VisitorId};
use thiserror::Error;

/// Which of the three object property block markers failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerSection {
    Start,
    Middle,
    End,
}

impl std::fmt::Display for MarkerSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarkerSection::Start => write!(f, "start"),
            MarkerSection::Middle => write!(f, "middle"),
            MarkerSection::End => write!(f, "end"),
        }
    }
}

/// Malformed binary stream errors
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("Stream truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("Failed to detect {section} marker (found {found:#010x})")]
    MarkerMismatch { section: MarkerSection, found: u32 },

    #[error("Count {count} exceeds what the remaining {remaining} bytes can hold")]
    CountOutOfBounds { count: u64, remaining: usize },

    #[error("Negative count {0} in stream")]
    NegativeCount(i32),

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("Unknown variant tag: {0}")]
    UnknownVariantTag(u8),

    #[error("Unknown property kind: {0}")]
    UnknownPropertyKind(u8),

    #[error("Unknown ownership kind: {0}")]
    UnknownOwnership(u8),

    #[error("Unknown subject record kind: {0}")]
    UnknownRecordKind(u8),

    #[error("Invalid property: {0}")]
    InvalidProperty(String),

    #[error("No factory registered for tag: {0}")]
    UnknownFactoryTag(String),
}

/// Attachment, detachment and move errors
#[derive(Debug, Error, PartialEq)]
pub enum ObserverError {
    #[error("Observer context not found: {0}")]
    ContextNotFound(SessionId),

    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("Object {object} rejected by context {context}: {reason}")]
    RejectedByPolicy {
        object: ObjectId,
        context: SessionId,
        reason: String,
    },

    #[error("Object {object} has a naming conflict in context {context} that was not resolved")]
    ConflictRequiresResolution { object: ObjectId, context: SessionId },

    #[error("Object {object} is already attached to context {context}")]
    AlreadyAttached { object: ObjectId, context: SessionId },

    #[error("Object {object} is not attached to context {context}")]
    NotAttached { object: ObjectId, context: SessionId },

    #[error("Context {context} is the owner of object {object} and cannot detach it")]
    IsParentObserver { object: ObjectId, context: SessionId },

    #[error("Object {object} is already owned by context {owner}")]
    OwnershipConflict { object: ObjectId, owner: SessionId },

    #[error("Object {0} already hosts an observer context")]
    AlreadyHostsContext(ObjectId),

    #[error("Change of property {key} on object {object} was blocked by a subject filter")]
    PropertyChangeBlocked { object: ObjectId, key: String },
}

/// Relational table and reconstruction errors
#[derive(Debug, Error, PartialEq)]
pub enum RelationError {
    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("Object {0} has no visitor id property")]
    MissingVisitorId(ObjectId),

    #[error("Visitor id {0} is not present in the relational table")]
    NotInTable(VisitorId),

    #[error("No relational table entry for previous session id {0}")]
    DanglingReference(SessionId),

    #[error("Relational table mismatch: {0}")]
    TableMismatch(String),

    #[error("Malformed stream: {0}")]
    Codec(#[from] CodecError),
}

/// Snapshot storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Snapshot digest mismatch for {name}: expected {expected}, got {actual}")]
    DigestMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Top-level errors for configuration, logging and the command line
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Observer error: {0}")]
    ObserverError(#[from] ObserverError),

    #[error("Relation error: {0}")]
    RelationError(#[from] RelationError),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Output formatting error: {0}")]
    OutputError(String),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
