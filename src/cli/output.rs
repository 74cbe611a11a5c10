//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::ApiError;

/// Map domain/service errors to a string for CLI output.
pub fn map_error(e: &ApiError) -> String {
    match e {
        ApiError::StorageError(crate::error::StorageError::SnapshotNotFound(name)) => {
            format!("No snapshot named '{}'. Run `obsgraph list` to see stored snapshots.", name)
        }
        other => other.to_string(),
    }
}
