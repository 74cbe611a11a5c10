//! Identifier types shared across the crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session identifier of an observer context.
///
/// Assigned by the [`ObjectManager`](crate::manager::ObjectManager) for the
/// lifetime of one manager instance. Not preserved across export/import.
pub type SessionId = i32;

/// Export-time identifier of an object inside one relational table.
pub type VisitorId = i32;

/// Session id of the process-wide global object pool.
pub const GLOBAL_POOL_ID: SessionId = 0;

/// Marker for "no session id" in table entries and ownership properties.
pub const INVALID_SESSION_ID: SessionId = -1;

/// Marker for "no visitor id" (e.g. specific owner outside the table).
pub const INVALID_VISITOR_ID: VisitorId = -1;

/// Handle to an object held in the manager's arena.
///
/// Ids are never reused, so a handle to a destroyed object simply fails lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub(crate) u64);

impl ObjectId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Weak handle to an observer context.
///
/// Holding a handle does not keep the context alive. Resolve it through
/// [`ObjectManager::context`](crate::manager::ObjectManager::context), which
/// returns `None` once the context has been torn down and unregistered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub(crate) SessionId);

impl ContextHandle {
    pub fn session_id(&self) -> SessionId {
        self.0
    }
}
