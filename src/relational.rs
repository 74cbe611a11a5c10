//! Relational table
//!
//! A flat description of a context tree: one entry per reachable subject,
//! keyed by a visitor id that is stable across export and import. Entries
//! record which contexts observe the object, its ownership, and the session id
//! of the context it hosts, which is how observer-scoped property keys are
//! remapped after import.

use crate::codec::{ByteReader, ByteWriter};
use crate::error::{CodecError, ObserverError, RelationError};
use crate::manager::ObjectManager;
use crate::object::Ownership;
use crate::property::{PropertyKey, SharedProperty};
use crate::types::{
    ObjectId, SessionId, VisitorId, GLOBAL_POOL_ID, INVALID_SESSION_ID, INVALID_VISITOR_ID,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// visitor id + session id + parent count + ownership + owner + name length
const MIN_ENTRY_LEN: usize = 4 + 4 + 4 + 1 + 4 + 4;

/// How visitor ids are chosen while building a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMode {
    /// Assign fresh ids in walk order and stamp them on the objects
    Export,
    /// Reuse the visitor ids objects already carry
    Verify,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationalTableEntry {
    pub visitor_id: VisitorId,
    /// Session id of the context this object hosts, if any
    pub session_id: SessionId,
    #[serde(skip)]
    pub(crate) previous_session_id: SessionId,
    /// Visitor ids of the objects hosting the contexts observing this one
    pub parents: Vec<VisitorId>,
    pub ownership: Ownership,
    /// Owner's visitor id for `SpecificObserver` ownership
    pub parent_visitor_id: VisitorId,
    pub name: String,
}

impl RelationalTableEntry {
    pub fn previous_session_id(&self) -> SessionId {
        self.previous_session_id
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RelationalTable {
    entries: Vec<RelationalTableEntry>,
    #[serde(skip)]
    objects: Vec<ObjectId>,
}

impl RelationalTable {
    /// Walk the context tree rooted at `root` depth first from its host.
    pub fn build(
        manager: &mut ObjectManager,
        root: SessionId,
        mode: TableMode,
    ) -> Result<Self, ObserverError> {
        let host = manager
            .observer_reference(root)
            .and_then(|c| c.host())
            .ok_or(ObserverError::ContextNotFound(root))?;

        let next_id = match mode {
            TableMode::Export => 0,
            TableMode::Verify => manager
                .objects()
                .filter_map(|o| o.visitor_id())
                .max()
                .map(|max| max + 1)
                .unwrap_or(0),
        };
        let mut walker = Walker {
            mode,
            next_id,
            assigned: BTreeMap::new(),
            table: RelationalTable::default(),
        };
        let (root_index, _) = walker.assign(manager, host);
        let root_visitor = walker.table.entries[root_index].visitor_id;
        walker.visit(manager, root, root_visitor);

        let mut table = walker.table;
        table.resolve_owners(manager);

        if mode == TableMode::Export {
            for (object, entry) in table.objects.iter().zip(&table.entries) {
                if let Some(data) = manager.object_mut(*object) {
                    data.properties
                        .set_shared(SharedProperty::new(PropertyKey::VisitorId, entry.visitor_id));
                }
            }
        }
        debug!(root, entries = table.len(), "Built relational table");
        Ok(table)
    }

    fn resolve_owners(&mut self, manager: &ObjectManager) {
        let by_session: BTreeMap<SessionId, VisitorId> = self
            .entries
            .iter()
            .filter(|e| e.session_id != INVALID_SESSION_ID)
            .map(|e| (e.session_id, e.visitor_id))
            .collect();
        for (object, entry) in self.objects.iter().zip(self.entries.iter_mut()) {
            if entry.ownership != Ownership::SpecificObserver {
                continue;
            }
            let owner = manager
                .object(*object)
                .map(|o| o.observer_parent())
                .unwrap_or(INVALID_SESSION_ID);
            entry.parent_visitor_id = by_session.get(&owner).copied().unwrap_or(INVALID_VISITOR_ID);
        }
    }

    pub fn entries(&self) -> &[RelationalTableEntry] {
        &self.entries
    }

    /// Objects the table was built from, in entry order. Empty for imported tables.
    pub fn objects(&self) -> &[ObjectId] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, visitor_id: VisitorId) -> Option<&RelationalTableEntry> {
        self.entries.iter().find(|e| e.visitor_id == visitor_id)
    }

    pub fn entry_mut(&mut self, visitor_id: VisitorId) -> Option<&mut RelationalTableEntry> {
        self.entries.iter_mut().find(|e| e.visitor_id == visitor_id)
    }

    pub fn entry_with_session_id(&self, session_id: SessionId) -> Option<&RelationalTableEntry> {
        if session_id < 0 {
            return None;
        }
        self.entries.iter().find(|e| e.session_id == session_id)
    }

    pub fn entry_with_previous_session_id(
        &self,
        session_id: SessionId,
    ) -> Option<&RelationalTableEntry> {
        if session_id < 0 {
            return None;
        }
        self.entries
            .iter()
            .find(|e| e.previous_session_id == session_id)
    }

    /// Map a session id from the exporting session to the live one.
    ///
    /// The global pool keeps its id. Keys that already carry a live id (a
    /// second remap of the same objects) are left alone.
    pub fn resolve_session(&self, previous: SessionId) -> Result<SessionId, RelationError> {
        if previous == GLOBAL_POOL_ID {
            return Ok(previous);
        }
        if let Some(entry) = self.entry_with_previous_session_id(previous) {
            return Ok(entry.session_id);
        }
        if self.entry_with_session_id(previous).is_some() {
            return Ok(previous);
        }
        Err(RelationError::DanglingReference(previous))
    }

    /// Forget the exporting session's ids once remapping is done.
    pub fn retire_previous_session_ids(&mut self) {
        for entry in &mut self.entries {
            entry.previous_session_id = INVALID_SESSION_ID;
        }
    }

    /// Structural equality, ignoring session ids and names.
    pub fn compare(&self, other: &RelationalTable) -> Result<(), String> {
        if self.len() != other.len() {
            return Err(format!(
                "entry count differs: {} vs {}",
                self.len(),
                other.len()
            ));
        }
        for entry in &self.entries {
            let Some(counterpart) = other.entry(entry.visitor_id) else {
                return Err(format!("visitor id {} missing", entry.visitor_id));
            };
            let mut expected = entry.parents.clone();
            let mut actual = counterpart.parents.clone();
            expected.sort_unstable();
            actual.sort_unstable();
            if expected != actual {
                return Err(format!(
                    "visitor id {}: parents {:?} vs {:?}",
                    entry.visitor_id, expected, actual
                ));
            }
            if entry.ownership != counterpart.ownership {
                return Err(format!(
                    "visitor id {}: ownership {:?} vs {:?}",
                    entry.visitor_id, entry.ownership, counterpart.ownership
                ));
            }
            if entry.parent_visitor_id != counterpart.parent_visitor_id {
                return Err(format!(
                    "visitor id {}: owner {} vs {}",
                    entry.visitor_id, entry.parent_visitor_id, counterpart.parent_visitor_id
                ));
            }
        }
        Ok(())
    }

    /// Check that every object carries a visitor id present in this table.
    pub fn compare_objects(
        &self,
        manager: &ObjectManager,
        objects: &[ObjectId],
    ) -> Result<(), RelationError> {
        for id in objects {
            let data = manager
                .object(*id)
                .ok_or(RelationError::ObjectNotFound(*id))?;
            let visitor_id = data
                .visitor_id()
                .ok_or(RelationError::MissingVisitorId(*id))?;
            if self.entry(visitor_id).is_none() {
                return Err(RelationError::NotInTable(visitor_id));
            }
        }
        Ok(())
    }

    pub fn export_binary(&self, w: &mut ByteWriter) {
        w.write_u32(self.entries.len() as u32);
        for entry in &self.entries {
            w.write_i32(entry.visitor_id);
            w.write_i32(entry.session_id);
            w.write_i32(entry.parents.len() as i32);
            for parent in &entry.parents {
                w.write_i32(*parent);
            }
            w.write_u8(entry.ownership.as_u8());
            w.write_i32(entry.parent_visitor_id);
            w.write_str(&entry.name);
        }
    }

    pub fn import_binary(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let count = r.read_count(MIN_ENTRY_LEN)?;
        let mut table = RelationalTable::default();
        for _ in 0..count {
            let visitor_id = r.read_i32()?;
            let session_id = r.read_i32()?;
            let parent_count = r.read_signed_count(4)?;
            let mut parents = Vec::with_capacity(parent_count);
            for _ in 0..parent_count {
                parents.push(r.read_i32()?);
            }
            let ownership = Ownership::from_u8(r.read_u8()?)?;
            let parent_visitor_id = r.read_i32()?;
            let name = r.read_string()?;
            if table.entry(visitor_id).is_some() {
                return Err(CodecError::InvalidProperty(format!(
                    "duplicate visitor id {} in relational table",
                    visitor_id
                )));
            }
            table.entries.push(RelationalTableEntry {
                visitor_id,
                session_id,
                previous_session_id: INVALID_SESSION_ID,
                parents,
                ownership,
                parent_visitor_id,
                name,
            });
        }
        Ok(table)
    }

    /// Log every entry at debug level.
    pub fn dump(&self) {
        for entry in &self.entries {
            debug!(
                visitor_id = entry.visitor_id,
                session_id = entry.session_id,
                previous_session_id = entry.previous_session_id,
                parents = ?entry.parents,
                ownership = ?entry.ownership,
                parent_visitor_id = entry.parent_visitor_id,
                name = %entry.name,
                "Relational table entry"
            );
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

struct Walker {
    mode: TableMode,
    next_id: VisitorId,
    assigned: BTreeMap<ObjectId, usize>,
    table: RelationalTable,
}

impl Walker {
    /// Entry index for `object`, and whether it was created by this call.
    fn assign(&mut self, manager: &ObjectManager, object: ObjectId) -> (usize, bool) {
        if let Some(index) = self.assigned.get(&object) {
            return (*index, false);
        }
        let data = manager.object(object);
        let existing = match self.mode {
            TableMode::Verify => data.and_then(|o| o.visitor_id()),
            TableMode::Export => None,
        };
        let visitor_id = existing.unwrap_or_else(|| {
            let id = self.next_id;
            self.next_id += 1;
            id
        });
        trace!(object = %object, visitor_id, "Visiting object");
        let index = self.table.entries.len();
        self.table.entries.push(RelationalTableEntry {
            visitor_id,
            session_id: manager.context_of(object).unwrap_or(INVALID_SESSION_ID),
            previous_session_id: INVALID_SESSION_ID,
            parents: Vec::new(),
            ownership: data.map(|o| o.ownership()).unwrap_or_default(),
            parent_visitor_id: INVALID_VISITOR_ID,
            name: data.map(|o| o.name.clone()).unwrap_or_default(),
        });
        self.table.objects.push(object);
        self.assigned.insert(object, index);
        (index, true)
    }

    fn visit(&mut self, manager: &ObjectManager, session_id: SessionId, parent: VisitorId) {
        let Some(context) = manager.observer_reference(session_id) else {
            return;
        };
        for subject in context.subjects() {
            let (index, fresh) = self.assign(manager, *subject);
            let entry = &mut self.table.entries[index];
            if !entry.parents.contains(&parent) {
                entry.parents.push(parent);
            }
            let visitor_id = entry.visitor_id;
            if fresh {
                if let Some(hosted) = manager.context_of(*subject) {
                    self.visit(manager, hosted, visitor_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(visitor_id: VisitorId, session_id: SessionId, parents: Vec<VisitorId>) -> RelationalTableEntry {
        RelationalTableEntry {
            visitor_id,
            session_id,
            previous_session_id: INVALID_SESSION_ID,
            parents,
            ownership: Ownership::Manual,
            parent_visitor_id: INVALID_VISITOR_ID,
            name: format!("object_{}", visitor_id),
        }
    }

    fn table(entries: Vec<RelationalTableEntry>) -> RelationalTable {
        RelationalTable {
            entries,
            objects: Vec::new(),
        }
    }

    #[test]
    fn test_binary_round_trip_preserves_structure() {
        let original = table(vec![entry(0, 3, vec![]), entry(1, -1, vec![0]), entry(2, 5, vec![0, 1])]);
        let mut w = ByteWriter::new();
        original.export_binary(&mut w);
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        let decoded = RelationalTable::import_binary(&mut r).unwrap();
        assert!(r.is_at_end());
        assert_eq!(decoded.entries(), original.entries());
    }

    #[test]
    fn test_compare_ignores_session_ids_and_names() {
        let a = table(vec![entry(0, 3, vec![]), entry(1, -1, vec![0])]);
        let mut b = table(vec![entry(0, 9, vec![]), entry(1, -1, vec![0])]);
        b.entries[1].name = "renamed".into();
        assert!(a.compare(&b).is_ok());

        b.entries[1].ownership = Ownership::ObserverScope;
        assert!(a.compare(&b).is_err());
    }

    #[test]
    fn test_compare_ignores_parent_order() {
        let a = table(vec![entry(0, 1, vec![]), entry(1, 2, vec![0]), entry(2, -1, vec![0, 1])]);
        let b = table(vec![entry(0, 1, vec![]), entry(1, 2, vec![0]), entry(2, -1, vec![1, 0])]);
        assert!(a.compare(&b).is_ok());
    }

    #[test]
    fn test_resolve_session_is_idempotent() {
        let mut t = table(vec![entry(0, 10, vec![]), entry(1, 11, vec![0])]);
        t.entries[0].previous_session_id = 3;
        t.entries[1].previous_session_id = 4;

        assert_eq!(t.resolve_session(3), Ok(10));
        assert_eq!(t.resolve_session(4), Ok(11));
        assert_eq!(t.resolve_session(GLOBAL_POOL_ID), Ok(GLOBAL_POOL_ID));
        assert_eq!(t.resolve_session(7), Err(RelationError::DanglingReference(7)));

        t.retire_previous_session_ids();
        assert_eq!(t.resolve_session(10), Ok(10));
        assert_eq!(t.resolve_session(3), Err(RelationError::DanglingReference(3)));
    }

    #[test]
    fn test_import_rejects_duplicate_visitor_ids() {
        let duplicated = table(vec![entry(0, 1, vec![]), entry(0, 2, vec![])]);
        let mut w = ByteWriter::new();
        duplicated.export_binary(&mut w);
        let bytes = w.into_bytes();
        assert!(RelationalTable::import_binary(&mut ByteReader::new(&bytes)).is_err());
    }

    #[test]
    fn test_import_rejects_oversized_count() {
        let mut w = ByteWriter::new();
        w.write_u32(1_000_000);
        let bytes = w.into_bytes();
        assert!(matches!(
            RelationalTable::import_binary(&mut ByteReader::new(&bytes)),
            Err(CodecError::CountOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_json_dump_lists_entries() {
        let t = table(vec![entry(0, 1, vec![])]);
        let json = t.to_json().unwrap();
        assert!(json.contains("\"visitor_id\": 0"));
        assert!(!json.contains("previous_session_id"));
    }
}
