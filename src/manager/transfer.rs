//! Export and import of a context tree as one binary stream.
//!
//! Stream layout:
//!
//! ```text
//! relational table
//! root factory data (host type tag, host name)
//! context structure
//! root property block
//! ```
//!
//! A context structure is the context name, its action hints, its filters
//! (tag plus a length-prefixed payload) and one record per subject. A subject
//! seen for the first time is written inline: factory data, a flag telling
//! whether it hosts a context (followed by that context's structure), and its
//! property block. Later sightings are written as a one byte reference; the
//! relational table carries the attachment itself.

use super::ObjectManager;
use crate::codec::{read_property_block, write_property_block, ByteReader, ByteWriter};
use crate::error::CodecError;
use crate::factory::FactoryData;
use crate::observer::{ActionHints, FilterSlot, FilterTag};
use crate::property::{ObserverProperty, PropertyStore, PropertyTypes};
use crate::relational::{RelationalTable, TableMode};
use crate::types::{ObjectId, SessionId};
use std::collections::BTreeSet;
use tracing::{debug, error, info, instrument, warn};

const RECORD_INLINE: u8 = 0;
const RECORD_REFERENCE: u8 = 1;

/// tag length + payload length
const MIN_FILTER_LEN: usize = 8;

/// Outcome of an export or import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransferResult {
    Complete,
    /// The stream was written or read, but some objects or filters could not
    /// be represented
    Incomplete,
    Failed,
}

impl TransferResult {
    /// The worse of two results.
    pub fn combine(self, other: TransferResult) -> TransferResult {
        self.max(other)
    }

    pub fn is_failed(self) -> bool {
        self == TransferResult::Failed
    }
}

impl ObjectManager {
    /// Export the context tree rooted at `session_id` into `w`.
    #[instrument(skip(self, w))]
    pub fn export_observer_binary(&mut self, session_id: SessionId, w: &mut ByteWriter) -> TransferResult {
        let Some(host) = self.contexts.get(&session_id).and_then(|c| c.host) else {
            error!(session_id, "Only contexts hosted by an object can be exported");
            return TransferResult::Failed;
        };

        let table = match RelationalTable::build(self, session_id, TableMode::Export) {
            Ok(table) => table,
            Err(e) => {
                error!(error = %e, "Failed to build relational table");
                return TransferResult::Failed;
            }
        };
        let stamped = table.objects().to_vec();

        if self.transfer.verify_table_codec {
            if let Err(reason) = verify_table_codec(&table) {
                error!(reason = %reason, "Relational table did not survive its own codec");
                self.remove_relational_properties(&stamped);
                return TransferResult::Failed;
            }
        }
        if self.transfer.verbose_tables {
            table.dump();
        }

        table.export_binary(w);
        let Some(host_data) = self.objects.get(&host) else {
            self.remove_relational_properties(&stamped);
            return TransferResult::Failed;
        };
        FactoryData::new(host_data.type_tag.as_str(), host_data.name.as_str()).export_binary(w);

        let mut exported = BTreeSet::from([host]);
        let result = self.write_context_structure(session_id, w, &mut exported);

        if let Some(host_data) = self.objects.get(&host) {
            write_property_block(w, &host_data.properties, PropertyTypes::ALL, &host_data.name);
        }
        self.remove_relational_properties(&stamped);

        if !result.is_failed() {
            self.set_modified(session_id, false);
        }
        info!(
            session_id,
            objects = stamped.len(),
            bytes = w.len(),
            ?result,
            "Exported observer"
        );
        result
    }

    fn write_context_structure(
        &self,
        session_id: SessionId,
        w: &mut ByteWriter,
        exported: &mut BTreeSet<ObjectId>,
    ) -> TransferResult {
        let Some(context) = self.contexts.get(&session_id) else {
            return TransferResult::Failed;
        };
        w.write_str(&context.name);
        w.write_u32(context.action_hints.bits());

        w.write_u32(context.filters.len() as u32);
        for slot in &context.filters {
            let mut payload = ByteWriter::new();
            slot.as_filter().export_binary(&mut payload);
            w.write_str(slot.tag().as_str());
            w.write_bytes(payload.as_slice());
        }

        let mut result = TransferResult::Complete;
        w.write_u32(context.subjects.len() as u32);
        for subject in &context.subjects {
            let Some(data) = self.objects.get(subject) else {
                w.write_u8(RECORD_REFERENCE);
                continue;
            };
            if !exported.insert(*subject) {
                w.write_u8(RECORD_REFERENCE);
                continue;
            }
            w.write_u8(RECORD_INLINE);
            FactoryData::new(data.type_tag.as_str(), data.name.as_str()).export_binary(w);
            if !self.can_recreate(&data.type_tag) {
                warn!(object = %subject, type_tag = %data.type_tag, "No factory for subject type, import will substitute a plain object");
                result = result.combine(TransferResult::Incomplete);
            }
            match self.context_of(*subject) {
                Some(hosted) => {
                    w.write_bool(true);
                    result = result.combine(self.write_context_structure(hosted, w, exported));
                }
                None => w.write_bool(false),
            }
            write_property_block(w, &data.properties, PropertyTypes::ALL, &data.name);
        }
        debug!(session_id, subjects = context.subjects.len(), "Wrote context structure");
        result
    }

    /// Import a stream produced by [`export_observer_binary`](Self::export_observer_binary)
    /// into the context `session_id`.
    ///
    /// On failure every object created by the import is destroyed again and
    /// the receiving context and its host are put back as they were.
    #[instrument(skip(self, r))]
    pub fn import_observer_binary(&mut self, r: &mut ByteReader<'_>, session_id: SessionId) -> TransferResult {
        let Some(mut journal) = ImportJournal::open(self, session_id) else {
            error!(session_id, "Only contexts hosted by an object can be imported into");
            return TransferResult::Failed;
        };
        let host = journal.host;

        let mut table = match RelationalTable::import_binary(r) {
            Ok(table) => table,
            Err(e) => {
                error!(error = %e, "Failed to read relational table");
                return TransferResult::Failed;
            }
        };
        if self.transfer.verbose_tables {
            table.dump();
        }
        let root = match FactoryData::import_binary(r) {
            Ok(root) => root,
            Err(e) => {
                error!(error = %e, "Failed to read root factory data");
                return TransferResult::Failed;
            }
        };
        if let Some(data) = self.objects.get_mut(&host) {
            if data.attached_contexts().is_empty() {
                data.name = root.instance_name.clone();
            }
        }

        let mut result = match self.read_context_structure(r, session_id, &mut journal) {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Failed to read context structure");
                self.roll_back_import(journal);
                return TransferResult::Failed;
            }
        };
        match read_property_block(r) {
            Ok(block) => {
                if !block.has_visitor_id() {
                    warn!(object = %host, "No visitor id property found on imported root");
                }
                if let Some(data) = self.objects.get_mut(&host) {
                    let observer = block.apply_shared_to(&mut data.properties);
                    journal.stage(host, observer);
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to read root property block");
                self.roll_back_import(journal);
                return TransferResult::Failed;
            }
        }
        result = result.combine(self.install_imported_filters(&mut journal));

        let mut imported = journal.created.clone();
        imported.push(host);
        let staged = std::mem::take(&mut journal.staged);
        match self.construct_staged_relationships(&imported, &mut table, staged) {
            Ok(report) => {
                if !report.is_complete() {
                    warn!(?report, "Imported relationships are incomplete");
                    result = result.combine(TransferResult::Incomplete);
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to construct relationships");
                self.remove_relational_properties(&imported);
                self.roll_back_import(journal);
                return TransferResult::Failed;
            }
        }

        if self.transfer.cross_check_import {
            match RelationalTable::build(self, session_id, TableMode::Verify) {
                Ok(rebuilt) => {
                    if let Err(reason) = table.compare(&rebuilt) {
                        warn!(reason = %reason, "Imported tree differs from the streamed table");
                        result = result.combine(TransferResult::Incomplete);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Could not rebuild table for cross-check");
                    result = result.combine(TransferResult::Incomplete);
                }
            }
        }
        self.remove_relational_properties(&imported);

        info!(session_id, objects = journal.created.len(), ?result, "Imported observer");
        result
    }

    fn read_context_structure(
        &mut self,
        r: &mut ByteReader<'_>,
        session_id: SessionId,
        journal: &mut ImportJournal,
    ) -> Result<TransferResult, CodecError> {
        let name = r.read_string()?;
        let hints = ActionHints::from_bits_truncate(r.read_u32()?);
        if let Some(context) = self.contexts.get_mut(&session_id) {
            context.name = name;
            context.action_hints = hints;
        }

        let mut result = TransferResult::Complete;
        let filter_count = r.read_count(MIN_FILTER_LEN)?;
        for _ in 0..filter_count {
            let tag = FilterTag::parse(&r.read_string()?);
            let payload = r.read_bytes()?;
            let Some(mut slot) = self.factories.create_filter(&tag) else {
                warn!(tag = %tag, "No factory for subject filter, skipping it");
                result = result.combine(TransferResult::Incomplete);
                continue;
            };
            slot.as_filter_mut()
                .import_binary(&mut ByteReader::new(&payload))?;
            // the receiving context only gets its filters once the whole stream has been read
            if session_id == journal.target {
                journal.filters.push(slot);
                continue;
            }
            let installed = self
                .contexts
                .get_mut(&session_id)
                .is_some_and(|c| c.install_filter(slot));
            if !installed {
                warn!(tag = %tag, session_id, "Context already has subjects, filter not installed");
                result = result.combine(TransferResult::Incomplete);
            }
        }

        let subject_count = r.read_count(1)?;
        for _ in 0..subject_count {
            match r.read_u8()? {
                RECORD_REFERENCE => continue,
                RECORD_INLINE => {}
                other => return Err(CodecError::UnknownRecordKind(other)),
            }
            let factory = FactoryData::import_binary(r)?;
            let object = match self.factories.object_factory(&factory.tag) {
                Some(f) => f.create(self, &factory.instance_name),
                None => {
                    warn!(type_tag = %factory.tag, name = %factory.instance_name, "No factory for type, creating a plain object");
                    result = result.combine(TransferResult::Incomplete);
                    self.create_object(factory.instance_name.as_str(), factory.tag.as_str())
                }
            };
            journal.created.push(object);

            if r.read_bool()? {
                let hosted = match self.context_of(object) {
                    Some(hosted) => hosted,
                    None => self.install_context(object, factory.instance_name.clone()),
                };
                result = result.combine(self.read_context_structure(r, hosted, journal)?);
            }

            let block = read_property_block(r)?;
            if !block.has_visitor_id() {
                warn!(object = %object, name = %factory.instance_name, "No visitor id property found in stream");
            }
            if let Some(data) = self.objects.get_mut(&object) {
                let observer = block.apply_shared_to(&mut data.properties);
                journal.stage(object, observer);
            }
        }
        Ok(result)
    }

    /// Install the filters read for the receiving context, recording what
    /// they displaced.
    fn install_imported_filters(&mut self, journal: &mut ImportJournal) -> TransferResult {
        let Some(context) = self.contexts.get_mut(&journal.target) else {
            warn!(session_id = journal.target, "Receiving context vanished, imported filters dropped");
            return TransferResult::Incomplete;
        };
        let mut result = TransferResult::Complete;
        for slot in journal.filters.drain(..) {
            let tag = slot.tag();
            if !context.subjects.is_empty() {
                warn!(tag = %tag, session_id = journal.target, "Context already has subjects, filter not installed");
                result = result.combine(TransferResult::Incomplete);
                continue;
            }
            match context.filters.iter().position(|f| f.tag() == tag) {
                Some(index) => {
                    let previous = std::mem::replace(&mut context.filters[index], slot);
                    journal.filter_changes.push(FilterChange::Replaced(index, previous));
                }
                None => {
                    context.filters.push(slot);
                    journal.filter_changes.push(FilterChange::Appended);
                }
            }
        }
        result
    }

    fn roll_back_import(&mut self, journal: ImportJournal) {
        for object in &journal.created {
            self.destroy_object(*object);
        }
        if let Some(context) = self.contexts.get_mut(&journal.target) {
            context.name = journal.context_name;
            context.action_hints = journal.action_hints;
            for change in journal.filter_changes.into_iter().rev() {
                match change {
                    FilterChange::Appended => {
                        context.filters.pop();
                    }
                    FilterChange::Replaced(index, previous) => {
                        if let Some(slot) = context.filters.get_mut(index) {
                            *slot = previous;
                        }
                    }
                }
            }
        }
        if let Some(data) = self.objects.get_mut(&journal.host) {
            data.name = journal.host_name;
            data.properties = journal.host_properties;
        }
        debug!(session_id = journal.target, "Rolled back failed import");
    }
}

/// Everything an import changes on the receiving side, kept until the import
/// is known to have succeeded.
struct ImportJournal {
    target: SessionId,
    host: ObjectId,
    context_name: String,
    action_hints: ActionHints,
    host_name: String,
    host_properties: PropertyStore,
    created: Vec<ObjectId>,
    /// Observer-scoped properties still keyed by the exporting session's ids
    staged: Vec<(ObjectId, ObserverProperty)>,
    /// Filters read for the receiving context, not yet installed
    filters: Vec<FilterSlot>,
    filter_changes: Vec<FilterChange>,
}

enum FilterChange {
    Appended,
    Replaced(usize, FilterSlot),
}

impl ImportJournal {
    fn open(manager: &ObjectManager, target: SessionId) -> Option<Self> {
        let context = manager.contexts.get(&target)?;
        let host = context.host?;
        let host_data = manager.objects.get(&host)?;
        Some(Self {
            target,
            host,
            context_name: context.name.clone(),
            action_hints: context.action_hints,
            host_name: host_data.name.clone(),
            host_properties: host_data.properties.clone(),
            created: Vec::new(),
            staged: Vec::new(),
            filters: Vec::new(),
            filter_changes: Vec::new(),
        })
    }

    fn stage(&mut self, object: ObjectId, properties: Vec<ObserverProperty>) {
        self.staged.extend(properties.into_iter().map(|p| (object, p)));
    }
}

fn verify_table_codec(table: &RelationalTable) -> Result<(), String> {
    let mut scratch = ByteWriter::new();
    table.export_binary(&mut scratch);
    let bytes = scratch.into_bytes();
    let readback = RelationalTable::import_binary(&mut ByteReader::new(&bytes)).map_err(|e| e.to_string())?;
    table.compare(&readback)
}
