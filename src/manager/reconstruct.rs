//! Rebuilding attachments and ownership from a relational table.

use super::ObjectManager;
use crate::error::RelationError;
use crate::object::Ownership;
use crate::property::ObserverProperty;
use crate::relational::RelationalTable;
use crate::types::{ObjectId, SessionId, VisitorId, INVALID_SESSION_ID};
use tracing::{debug, info, instrument, warn};

/// Outcome of [`ObjectManager::construct_relationships`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstructionReport {
    /// Attachments made
    pub attachments: usize,
    /// Objects whose parent entry has no live context, with the parent's visitor id
    pub unresolved_parents: Vec<(ObjectId, VisitorId)>,
    /// Attachments refused by the destination context
    pub rejected_attachments: Vec<(ObjectId, SessionId)>,
    /// `SpecificObserver` objects whose owner could not be found
    pub unresolved_owners: Vec<(ObjectId, VisitorId)>,
}

impl ConstructionReport {
    /// Every ownership relation was restored.
    pub fn is_success(&self) -> bool {
        self.unresolved_owners.is_empty()
    }

    /// Nothing at all was skipped.
    pub fn is_complete(&self) -> bool {
        self.is_success() && self.unresolved_parents.is_empty() && self.rejected_attachments.is_empty()
    }
}

/// How remapped observer-scoped properties land on their objects.
#[derive(Debug, Clone, Copy)]
enum StagedApply {
    /// The property was read from the object itself
    Replace,
    /// The property came from a stream and joins the object's own values
    Merge,
}

impl ObjectManager {
    /// Re-establish the attachments and ownership described by `table` among
    /// freshly imported `objects`.
    ///
    /// Observer-scoped property keys are translated from the exporting
    /// session's ids to the live ones first. Notifications on every context
    /// hosted by `objects` stay suppressed until the pass is over.
    #[instrument(skip(self, objects, table), fields(objects = objects.len(), entries = table.len()))]
    pub fn construct_relationships(
        &mut self,
        objects: &[ObjectId],
        table: &mut RelationalTable,
    ) -> Result<ConstructionReport, RelationError> {
        table.compare_objects(self, objects)?;
        let staged: Vec<(ObjectId, ObserverProperty)> = objects
            .iter()
            .filter_map(|o| self.objects.get(o).map(|d| (*o, d)))
            .flat_map(|(o, d)| {
                d.properties
                    .exportable_observer()
                    .into_iter()
                    .map(move |p| (o, p.clone()))
            })
            .collect();
        self.rebuild_relationships(objects, table, staged, StagedApply::Replace)
    }

    /// Same as [`construct_relationships`](Self::construct_relationships), but
    /// only the observer-scoped properties in `staged` are remapped. They are
    /// merged into whatever the objects already hold, so live keys on a
    /// pre-existing host are left alone.
    pub(crate) fn construct_staged_relationships(
        &mut self,
        objects: &[ObjectId],
        table: &mut RelationalTable,
        staged: Vec<(ObjectId, ObserverProperty)>,
    ) -> Result<ConstructionReport, RelationError> {
        table.compare_objects(self, objects)?;
        self.rebuild_relationships(objects, table, staged, StagedApply::Merge)
    }

    fn rebuild_relationships(
        &mut self,
        objects: &[ObjectId],
        table: &mut RelationalTable,
        staged: Vec<(ObjectId, ObserverProperty)>,
        apply: StagedApply,
    ) -> Result<ConstructionReport, RelationError> {
        let contexts = self.observer_list(objects);
        let mut manager = self.suppress_notifications(&contexts);

        let visitors: Vec<(ObjectId, VisitorId)> = objects
            .iter()
            .filter_map(|o| manager.object(*o).and_then(|d| d.visitor_id()).map(|v| (*o, v)))
            .collect();

        for (object, visitor_id) in &visitors {
            let live = manager.context_of(*object);
            if let Some(entry) = table.entry_mut(*visitor_id) {
                match live {
                    Some(session_id) => {
                        entry.previous_session_id = entry.session_id;
                        entry.session_id = session_id;
                    }
                    None => {
                        entry.previous_session_id = INVALID_SESSION_ID;
                        entry.session_id = INVALID_SESSION_ID;
                    }
                }
            }
        }

        // every key resolves before anything is written back
        let remapped = staged
            .iter()
            .map(|(object, property)| {
                property
                    .remap_contexts(|key| table.resolve_session(key))
                    .map(|p| (*object, p))
            })
            .collect::<Result<Vec<_>, _>>()?;
        for (object, property) in remapped {
            if let Some(data) = manager.object_mut(object) {
                match apply {
                    StagedApply::Replace => {
                        data.properties.set_observer(property);
                    }
                    StagedApply::Merge => data.properties.merge_observer(property),
                }
            }
        }
        table.retire_previous_session_ids();

        let mut report = ConstructionReport::default();
        for (object, visitor_id) in &visitors {
            let parents = table
                .entry(*visitor_id)
                .map(|e| e.parents.clone())
                .unwrap_or_default();
            for parent in parents {
                let Some(session_id) = table
                    .entry(parent)
                    .map(|e| e.session_id)
                    .filter(|s| *s != INVALID_SESSION_ID && manager.observer_reference(*s).is_some())
                else {
                    warn!(object = %object, parent, "Parent context of object could not be resolved");
                    report.unresolved_parents.push((*object, parent));
                    continue;
                };
                if manager
                    .observer_reference(session_id)
                    .is_some_and(|c| c.contains(*object))
                {
                    continue;
                }
                match manager.attach_subject(session_id, *object, Ownership::Manual) {
                    Ok(()) => report.attachments += 1,
                    Err(e) => {
                        warn!(object = %object, context = session_id, error = %e, "Context refused imported subject");
                        report.rejected_attachments.push((*object, session_id));
                    }
                }
            }
        }

        for (object, visitor_id) in &visitors {
            let Some(entry) = table.entry(*visitor_id) else {
                continue;
            };
            match entry.ownership {
                Ownership::SpecificObserver => {
                    let owner = table
                        .entry(entry.parent_visitor_id)
                        .map(|e| e.session_id)
                        .filter(|s| *s != INVALID_SESSION_ID && manager.observer_reference(*s).is_some());
                    match owner {
                        Some(session_id) => {
                            if let Some(data) = manager.object_mut(*object) {
                                data.set_ownership(Ownership::SpecificObserver, session_id);
                            }
                        }
                        // the exported root may be owned by a context outside the export
                        None if entry.parents.is_empty() => {
                            debug!(object = %object, "Root object owner lies outside the table");
                            if let Some(data) = manager.object_mut(*object) {
                                data.set_ownership(Ownership::SpecificObserver, INVALID_SESSION_ID);
                            }
                        }
                        None => {
                            warn!(object = %object, owner = entry.parent_visitor_id, "Owner of object could not be resolved");
                            report.unresolved_owners.push((*object, entry.parent_visitor_id));
                        }
                    }
                }
                kind => {
                    if let Some(data) = manager.object_mut(*object) {
                        data.set_ownership(kind, INVALID_SESSION_ID);
                    }
                }
            }
        }
        drop(manager);

        debug!(?report, "Relationship construction finished");
        info!(
            attachments = report.attachments,
            complete = report.is_complete(),
            "Reconstructed relationships"
        );
        Ok(report)
    }
}
