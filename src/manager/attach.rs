//! Attachment, detachment, moves and object destruction.

use super::ObjectManager;
use crate::error::ObserverError;
use crate::object::{ObjectData, Ownership};
use crate::observer::{Evaluation, FilterContext, FilterSlot, FilterView, ObserverEvent};
use crate::property::PropertyKey;
use crate::types::{ObjectId, SessionId, GLOBAL_POOL_ID, INVALID_SESSION_ID};
use tracing::{debug, error, instrument, warn};

impl ObjectManager {
    pub(crate) fn filter_view(&self, session_id: SessionId) -> Option<FilterView<'_>> {
        let context = self.contexts.get(&session_id)?;
        Some(FilterView {
            context,
            contexts: &self.contexts,
            objects: &self.objects,
            resolver: self.resolver.as_deref(),
        })
    }

    /// Run `f` with the filters of `session_id` and a mutable filter view.
    pub(crate) fn with_filter_context<R>(
        &mut self,
        session_id: SessionId,
        f: impl FnOnce(&[FilterSlot], &mut FilterContext<'_>) -> R,
    ) -> Option<R> {
        let ObjectManager {
            objects,
            contexts,
            resolver,
            ..
        } = self;
        let context = contexts.get(&session_id)?;
        let mut cx = FilterContext {
            context,
            contexts: &*contexts,
            objects,
            resolver: resolver.as_deref(),
        };
        Some(f(&context.filters, &mut cx))
    }

    /// Ask `session_id` whether it would accept `object`.
    pub fn can_attach(&self, session_id: SessionId, object: ObjectId) -> Evaluation {
        let Some(view) = self.filter_view(session_id) else {
            return Evaluation::Rejected;
        };
        if !self.objects.contains_key(&object)
            || view.context.contains(object)
            || view.context.host == Some(object)
        {
            return Evaluation::Rejected;
        }
        view.context
            .filters
            .iter()
            .fold(Evaluation::Allowed, |verdict, slot| {
                verdict.merge(slot.as_filter().evaluate_attachment(&view, object))
            })
    }

    /// Attach `object` to `session_id` with the requested ownership.
    ///
    /// `Manual` keeps whatever ownership the object already has, and
    /// `ObserverScope` only upgrades `Manual`.
    #[instrument(skip(self), level = "debug")]
    pub fn attach_subject(
        &mut self,
        session_id: SessionId,
        object: ObjectId,
        ownership: Ownership,
    ) -> Result<(), ObserverError> {
        let context = self
            .contexts
            .get(&session_id)
            .ok_or(ObserverError::ContextNotFound(session_id))?;
        let data = self
            .objects
            .get(&object)
            .ok_or(ObserverError::ObjectNotFound(object))?;
        if context.contains(object) {
            return Err(ObserverError::AlreadyAttached {
                object,
                context: session_id,
            });
        }
        if ownership == Ownership::SpecificObserver && data.ownership() == Ownership::SpecificObserver {
            let owner = data.observer_parent();
            if owner != session_id && data.is_attached_to(owner) {
                return Err(ObserverError::OwnershipConflict { object, owner });
            }
        }

        let evaluation = self.can_attach(session_id, object);
        if evaluation == Evaluation::Rejected {
            return Err(ObserverError::RejectedByPolicy {
                object,
                context: session_id,
                reason: "rejected by subject filter".to_string(),
            });
        }

        let initialized = self
            .with_filter_context(session_id, |filters, cx| {
                let mut ok = true;
                for slot in filters {
                    if !slot.as_filter().initialize_attachment(cx, object) {
                        ok = false;
                    }
                }
                if !ok {
                    for slot in filters {
                        slot.as_filter().finalize_attachment(cx, object, false);
                    }
                }
                ok
            })
            .unwrap_or(false);
        if !initialized {
            return Err(if evaluation == Evaluation::Conditional {
                ObserverError::ConflictRequiresResolution {
                    object,
                    context: session_id,
                }
            } else {
                ObserverError::RejectedByPolicy {
                    object,
                    context: session_id,
                    reason: "subject filter could not prepare the object".to_string(),
                }
            });
        }

        let subject_id = match self.contexts.get_mut(&session_id) {
            Some(context) => {
                context.subjects.push(object);
                context.allocate_subject_id()
            }
            None => return Err(ObserverError::ContextNotFound(session_id)),
        };
        if let Some(data) = self.objects.get_mut(&object) {
            data.properties
                .set_observer_value(PropertyKey::SubjectIds, session_id, subject_id);
            apply_attach_ownership(data, session_id, ownership);
        }
        self.with_filter_context(session_id, |filters, cx| {
            for slot in filters {
                slot.as_filter().finalize_attachment(cx, object, true);
            }
        });

        debug!(object = %object, context = session_id, ?ownership, "Attached subject");
        self.emit(ObserverEvent::SubjectAttached {
            context: session_id,
            object,
        });
        if session_id != GLOBAL_POOL_ID {
            self.set_modified(session_id, true);
        }
        Ok(())
    }

    /// Attach several objects inside one validation cycle, so a conflict
    /// decision marked "apply to all" is reused for the rest of the batch.
    pub fn attach_subjects(
        &mut self,
        session_id: SessionId,
        objects: &[ObjectId],
        ownership: Ownership,
    ) -> Vec<Result<(), ObserverError>> {
        self.start_validation_cycle(session_id);
        let results = objects
            .iter()
            .map(|object| self.attach_subject(session_id, *object, ownership))
            .collect();
        self.end_validation_cycle(session_id);
        results
    }

    pub fn start_validation_cycle(&self, session_id: SessionId) {
        if let Some(context) = self.contexts.get(&session_id) {
            for slot in &context.filters {
                slot.as_filter().start_validation_cycle();
            }
        }
    }

    pub fn end_validation_cycle(&self, session_id: SessionId) {
        if let Some(context) = self.contexts.get(&session_id) {
            for slot in &context.filters {
                slot.as_filter().end_validation_cycle();
            }
        }
    }

    /// Delegate the lifetime of `object` to `owner`.
    pub fn set_owning_subject(&mut self, object: ObjectId, owner: ObjectId) -> Result<(), ObserverError> {
        if !self.objects.contains_key(&owner) {
            return Err(ObserverError::ObjectNotFound(owner));
        }
        let data = self
            .objects
            .get_mut(&object)
            .ok_or(ObserverError::ObjectNotFound(object))?;
        data.owned_by = Some(owner);
        data.set_ownership(Ownership::OwnedBySubject, INVALID_SESSION_ID);
        Ok(())
    }

    /// Ask `session_id` whether `object` may be detached.
    pub fn can_detach(&self, session_id: SessionId, object: ObjectId) -> Evaluation {
        let Some(view) = self.filter_view(session_id) else {
            return Evaluation::Rejected;
        };
        let Some(data) = self.objects.get(&object) else {
            return Evaluation::Rejected;
        };
        if !view.context.contains(object) {
            return Evaluation::Rejected;
        }
        let verdict = view
            .context
            .filters
            .iter()
            .fold(Evaluation::Allowed, |verdict, slot| {
                verdict.merge(slot.as_filter().evaluate_detachment(&view, object))
            });
        if verdict == Evaluation::Rejected {
            return Evaluation::Rejected;
        }
        match data.ownership() {
            Ownership::SpecificObserver if data.observer_parent() == session_id => {
                Evaluation::IsParentObserver
            }
            Ownership::ObserverScope
                if data.attached_contexts().iter().all(|c| *c == session_id) =>
            {
                Evaluation::LastScopedObserver
            }
            _ => verdict,
        }
    }

    /// Detach `object` from `session_id`, destroying it if its ownership says so.
    #[instrument(skip(self), level = "debug")]
    pub fn detach_subject(&mut self, session_id: SessionId, object: ObjectId) -> Result<(), ObserverError> {
        let context = self
            .contexts
            .get(&session_id)
            .ok_or(ObserverError::ContextNotFound(session_id))?;
        if !self.objects.contains_key(&object) {
            return Err(ObserverError::ObjectNotFound(object));
        }
        if !context.contains(object) {
            return Err(ObserverError::NotAttached {
                object,
                context: session_id,
            });
        }
        match self.can_detach(session_id, object) {
            Evaluation::Rejected => Err(ObserverError::RejectedByPolicy {
                object,
                context: session_id,
                reason: "detachment rejected by subject filter".to_string(),
            }),
            Evaluation::IsParentObserver => Err(ObserverError::IsParentObserver {
                object,
                context: session_id,
            }),
            _ => {
                if self.detach_internal(session_id, object, false) {
                    debug!(object = %object, context = session_id, "Destroying subject after detach");
                    self.destroy_object(object);
                }
                Ok(())
            }
        }
    }

    /// Remove `object` from `session_id` without evaluating filters.
    ///
    /// Returns true when ownership requires the object to be destroyed.
    fn detach_internal(&mut self, session_id: SessionId, object: ObjectId, subject_deleted: bool) -> bool {
        let Some(context) = self.contexts.get_mut(&session_id) else {
            return false;
        };
        context.subjects.retain(|s| *s != object);
        if let Some(data) = self.objects.get_mut(&object) {
            data.properties
                .remove_observer_value(&PropertyKey::SubjectIds, session_id);
        }
        self.with_filter_context(session_id, |filters, cx| {
            for slot in filters {
                slot.as_filter()
                    .finalize_detachment(cx, object, true, subject_deleted);
            }
        });
        if let Some(data) = self.objects.get_mut(&object) {
            data.properties
                .remove_observer_value(&PropertyKey::InstanceNames, session_id);
        }

        self.emit(ObserverEvent::SubjectDetached {
            context: session_id,
            object,
        });
        if session_id != GLOBAL_POOL_ID {
            self.set_modified(session_id, true);
        }

        if subject_deleted {
            return false;
        }
        match self.objects.get(&object) {
            Some(data) => match data.ownership() {
                Ownership::ObserverScope => data.attached_contexts().is_empty(),
                Ownership::SpecificObserver => data.observer_parent() == session_id,
                _ => false,
            },
            None => false,
        }
    }

    /// Move `objects` from `source` to `destination`, one at a time.
    ///
    /// Stops at the first object that cannot be moved; objects moved before it
    /// stay moved.
    #[instrument(skip(self, objects), fields(count = objects.len()))]
    pub fn move_subjects(
        &mut self,
        objects: &[ObjectId],
        source: SessionId,
        destination: SessionId,
    ) -> Result<(), ObserverError> {
        for session_id in [source, destination] {
            if !self.contexts.contains_key(&session_id) {
                return Err(ObserverError::ContextNotFound(session_id));
            }
        }

        for &object in objects {
            if self.can_attach(destination, object) == Evaluation::Rejected {
                error!(object = %object, destination, "Destination context rejected the subject");
                return Err(ObserverError::RejectedByPolicy {
                    object,
                    context: destination,
                    reason: "destination rejected subject".to_string(),
                });
            }

            match self.can_detach(source, object) {
                Evaluation::Rejected => {
                    error!(object = %object, source, "Source context refused to detach the subject");
                    return Err(ObserverError::RejectedByPolicy {
                        object,
                        context: source,
                        reason: "source refused detachment".to_string(),
                    });
                }
                Evaluation::IsParentObserver => {
                    error!(object = %object, source, "Source context owns the subject");
                    return Err(ObserverError::IsParentObserver {
                        object,
                        context: source,
                    });
                }
                Evaluation::LastScopedObserver => {
                    // keep the object alive between the two contexts
                    self.set_ownership_kind(object, Ownership::Manual);
                    if let Err(e) = self.detach_subject(source, object) {
                        self.set_ownership_kind(object, Ownership::ObserverScope);
                        return Err(e);
                    }
                    if let Err(e) = self.attach_subject(destination, object, Ownership::ObserverScope) {
                        self.restore_subject(source, object, Ownership::ObserverScope);
                        return Err(e);
                    }
                }
                _ => {
                    let previous = self
                        .objects
                        .get(&object)
                        .map(ObjectData::ownership)
                        .unwrap_or_default();
                    self.detach_subject(source, object)?;
                    if let Err(e) = self.attach_subject(destination, object, Ownership::Manual) {
                        let restore = if previous == Ownership::ObserverScope {
                            Ownership::ObserverScope
                        } else {
                            Ownership::Manual
                        };
                        self.restore_subject(source, object, restore);
                        return Err(e);
                    }
                }
            }
            debug!(object = %object, source, destination, "Moved subject");
        }
        Ok(())
    }

    fn set_ownership_kind(&mut self, object: ObjectId, ownership: Ownership) {
        if let Some(data) = self.objects.get_mut(&object) {
            data.set_ownership(ownership, INVALID_SESSION_ID);
        }
    }

    fn restore_subject(&mut self, session_id: SessionId, object: ObjectId, ownership: Ownership) {
        if let Err(e) = self.attach_subject(session_id, object, ownership) {
            warn!(object = %object, context = session_id, error = %e, "Could not return subject to its source context");
        }
    }

    /// Destroy `object`, tearing down the context it hosts and cascading to
    /// structural children, scope-owned subjects and subject-owned dependents.
    pub fn destroy_object(&mut self, object: ObjectId) -> bool {
        if !self.objects.contains_key(&object) {
            return false;
        }
        let mut queue = vec![object];
        while let Some(id) = queue.pop() {
            let Some(data) = self.objects.get(&id) else {
                continue;
            };
            let hosted = data.observer;
            let attached = data.attached_contexts();
            let children = data.children.clone();
            let parent = data.parent;

            if let Some(session_id) = hosted {
                queue.extend(self.teardown_context(session_id));
            }
            for session_id in attached {
                self.detach_internal(session_id, id, true);
            }
            queue.extend(children);
            queue.extend(
                self.objects
                    .values()
                    .filter(|o| o.owned_by == Some(id) && o.ownership() == Ownership::OwnedBySubject)
                    .map(|o| o.id),
            );

            if let Some(parent) = parent.and_then(|p| self.objects.get_mut(&p)) {
                parent.children.retain(|c| *c != id);
            }
            self.objects.remove(&id);
            for active in self.meta_types.values_mut() {
                active.retain(|o| *o != id);
            }
            debug!(object = %id, "Destroyed object");
            self.emit(ObserverEvent::ObjectDestroyed { object: id });
        }
        true
    }

    /// Destroy the host of `session_id`, which tears the context down.
    pub fn destroy_observer(&mut self, session_id: SessionId) -> bool {
        match self.contexts.get(&session_id).and_then(|c| c.host) {
            Some(host) => self.destroy_object(host),
            None => false,
        }
    }

    /// Detach every subject and unregister the context. Returns the subjects
    /// whose ownership requires them to be destroyed.
    fn teardown_context(&mut self, session_id: SessionId) -> Vec<ObjectId> {
        if session_id == GLOBAL_POOL_ID {
            return Vec::new();
        }
        let subjects = self
            .contexts
            .get(&session_id)
            .map(|c| c.subjects.clone())
            .unwrap_or_default();
        let mut doomed = Vec::new();
        for subject in subjects {
            if self.detach_internal(session_id, subject, false) {
                doomed.push(subject);
            }
        }
        if let Some(context) = self.contexts.remove(&session_id) {
            if let Some(host) = context.host.and_then(|h| self.objects.get_mut(&h)) {
                if host.observer == Some(session_id) {
                    host.observer = None;
                }
            }
        }
        debug!(session_id, destroyed = doomed.len(), "Observer context torn down");
        doomed
    }
}

fn apply_attach_ownership(data: &mut ObjectData, session_id: SessionId, requested: Ownership) {
    match requested {
        Ownership::Manual => {
            if !data.has_ownership() {
                data.set_ownership(Ownership::Manual, INVALID_SESSION_ID);
            }
        }
        Ownership::ObserverScope => {
            if !data.has_ownership() || data.ownership() == Ownership::Manual {
                data.set_ownership(Ownership::ObserverScope, INVALID_SESSION_ID);
            }
        }
        Ownership::SpecificObserver => data.set_ownership(Ownership::SpecificObserver, session_id),
        Ownership::OwnedBySubject => data.set_ownership(Ownership::OwnedBySubject, INVALID_SESSION_ID),
    }
}
