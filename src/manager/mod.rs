//! Object Manager
//!
//! Owns every object and observer context, assigns session ids, keeps the
//! global object pool and the factory registry, and implements the export,
//! import and reconstruction algorithms on top of them.
//!
//! Objects and contexts live in two arenas keyed by [`ObjectId`] and
//! [`SessionId`]. A context is always hosted by an object, except the global
//! pool. Subject filters are handed split borrows of both arenas.

mod attach;
mod notify;
mod properties;
mod reconstruct;
mod transfer;

pub use notify::NotificationSuppression;
pub use reconstruct::ConstructionReport;
pub use transfer::TransferResult;

use crate::config::{ObsGraphConfig, TransferConfig};
use crate::error::ObserverError;
use crate::factory::{FactoryRegistry, ObjectFactory, OBSERVER_FACTORY_TAG};
use crate::object::ObjectData;
use crate::observer::filter::{ContextArena, ObjectArena};
use crate::observer::{ConflictResolver, ObserverContext, ObserverEvent};
use crate::types::{ContextHandle, ObjectId, SessionId, GLOBAL_POOL_ID};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

const GLOBAL_POOL_NAME: &str = "Global Object Pool";

pub struct ObjectManager {
    pub(crate) objects: ObjectArena,
    pub(crate) contexts: ContextArena,
    next_object_id: u64,
    next_session_id: SessionId,
    factories: FactoryRegistry,
    pub(crate) resolver: Option<Box<dyn ConflictResolver>>,
    events: Vec<ObserverEvent>,
    meta_types: BTreeMap<String, Vec<ObjectId>>,
    transfer: TransferConfig,
}

impl fmt::Debug for ObjectManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectManager")
            .field("objects", &self.objects.len())
            .field("contexts", &self.contexts.len())
            .field("factories", &self.factories)
            .field("pending_events", &self.events.len())
            .finish()
    }
}

impl Default for ObjectManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectManager {
    pub fn new() -> Self {
        Self::with_parts(FactoryRegistry::default(), TransferConfig::default())
    }

    /// Manager whose naming filter factory and transfer checks follow `config`.
    pub fn from_config(config: &ObsGraphConfig) -> Self {
        Self::with_parts(
            FactoryRegistry::with_builtins(config.naming.filter()),
            config.transfer.clone(),
        )
    }

    pub fn with_parts(factories: FactoryRegistry, transfer: TransferConfig) -> Self {
        let mut contexts = ContextArena::new();
        contexts.insert(
            GLOBAL_POOL_ID,
            ObserverContext::new(GLOBAL_POOL_ID, GLOBAL_POOL_NAME, None),
        );
        Self {
            objects: ObjectArena::new(),
            contexts,
            next_object_id: 1,
            next_session_id: GLOBAL_POOL_ID + 1,
            factories,
            resolver: None,
            events: Vec::new(),
            meta_types: BTreeMap::new(),
            transfer,
        }
    }

    pub fn transfer_config(&self) -> &TransferConfig {
        &self.transfer
    }

    pub fn set_transfer_config(&mut self, transfer: TransferConfig) {
        self.transfer = transfer;
    }

    // Objects

    pub fn create_object(&mut self, name: impl Into<String>, type_tag: impl Into<String>) -> ObjectId {
        let id = ObjectId(self.next_object_id);
        self.next_object_id += 1;
        self.objects.insert(id, ObjectData::new(id, name, type_tag));
        id
    }

    pub fn object(&self, id: ObjectId) -> Option<&ObjectData> {
        self.objects.get(&id)
    }

    /// Direct access to an object. Changes made here bypass subject filters.
    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut ObjectData> {
        self.objects.get_mut(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectData> {
        self.objects.values()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn contains_object(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    /// Make `child` a structural child of `parent`, detaching it from any previous parent.
    pub fn add_child(&mut self, parent: ObjectId, child: ObjectId) -> Result<(), ObserverError> {
        if !self.objects.contains_key(&parent) {
            return Err(ObserverError::ObjectNotFound(parent));
        }
        let previous = self
            .objects
            .get(&child)
            .ok_or(ObserverError::ObjectNotFound(child))?
            .parent;
        if let Some(previous) = previous {
            if let Some(old) = self.objects.get_mut(&previous) {
                old.children.retain(|c| *c != child);
            }
        }
        if let Some(data) = self.objects.get_mut(&child) {
            data.parent = Some(parent);
        }
        if let Some(data) = self.objects.get_mut(&parent) {
            data.children.push(child);
        }
        Ok(())
    }

    // Contexts

    /// Create a host object of type `Observer` together with its context.
    pub fn create_observer(&mut self, name: impl Into<String>) -> (SessionId, ObjectId) {
        let name = name.into();
        let host = self.create_object(name.as_str(), OBSERVER_FACTORY_TAG);
        let session_id = self.install_context(host, name);
        (session_id, host)
    }

    /// Register a new context hosted by `host` and return its session id.
    pub fn register_observer(
        &mut self,
        host: ObjectId,
        name: impl Into<String>,
    ) -> Result<SessionId, ObserverError> {
        let data = self
            .objects
            .get(&host)
            .ok_or(ObserverError::ObjectNotFound(host))?;
        if data.observer.is_some() {
            return Err(ObserverError::AlreadyHostsContext(host));
        }
        Ok(self.install_context(host, name.into()))
    }

    fn install_context(&mut self, host: ObjectId, name: String) -> SessionId {
        let session_id = self.next_session_id;
        self.next_session_id += 1;
        if let Some(data) = self.objects.get_mut(&host) {
            data.observer = Some(session_id);
        }
        debug!(session_id, host = %host, name = %name, "Registered observer context");
        self.contexts
            .insert(session_id, ObserverContext::new(session_id, name, Some(host)));
        session_id
    }

    /// Context registered under `session_id`, if it still exists.
    pub fn observer_reference(&self, session_id: SessionId) -> Option<&ObserverContext> {
        self.contexts.get(&session_id)
    }

    pub fn observer_mut(&mut self, session_id: SessionId) -> Option<&mut ObserverContext> {
        self.contexts.get_mut(&session_id)
    }

    pub fn context_handle(&self, session_id: SessionId) -> Option<ContextHandle> {
        self.contexts.get(&session_id).map(ObserverContext::handle)
    }

    /// Resolve a weak handle; `None` once the context has been torn down.
    pub fn context(&self, handle: ContextHandle) -> Option<&ObserverContext> {
        self.contexts.get(&handle.session_id())
    }

    pub fn contexts(&self) -> impl Iterator<Item = &ObserverContext> {
        self.contexts.values()
    }

    /// Context hosted by `object`, directly or through one of its structural children.
    pub fn context_of(&self, object: ObjectId) -> Option<SessionId> {
        let data = self.objects.get(&object)?;
        data.observer.or_else(|| {
            data.children
                .iter()
                .find_map(|child| self.objects.get(child).and_then(|c| c.observer))
        })
    }

    /// Contexts hosted by any of `objects`, in order and without duplicates.
    pub fn observer_list(&self, objects: &[ObjectId]) -> Vec<SessionId> {
        let mut seen = BTreeSet::new();
        objects
            .iter()
            .filter_map(|o| self.context_of(*o))
            .filter(|s| seen.insert(*s))
            .collect()
    }

    pub fn global_pool(&self) -> Option<&ObserverContext> {
        self.contexts.get(&GLOBAL_POOL_ID)
    }

    /// Register an object with the global pool.
    pub fn register_object(&mut self, object: ObjectId) -> Result<(), ObserverError> {
        self.attach_subject(GLOBAL_POOL_ID, object, crate::object::Ownership::Manual)?;
        info!(object = %object, "Registered object with the global pool");
        self.emit(ObserverEvent::ObjectRegistered { object });
        Ok(())
    }

    /// Objects of type `type_tag` registered with the global pool.
    pub fn registered_interfaces(&self, type_tag: &str) -> Vec<ObjectId> {
        let Some(pool) = self.global_pool() else {
            return Vec::new();
        };
        pool.subjects()
            .iter()
            .filter(|id| self.objects.get(id).is_some_and(|o| o.type_tag == type_tag))
            .copied()
            .collect()
    }

    // Meta types

    pub fn set_meta_type_active_objects(&mut self, type_tag: impl Into<String>, objects: Vec<ObjectId>) {
        let type_tag = type_tag.into();
        self.meta_types.insert(type_tag.clone(), objects);
        self.emit(ObserverEvent::MetaTypeActiveObjectsChanged { type_tag });
    }

    pub fn meta_type_active_objects(&self, type_tag: &str) -> &[ObjectId] {
        self.meta_types
            .get(type_tag)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    // Factories

    pub fn factories(&self) -> &FactoryRegistry {
        &self.factories
    }

    pub fn factories_mut(&mut self) -> &mut FactoryRegistry {
        &mut self.factories
    }

    /// Register an object factory. The first registration for a tag wins.
    pub fn register_factory(&mut self, tag: impl Into<String>, factory: impl ObjectFactory + 'static) -> bool {
        self.factories.register_object_factory(tag, factory)
    }

    pub fn factory_reference(&self, tag: &str) -> Option<Arc<dyn ObjectFactory>> {
        self.factories.object_factory(tag)
    }

    /// True if the first subject type filter on `session_id` knows `type_tag`.
    pub fn is_supported_type(&self, type_tag: &str, session_id: SessionId) -> bool {
        self.contexts
            .get(&session_id)
            .and_then(ObserverContext::subject_type_filter)
            .is_some_and(|f| f.is_known_type(type_tag))
    }

    /// True if objects of this type can be recreated on import.
    pub fn can_recreate(&self, type_tag: &str) -> bool {
        self.factories.has_object_factory(type_tag)
    }

    // Conflict resolution

    pub fn set_conflict_resolver(&mut self, resolver: impl ConflictResolver + 'static) {
        self.resolver = Some(Box::new(resolver));
    }

    pub fn clear_conflict_resolver(&mut self) {
        self.resolver = None;
    }

    // Events

    /// Queue an event unless it belongs to a context with notifications suppressed.
    pub(crate) fn emit(&mut self, event: ObserverEvent) {
        let context = match &event {
            ObserverEvent::SubjectAttached { context, .. }
            | ObserverEvent::SubjectDetached { context, .. }
            | ObserverEvent::PropertyChanged { context, .. }
            | ObserverEvent::ModificationChanged { context, .. } => Some(*context),
            _ => None,
        };
        if let Some(context) = context.and_then(|c| self.contexts.get(&c)) {
            if !context.event_filtering_enabled() {
                return;
            }
        }
        self.events.push(event);
    }

    pub fn pending_events(&self) -> &[ObserverEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<ObserverEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn set_modified(&mut self, session_id: SessionId, modified: bool) {
        let Some(context) = self.contexts.get_mut(&session_id) else {
            return;
        };
        if context.modified == modified {
            return;
        }
        context.modified = modified;
        self.emit(ObserverEvent::ModificationChanged {
            context: session_id,
            modified,
        });
    }
}
