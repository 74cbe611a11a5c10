//! Subject filter trait and the borrowed view filters operate through.

use crate::codec::{ByteReader, ByteWriter};
use crate::error::CodecError;
use crate::object::ObjectData;
use crate::observer::naming::{ConflictResolver, NamingPolicyFilter};
use crate::observer::subject_type::SubjectTypeFilter;
use crate::observer::{Evaluation, ObserverContext};
use crate::property::PropertyKey;
use crate::types::{ObjectId, SessionId};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Arena of every object owned by a manager.
pub(crate) type ObjectArena = BTreeMap<ObjectId, ObjectData>;

/// Arena of every registered context, the global pool included.
pub(crate) type ContextArena = BTreeMap<SessionId, ObserverContext>;

/// Identifies a filter kind in export streams and the filter factory registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterTag {
    NamingPolicy,
    SubjectType,
    Custom(String),
}

impl FilterTag {
    pub fn as_str(&self) -> &str {
        match self {
            FilterTag::NamingPolicy => "naming_policy",
            FilterTag::SubjectType => "subject_type",
            FilterTag::Custom(tag) => tag,
        }
    }

    pub fn parse(tag: &str) -> Self {
        match tag {
            "naming_policy" => FilterTag::NamingPolicy,
            "subject_type" => FilterTag::SubjectType,
            other => FilterTag::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for FilterTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer of a filter to a change of a property it monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyVerdict {
    Allow,
    /// The change must be rolled back
    Block,
}

/// Pluggable policy deciding which objects a context accepts.
///
/// Hooks take `&self`; filters that keep state across a call sequence use
/// interior mutability.
pub trait SubjectFilter: fmt::Debug {
    fn tag(&self) -> FilterTag;

    fn evaluate_attachment(&self, view: &FilterView<'_>, object: ObjectId) -> Evaluation;

    /// Prepare `object` for attachment. Returning false aborts the attachment.
    fn initialize_attachment(&self, _cx: &mut FilterContext<'_>, _object: ObjectId) -> bool {
        true
    }

    fn finalize_attachment(&self, _cx: &mut FilterContext<'_>, _object: ObjectId, _attached: bool) {}

    fn evaluate_detachment(&self, _view: &FilterView<'_>, _object: ObjectId) -> Evaluation {
        Evaluation::Allowed
    }

    fn finalize_detachment(
        &self,
        _cx: &mut FilterContext<'_>,
        _object: ObjectId,
        _detached: bool,
        _subject_deleted: bool,
    ) {
    }

    fn monitored_properties(&self) -> &[PropertyKey] {
        &[]
    }

    fn monitored_property_changed(
        &self,
        _cx: &mut FilterContext<'_>,
        _object: ObjectId,
        _key: &PropertyKey,
    ) -> PropertyVerdict {
        PropertyVerdict::Allow
    }

    /// Start a sequence of attachments that share one conflict decision.
    fn start_validation_cycle(&self) {}

    fn end_validation_cycle(&self) {}

    fn export_binary(&self, _w: &mut ByteWriter) {}

    fn import_binary(&mut self, _r: &mut ByteReader<'_>) -> Result<(), CodecError> {
        Ok(())
    }
}

/// A filter installed on a context.
///
/// Built-in filters are concrete variants so a context can be asked for a
/// specific capability; anything else goes through `Custom`.
#[derive(Debug)]
pub enum FilterSlot {
    Naming(NamingPolicyFilter),
    SubjectType(SubjectTypeFilter),
    Custom(Box<dyn SubjectFilter>),
}

impl FilterSlot {
    pub fn as_filter(&self) -> &dyn SubjectFilter {
        match self {
            FilterSlot::Naming(f) => f,
            FilterSlot::SubjectType(f) => f,
            FilterSlot::Custom(f) => f.as_ref(),
        }
    }

    pub fn as_filter_mut(&mut self) -> &mut dyn SubjectFilter {
        match self {
            FilterSlot::Naming(f) => f,
            FilterSlot::SubjectType(f) => f,
            FilterSlot::Custom(f) => f.as_mut(),
        }
    }

    pub fn tag(&self) -> FilterTag {
        self.as_filter().tag()
    }

    pub fn naming(&self) -> Option<&NamingPolicyFilter> {
        match self {
            FilterSlot::Naming(f) => Some(f),
            _ => None,
        }
    }

    pub fn subject_type(&self) -> Option<&SubjectTypeFilter> {
        match self {
            FilterSlot::SubjectType(f) => Some(f),
            _ => None,
        }
    }
}

/// Read-only view of the manager handed to evaluation hooks.
#[derive(Clone, Copy)]
pub struct FilterView<'a> {
    pub(crate) context: &'a ObserverContext,
    pub(crate) contexts: &'a ContextArena,
    pub(crate) objects: &'a ObjectArena,
    pub(crate) resolver: Option<&'a dyn ConflictResolver>,
}

impl<'a> FilterView<'a> {
    pub fn context(&self) -> &'a ObserverContext {
        self.context
    }

    pub fn session_id(&self) -> SessionId {
        self.context.session_id
    }

    pub fn object(&self, id: ObjectId) -> Option<&'a ObjectData> {
        self.objects.get(&id)
    }

    pub fn other_context(&self, session_id: SessionId) -> Option<&'a ObserverContext> {
        self.contexts.get(&session_id)
    }

    pub fn resolver(&self) -> Option<&'a dyn ConflictResolver> {
        self.resolver
    }

    /// Names of the current subjects as seen from this context.
    pub fn subject_names(&self) -> impl Iterator<Item = (ObjectId, &'a str)> + 'a {
        let session_id = self.context.session_id;
        let objects = self.objects;
        self.context
            .subjects
            .iter()
            .filter_map(move |id| objects.get(id).map(|o| (*id, o.name_in(session_id))))
    }
}

/// Mutable view of the manager handed to attachment, detachment and
/// property change hooks.
///
/// The context being filtered is borrowed shared alongside every other
/// context, while objects are borrowed mutably.
pub struct FilterContext<'a> {
    pub(crate) context: &'a ObserverContext,
    pub(crate) contexts: &'a ContextArena,
    pub(crate) objects: &'a mut ObjectArena,
    pub(crate) resolver: Option<&'a dyn ConflictResolver>,
}

impl<'a> FilterContext<'a> {
    pub fn view(&self) -> FilterView<'_> {
        FilterView {
            context: self.context,
            contexts: self.contexts,
            objects: &*self.objects,
            resolver: self.resolver,
        }
    }

    pub fn context(&self) -> &'a ObserverContext {
        self.context
    }

    pub fn session_id(&self) -> SessionId {
        self.context.session_id
    }

    pub fn object(&self, id: ObjectId) -> Option<&ObjectData> {
        self.objects.get(&id)
    }

    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut ObjectData> {
        self.objects.get_mut(&id)
    }

    pub fn resolver(&self) -> Option<&'a dyn ConflictResolver> {
        self.resolver
    }

    /// Reborrow this view for another context.
    pub fn for_context<'b>(&'b mut self, context: &'b ObserverContext) -> FilterContext<'b> {
        FilterContext {
            context,
            contexts: self.contexts,
            objects: &mut *self.objects,
            resolver: self.resolver,
        }
    }

    /// Tell monitoring filters that `key` changed on `object`.
    pub fn notify_property_changed(&mut self, object: ObjectId, key: &PropertyKey) -> PropertyVerdict {
        dispatch_property_change(self.contexts, self.objects, self.resolver, object, key)
    }
}

/// Run `monitored_property_changed` on every filter that monitors `key`, in
/// every context `object` is attached to with event filtering enabled.
pub(crate) fn dispatch_property_change(
    contexts: &ContextArena,
    objects: &mut ObjectArena,
    resolver: Option<&dyn ConflictResolver>,
    object: ObjectId,
    key: &PropertyKey,
) -> PropertyVerdict {
    let attached = match objects.get(&object) {
        Some(data) => data.attached_contexts(),
        None => return PropertyVerdict::Allow,
    };
    for session_id in attached {
        let Some(context) = contexts.get(&session_id) else {
            continue;
        };
        if !context.event_filtering_enabled() {
            continue;
        }
        for slot in &context.filters {
            let filter = slot.as_filter();
            if !filter.monitored_properties().contains(key) {
                continue;
            }
            let mut cx = FilterContext {
                context,
                contexts,
                objects: &mut *objects,
                resolver,
            };
            if filter.monitored_property_changed(&mut cx, object, key) == PropertyVerdict::Block {
                debug!(
                    object = %object,
                    context = session_id,
                    filter = %filter.tag(),
                    property = %key,
                    "Property change blocked by filter"
                );
                return PropertyVerdict::Block;
            }
        }
    }
    PropertyVerdict::Allow
}
