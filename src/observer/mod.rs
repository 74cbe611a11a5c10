//! Observer Contexts
//!
//! A context tracks an ordered set of subjects, guarded by pluggable subject
//! filters. Contexts live in the [`ObjectManager`](crate::manager::ObjectManager)
//! arena and are addressed by session id.

pub mod filter;
pub mod naming;
pub mod subject_type;

pub use filter::{FilterContext, FilterSlot, FilterTag, FilterView, PropertyVerdict, SubjectFilter};
pub use naming::{
    ConflictDecision, ConflictRequest, ConflictResolver, NameResolution, NameValidity,
    NamingPolicyFilter, ResolutionPolicy, UniquenessPolicy,
};
pub use subject_type::SubjectTypeFilter;

use crate::property::PropertyKey;
use crate::types::{ContextHandle, ObjectId, SessionId};
use bitflags::bitflags;

bitflags! {
    /// Hints for views presenting a context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ActionHints: u32 {
        const REFRESH_VIEW = 1 << 0;
        const PUSH_DOWN = 1 << 1;
        const PUSH_DOWN_NEW = 1 << 2;
        const PUSH_UP = 1 << 3;
        const PUSH_UP_NEW = 1 << 4;
        const SWITCH_VIEW = 1 << 5;
        const DELETE_ITEM = 1 << 6;
        const RENAME_ITEM = 1 << 7;
    }
}

/// Outcome of an attachment or detachment evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Allowed,
    Rejected,
    /// Needs external resolution, e.g. a naming conflict
    Conditional,
    /// The context owns the object and cannot detach it
    IsParentObserver,
    /// Detaching would leave a scope-owned object without any context
    LastScopedObserver,
}

impl Evaluation {
    /// Combine filter verdicts: a rejection wins over a conditional result.
    pub fn merge(self, other: Evaluation) -> Evaluation {
        match (self, other) {
            (Evaluation::Rejected, _) | (_, Evaluation::Rejected) => Evaluation::Rejected,
            (Evaluation::Conditional, _) | (_, Evaluation::Conditional) => {
                Evaluation::Conditional
            }
            (current, _) => current,
        }
    }
}

/// Notification emitted by contexts and the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    SubjectAttached { context: SessionId, object: ObjectId },
    SubjectDetached { context: SessionId, object: ObjectId },
    PropertyChanged { context: SessionId, object: ObjectId, key: PropertyKey },
    ModificationChanged { context: SessionId, modified: bool },
    Refreshed { context: SessionId },
    ObjectRegistered { object: ObjectId },
    ObjectDestroyed { object: ObjectId },
    MetaTypeActiveObjectsChanged { type_tag: String },
}

/// A node owning an ordered set of subjects.
#[derive(Debug)]
pub struct ObserverContext {
    pub(crate) session_id: SessionId,
    pub(crate) name: String,
    pub(crate) host: Option<ObjectId>,
    pub(crate) subjects: Vec<ObjectId>,
    pub(crate) filters: Vec<FilterSlot>,
    pub(crate) action_hints: ActionHints,
    pub(crate) modified: bool,
    pub(crate) suppression_depth: u32,
    pub(crate) next_subject_id: i64,
}

impl ObserverContext {
    pub(crate) fn new(session_id: SessionId, name: impl Into<String>, host: Option<ObjectId>) -> Self {
        Self {
            session_id,
            name: name.into(),
            host,
            subjects: Vec::new(),
            filters: Vec::new(),
            action_hints: ActionHints::empty(),
            modified: false,
            suppression_depth: 0,
            next_subject_id: 0,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn handle(&self) -> ContextHandle {
        ContextHandle(self.session_id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Object hosting this context; `None` only for the global pool.
    pub fn host(&self) -> Option<ObjectId> {
        self.host
    }

    pub fn subjects(&self) -> &[ObjectId] {
        &self.subjects
    }

    pub fn subject_count(&self) -> usize {
        self.subjects.len()
    }

    pub fn contains(&self, object: ObjectId) -> bool {
        self.subjects.contains(&object)
    }

    pub fn action_hints(&self) -> ActionHints {
        self.action_hints
    }

    pub fn set_action_hints(&mut self, hints: ActionHints) {
        self.action_hints = hints;
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// False while a notification suppression guard covers this context.
    pub fn event_filtering_enabled(&self) -> bool {
        self.suppression_depth == 0
    }

    pub fn filters(&self) -> &[FilterSlot] {
        &self.filters
    }

    /// Install a subject filter. Filters can only be installed while the
    /// context has no subjects; an existing filter with the same tag is replaced.
    pub fn install_filter(&mut self, filter: FilterSlot) -> bool {
        if !self.subjects.is_empty() {
            return false;
        }
        let tag = filter.tag();
        self.filters.retain(|existing| existing.tag() != tag);
        self.filters.push(filter);
        true
    }

    /// Capability lookup by filter tag.
    pub fn filter(&self, tag: &FilterTag) -> Option<&FilterSlot> {
        self.filters.iter().find(|f| &f.tag() == tag)
    }

    pub fn naming_filter(&self) -> Option<&NamingPolicyFilter> {
        self.filters.iter().find_map(FilterSlot::naming)
    }

    pub fn subject_type_filter(&self) -> Option<&SubjectTypeFilter> {
        self.filters.iter().find_map(FilterSlot::subject_type)
    }

    pub(crate) fn allocate_subject_id(&mut self) -> i64 {
        let id = self.next_subject_id;
        self.next_subject_id += 1;
        id
    }
}
