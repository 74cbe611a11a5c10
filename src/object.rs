//! Managed objects and their ownership policy.

use crate::error::CodecError;
use crate::property::{PropertyKey, PropertyStore, Variant};
use crate::types::{ObjectId, SessionId, INVALID_SESSION_ID};
use serde::{Deserialize, Serialize};

/// Lifetime coupling between an object and the contexts observing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Ownership {
    /// Never deleted by a context
    #[default]
    Manual,
    /// Deleted when the last context observing it detaches it
    ObserverScope,
    /// Deleted only when the designated owner context detaches it
    SpecificObserver,
    /// Lifetime delegated to another subject
    OwnedBySubject,
}

impl Ownership {
    pub fn as_u8(self) -> u8 {
        match self {
            Ownership::Manual => 0,
            Ownership::ObserverScope => 1,
            Ownership::SpecificObserver => 2,
            Ownership::OwnedBySubject => 3,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self, CodecError> {
        match v {
            0 => Ok(Ownership::Manual),
            1 => Ok(Ownership::ObserverScope),
            2 => Ok(Ownership::SpecificObserver),
            3 => Ok(Ownership::OwnedBySubject),
            other => Err(CodecError::UnknownOwnership(other)),
        }
    }
}

/// One object in the manager's arena.
#[derive(Debug, Clone)]
pub struct ObjectData {
    pub(crate) id: ObjectId,
    pub name: String,
    /// Meta type, also the factory tag used to recreate the object on import
    pub type_tag: String,
    pub properties: PropertyStore,
    pub(crate) parent: Option<ObjectId>,
    pub(crate) children: Vec<ObjectId>,
    /// Context hosted directly by this object
    pub(crate) observer: Option<SessionId>,
    /// Subject owning this object when its ownership is `OwnedBySubject`
    pub(crate) owned_by: Option<ObjectId>,
}

impl ObjectData {
    pub(crate) fn new(id: ObjectId, name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            type_tag: type_tag.into(),
            properties: PropertyStore::new(),
            parent: None,
            children: Vec::new(),
            observer: None,
            owned_by: None,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }

    pub fn children(&self) -> &[ObjectId] {
        &self.children
    }

    /// Session id of the context hosted directly by this object.
    pub fn hosted_observer(&self) -> Option<SessionId> {
        self.observer
    }

    pub fn owned_by(&self) -> Option<ObjectId> {
        self.owned_by
    }

    /// Current ownership kind; objects never attached anywhere are `Manual`.
    pub fn ownership(&self) -> Ownership {
        self.properties
            .shared_value(&PropertyKey::Ownership)
            .and_then(Variant::as_int)
            .and_then(|v| u8::try_from(v).ok())
            .and_then(|v| Ownership::from_u8(v).ok())
            .unwrap_or_default()
    }

    pub fn has_ownership(&self) -> bool {
        self.properties.shared(&PropertyKey::Ownership).is_some()
    }

    /// Session id of the specific owner context, or [`INVALID_SESSION_ID`].
    pub fn observer_parent(&self) -> SessionId {
        self.properties
            .shared_value(&PropertyKey::ObserverParent)
            .and_then(Variant::as_int)
            .map(|v| v as SessionId)
            .unwrap_or(INVALID_SESSION_ID)
    }

    pub(crate) fn set_ownership(&mut self, ownership: Ownership, observer_parent: SessionId) {
        self.properties
            .set_shared_value(PropertyKey::Ownership, ownership.as_u8() as i64);
        self.properties
            .set_shared_value(PropertyKey::ObserverParent, observer_parent);
    }

    /// Session ids of every context this object is attached to.
    pub fn attached_contexts(&self) -> Vec<SessionId> {
        self.properties
            .observer(&PropertyKey::SubjectIds)
            .map(|p| p.contexts().collect())
            .unwrap_or_default()
    }

    pub fn is_attached_to(&self, context: SessionId) -> bool {
        self.properties
            .observer(&PropertyKey::SubjectIds)
            .map(|p| p.has_context(context))
            .unwrap_or(false)
    }

    /// Name shown for this object inside `context`.
    pub fn name_in(&self, context: SessionId) -> &str {
        self.properties
            .observer_value(&PropertyKey::InstanceNames, context)
            .and_then(Variant::as_str)
            .unwrap_or(&self.name)
    }

    pub fn visitor_id(&self) -> Option<i32> {
        self.properties
            .shared_value(&PropertyKey::VisitorId)
            .and_then(Variant::as_int)
            .map(|v| v as i32)
    }
}
