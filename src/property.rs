//! Property Store
//!
//! Typed, exportable attributes attached to every managed object. A property is
//! either *shared* (one value per object) or *observer scoped* (one value per
//! observer context, keyed by session id).

use crate::types::{SessionId, INVALID_SESSION_ID};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Dynamically typed property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variant {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    StringList(Vec<String>),
}

impl Variant {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Variant::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Variant::Null)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Variant::Int(v)
    }
}

impl From<i32> for Variant {
    fn from(v: i32) -> Self {
        Variant::Int(v as i64)
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Bool(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.to_string())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::String(v)
    }
}

/// Property identifier: the properties the framework itself maintains, plus an
/// open slot for application-defined names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PropertyKey {
    /// Export-time visitor id (shared, exportable while a table is live)
    VisitorId,
    /// Ownership kind (shared)
    Ownership,
    /// Session id of the specific owner context (shared)
    ObserverParent,
    /// Name managed by the object's name manager (shared)
    ObjectName,
    /// Session id of the context that manages the object's name (shared)
    NameManagerId,
    /// Per-context instance names for contexts that are not the name manager
    InstanceNames,
    /// Per-context membership record
    SubjectIds,
    Custom(String),
}

impl PropertyKey {
    pub fn name(&self) -> &str {
        match self {
            PropertyKey::VisitorId => "visitor_id",
            PropertyKey::Ownership => "ownership",
            PropertyKey::ObserverParent => "observer_parent",
            PropertyKey::ObjectName => "object_name",
            PropertyKey::NameManagerId => "name_manager_id",
            PropertyKey::InstanceNames => "instance_names",
            PropertyKey::SubjectIds => "subject_ids",
            PropertyKey::Custom(name) => name,
        }
    }

    /// Parse a wire name back into a key. Unknown names become `Custom`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "visitor_id" => PropertyKey::VisitorId,
            "ownership" => PropertyKey::Ownership,
            "observer_parent" => PropertyKey::ObserverParent,
            "object_name" => PropertyKey::ObjectName,
            "name_manager_id" => PropertyKey::NameManagerId,
            "instance_names" => PropertyKey::InstanceNames,
            "subject_ids" => PropertyKey::SubjectIds,
            other => PropertyKey::Custom(other.to_string()),
        }
    }

    pub fn custom(name: impl Into<String>) -> Self {
        PropertyKey::Custom(name.into())
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Which property kinds take part in an export.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PropertyTypes: u8 {
        const SHARED = 1 << 0;
        const OBSERVER = 1 << 1;
        const ALL = Self::SHARED.bits() | Self::OBSERVER.bits();
    }
}

/// Single-valued property.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedProperty {
    pub key: PropertyKey,
    pub exportable: bool,
    pub value: Variant,
}

impl SharedProperty {
    pub fn new(key: PropertyKey, value: impl Into<Variant>) -> Self {
        Self {
            key,
            exportable: true,
            value: value.into(),
        }
    }

    pub fn internal(key: PropertyKey, value: impl Into<Variant>) -> Self {
        Self {
            key,
            exportable: false,
            value: value.into(),
        }
    }
}

/// Property holding one value per observer context.
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverProperty {
    pub key: PropertyKey,
    pub exportable: bool,
    values: BTreeMap<SessionId, Variant>,
    last_changed_context: SessionId,
}

impl ObserverProperty {
    pub fn new(key: PropertyKey) -> Self {
        Self {
            key,
            exportable: true,
            values: BTreeMap::new(),
            last_changed_context: INVALID_SESSION_ID,
        }
    }

    pub fn internal(key: PropertyKey) -> Self {
        Self {
            exportable: false,
            ..Self::new(key)
        }
    }

    pub(crate) fn from_parts(
        key: PropertyKey,
        exportable: bool,
        values: BTreeMap<SessionId, Variant>,
        last_changed_context: SessionId,
    ) -> Self {
        Self {
            key,
            exportable,
            values,
            last_changed_context,
        }
    }

    /// Set the value for a context, recording it as the last changed context.
    pub fn set_context(&mut self, context: SessionId, value: impl Into<Variant>) {
        self.values.insert(context, value.into());
        self.last_changed_context = context;
    }

    pub fn remove_context(&mut self, context: SessionId) -> Option<Variant> {
        self.values.remove(&context)
    }

    pub fn value(&self, context: SessionId) -> Option<&Variant> {
        self.values.get(&context)
    }

    pub fn has_context(&self, context: SessionId) -> bool {
        self.values.contains_key(&context)
    }

    pub fn contexts(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.values.keys().copied()
    }

    pub fn values(&self) -> &BTreeMap<SessionId, Variant> {
        &self.values
    }

    pub fn context_count(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn last_changed_context(&self) -> SessionId {
        self.last_changed_context
    }

    /// Rebuild the property with every context key passed through `map`.
    ///
    /// The first error aborts the rebuild and leaves `self` untouched.
    pub fn remap_contexts<E>(
        &self,
        mut map: impl FnMut(SessionId) -> Result<SessionId, E>,
    ) -> Result<ObserverProperty, E> {
        let mut values = BTreeMap::new();
        for (context, value) in &self.values {
            values.insert(map(*context)?, value.clone());
        }
        let last_changed_context = if self.last_changed_context == INVALID_SESSION_ID {
            INVALID_SESSION_ID
        } else if self.values.contains_key(&self.last_changed_context) {
            map(self.last_changed_context)?
        } else {
            INVALID_SESSION_ID
        };
        Ok(ObserverProperty {
            key: self.key.clone(),
            exportable: self.exportable,
            values,
            last_changed_context,
        })
    }
}

/// Every property of one object.
///
/// A key lives either in the shared table or in the observer-scoped table,
/// never in both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyStore {
    shared: BTreeMap<PropertyKey, SharedProperty>,
    observer: BTreeMap<PropertyKey, ObserverProperty>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self, key: &PropertyKey) -> Option<&SharedProperty> {
        self.shared.get(key)
    }

    pub fn shared_value(&self, key: &PropertyKey) -> Option<&Variant> {
        self.shared.get(key).map(|p| &p.value)
    }

    pub fn observer(&self, key: &PropertyKey) -> Option<&ObserverProperty> {
        self.observer.get(key)
    }

    pub fn observer_mut(&mut self, key: &PropertyKey) -> Option<&mut ObserverProperty> {
        self.observer.get_mut(key)
    }

    pub fn observer_value(&self, key: &PropertyKey, context: SessionId) -> Option<&Variant> {
        self.observer.get(key).and_then(|p| p.value(context))
    }

    /// Store a shared property, replacing whatever was stored under its key.
    pub fn set_shared(&mut self, property: SharedProperty) -> Option<SharedProperty> {
        self.observer.remove(&property.key);
        self.shared.insert(property.key.clone(), property)
    }

    /// Update the value of a shared property, creating an internal one if absent.
    pub fn set_shared_value(&mut self, key: PropertyKey, value: impl Into<Variant>) {
        match self.shared.get_mut(&key) {
            Some(existing) => existing.value = value.into(),
            None => {
                self.set_shared(SharedProperty::internal(key, value));
            }
        }
    }

    /// Store an observer-scoped property. Empty properties are removed instead.
    pub fn set_observer(&mut self, property: ObserverProperty) -> Option<ObserverProperty> {
        self.shared.remove(&property.key);
        if property.is_empty() {
            return self.observer.remove(&property.key);
        }
        self.observer.insert(property.key.clone(), property)
    }

    /// Fold the per-context values of `property` into the observer property
    /// stored under the same key, keeping values for other contexts.
    pub fn merge_observer(&mut self, property: ObserverProperty) {
        match self.observer.get_mut(&property.key) {
            Some(existing) => {
                if property.last_changed_context != INVALID_SESSION_ID {
                    existing.last_changed_context = property.last_changed_context;
                }
                existing.values.extend(property.values);
            }
            None => {
                self.set_observer(property);
            }
        }
    }

    /// Set one context's value, creating an internal observer property if absent.
    pub fn set_observer_value(
        &mut self,
        key: PropertyKey,
        context: SessionId,
        value: impl Into<Variant>,
    ) {
        self.shared.remove(&key);
        self.observer
            .entry(key.clone())
            .or_insert_with(|| ObserverProperty::internal(key))
            .set_context(context, value);
    }

    pub fn remove_observer_value(&mut self, key: &PropertyKey, context: SessionId) {
        if let Some(property) = self.observer.get_mut(key) {
            property.remove_context(context);
            if property.is_empty() {
                self.observer.remove(key);
            }
        }
    }

    pub fn remove(&mut self, key: &PropertyKey) {
        self.shared.remove(key);
        self.observer.remove(key);
    }

    pub fn contains(&self, key: &PropertyKey) -> bool {
        self.shared.contains_key(key) || self.observer.contains_key(key)
    }

    pub fn shared_properties(&self) -> impl Iterator<Item = &SharedProperty> {
        self.shared.values()
    }

    pub fn observer_properties(&self) -> impl Iterator<Item = &ObserverProperty> {
        self.observer.values()
    }

    pub fn exportable_shared(&self) -> Vec<&SharedProperty> {
        self.shared.values().filter(|p| p.exportable).collect()
    }

    pub fn exportable_observer(&self) -> Vec<&ObserverProperty> {
        self.observer.values().filter(|p| p.exportable).collect()
    }

    pub fn clear(&mut self) {
        self.shared.clear();
        self.observer.clear();
    }
}
