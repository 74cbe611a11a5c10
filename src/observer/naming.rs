//! Naming policy filter
//!
//! Keeps subject names valid and, optionally, unique within a context. The
//! first naming context an object joins becomes its *name manager* and owns the
//! object's `object_name` property; every other prohibiting context tracks its
//! own view of the name in `instance_names`.
//!
//! Conflicts are settled by the configured [`ResolutionPolicy`]. `PromptUser`
//! delegates to the manager's [`ConflictResolver`]; without one the conflict
//! is treated as rejected.

use crate::codec::{ByteReader, ByteWriter};
use crate::error::CodecError;
use crate::observer::filter::{FilterContext, FilterTag, FilterView, PropertyVerdict, SubjectFilter};
use crate::observer::Evaluation;
use crate::property::{PropertyKey, Variant};
use crate::types::{ObjectId, SessionId};
use bitflags::bitflags;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Upper bound on counter suffixes tried when generating a unique name.
const MAX_RENAME_ATTEMPTS: u32 = 10_000;

/// Names accepted by the built-in validator are 1 to 100 characters long.
const DEFAULT_MAX_NAME_CHARS: usize = 100;

const FALLBACK_NAME: &str = "new_object";

static MONITORED: [PropertyKey; 3] = [
    PropertyKey::ObjectName,
    PropertyKey::NameManagerId,
    PropertyKey::InstanceNames,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniquenessPolicy {
    AllowDuplicateNames,
    #[default]
    ProhibitDuplicateNames,
}

impl UniquenessPolicy {
    fn as_u32(self) -> u32 {
        match self {
            UniquenessPolicy::AllowDuplicateNames => 0,
            UniquenessPolicy::ProhibitDuplicateNames => 1,
        }
    }

    fn from_u32(v: u32) -> Result<Self, CodecError> {
        match v {
            0 => Ok(UniquenessPolicy::AllowDuplicateNames),
            1 => Ok(UniquenessPolicy::ProhibitDuplicateNames),
            other => Err(CodecError::InvalidProperty(format!(
                "unknown uniqueness policy {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    #[default]
    AutoRename,
    PromptUser,
    Reject,
}

impl ResolutionPolicy {
    fn as_u32(self) -> u32 {
        match self {
            ResolutionPolicy::AutoRename => 0,
            ResolutionPolicy::PromptUser => 1,
            ResolutionPolicy::Reject => 2,
        }
    }

    fn from_u32(v: u32) -> Result<Self, CodecError> {
        match v {
            0 => Ok(ResolutionPolicy::AutoRename),
            1 => Ok(ResolutionPolicy::PromptUser),
            2 => Ok(ResolutionPolicy::Reject),
            other => Err(CodecError::InvalidProperty(format!(
                "unknown resolution policy {}",
                other
            ))),
        }
    }
}

bitflags! {
    /// Problems found with a candidate name; empty means acceptable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NameValidity: u8 {
        const DUPLICATE = 1 << 0;
        const INVALID = 1 << 1;
    }
}

/// How a prompted conflict should be settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameResolution {
    Reject,
    AutoRename,
    Rename(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDecision {
    pub resolution: NameResolution,
    /// Reuse this decision for the rest of the current validation cycle
    pub apply_to_all: bool,
}

impl ConflictDecision {
    pub fn once(resolution: NameResolution) -> Self {
        Self {
            resolution,
            apply_to_all: false,
        }
    }
}

/// Details handed to a [`ConflictResolver`].
#[derive(Debug, Clone)]
pub struct ConflictRequest<'a> {
    pub object: ObjectId,
    pub name: &'a str,
    pub context: SessionId,
    pub context_name: &'a str,
    pub validity: NameValidity,
    pub suggested_name: &'a str,
}

/// External arbiter for naming conflicts under `ResolutionPolicy::PromptUser`.
///
/// Returning `None` cancels, which rejects the name.
pub trait ConflictResolver {
    fn resolve(&self, request: &ConflictRequest<'_>) -> Option<ConflictDecision>;
}

impl<F> ConflictResolver for F
where
    F: Fn(&ConflictRequest<'_>) -> Option<ConflictDecision>,
{
    fn resolve(&self, request: &ConflictRequest<'_>) -> Option<ConflictDecision> {
        self(request)
    }
}

#[derive(Debug, Default)]
struct ValidationCycle {
    active: bool,
    decision: Option<NameResolution>,
}

#[derive(Debug)]
pub struct NamingPolicyFilter {
    uniqueness: UniquenessPolicy,
    uniqueness_resolution: ResolutionPolicy,
    validity_resolution: ResolutionPolicy,
    pattern: String,
    validator: Option<Regex>,
    cycle: Mutex<ValidationCycle>,
    rollback_names: Mutex<BTreeMap<ObjectId, String>>,
    busy: Mutex<()>,
}

impl Default for NamingPolicyFilter {
    fn default() -> Self {
        Self::new(
            UniquenessPolicy::default(),
            ResolutionPolicy::default(),
            ResolutionPolicy::default(),
        )
    }
}

impl NamingPolicyFilter {
    pub fn new(
        uniqueness: UniquenessPolicy,
        uniqueness_resolution: ResolutionPolicy,
        validity_resolution: ResolutionPolicy,
    ) -> Self {
        Self {
            uniqueness,
            uniqueness_resolution,
            validity_resolution,
            pattern: String::new(),
            validator: None,
            cycle: Mutex::new(ValidationCycle::default()),
            rollback_names: Mutex::new(BTreeMap::new()),
            busy: Mutex::new(()),
        }
    }

    pub fn uniqueness_policy(&self) -> UniquenessPolicy {
        self.uniqueness
    }

    pub fn uniqueness_resolution_policy(&self) -> ResolutionPolicy {
        self.uniqueness_resolution
    }

    pub fn validity_resolution_policy(&self) -> ResolutionPolicy {
        self.validity_resolution
    }

    pub fn set_uniqueness_policy(&mut self, policy: UniquenessPolicy) {
        self.uniqueness = policy;
    }

    pub fn set_uniqueness_resolution_policy(&mut self, policy: ResolutionPolicy) {
        self.uniqueness_resolution = policy;
    }

    pub fn set_validity_resolution_policy(&mut self, policy: ResolutionPolicy) {
        self.validity_resolution = policy;
    }

    /// Pattern a whole name must match; empty restores the built-in rule.
    pub fn validation_pattern(&self) -> &str {
        &self.pattern
    }

    pub fn set_validation_pattern(&mut self, pattern: &str) -> Result<(), regex::Error> {
        if pattern.is_empty() {
            self.validator = None;
        } else {
            self.validator = Some(Regex::new(&format!("^(?:{})$", pattern))?);
        }
        self.pattern = pattern.to_string();
        Ok(())
    }

    fn is_valid(&self, name: &str) -> bool {
        match &self.validator {
            Some(re) => re.is_match(name),
            None => (1..=DEFAULT_MAX_NAME_CHARS).contains(&name.chars().count()),
        }
    }

    fn prohibits_duplicates(&self) -> bool {
        self.uniqueness == UniquenessPolicy::ProhibitDuplicateNames
    }

    /// Check `name` against the validator and the names of the context's subjects.
    pub fn evaluate_name(&self, cx: &FilterView<'_>, name: &str) -> NameValidity {
        let mut validity = NameValidity::empty();
        if self.prohibits_duplicates() && cx.subject_names().any(|(_, n)| n == name) {
            validity |= NameValidity::DUPLICATE;
        }
        if !self.is_valid(name) {
            validity |= NameValidity::INVALID;
        }
        validity
    }

    fn conflicting_object(&self, cx: &FilterView<'_>, name: &str) -> Option<ObjectId> {
        if !self.prohibits_duplicates() {
            return None;
        }
        cx.subject_names()
            .find(|(_, n)| *n == name)
            .map(|(id, _)| id)
    }

    /// Derive an acceptable name from `input`, or an empty string if none is found.
    ///
    /// Duplicates get a counter suffix (`name_1`, `name_2`, or `name 2` when the
    /// input already ends in a space separated number).
    pub fn generate_valid_name(&self, cx: &FilterView<'_>, input: &str, force_change: bool) -> String {
        let mut name = if input.is_empty() {
            FALLBACK_NAME.to_string()
        } else {
            input.to_string()
        };

        let mut validity = self.evaluate_name(cx, &name);
        if validity.is_empty() && !force_change {
            return name;
        }

        if validity.contains(NameValidity::INVALID) {
            let candidates = [
                name.trim().to_string(),
                name.split_whitespace().collect::<String>(),
                name.chars().take(DEFAULT_MAX_NAME_CHARS).collect::<String>(),
                FALLBACK_NAME.to_string(),
            ];
            match candidates
                .into_iter()
                .find(|c| !self.evaluate_name(cx, c).contains(NameValidity::INVALID))
            {
                Some(fixed) => name = fixed,
                None => return String::new(),
            }
            validity = self.evaluate_name(cx, &name);
            if validity.is_empty() && !force_change {
                return name;
            }
        }

        let (stem, separator, mut counter) = split_counter(&name);
        for _ in 0..MAX_RENAME_ATTEMPTS {
            counter += 1;
            let candidate = format!("{}{}{}", stem, separator, counter);
            if candidate != input && self.evaluate_name(cx, &candidate).is_empty() {
                return candidate;
            }
        }
        String::new()
    }

    pub fn is_name_manager(&self, cx: &FilterView<'_>, object: ObjectId) -> bool {
        cx.object(object)
            .and_then(|o| o.properties.shared_value(&PropertyKey::NameManagerId))
            .and_then(Variant::as_int)
            == Some(cx.session_id() as i64)
    }

    /// Make this filter's context the name manager of `object`.
    pub fn make_name_manager(&self, cx: &mut FilterContext<'_>, object: ObjectId) {
        let session_id = cx.session_id();
        let contexts = cx.contexts;
        let Some(data) = cx.object_mut(object) else {
            return;
        };
        if !data.is_attached_to(session_id) {
            warn!(object = %object, context = session_id, "Cannot become name manager of an unattached object");
            return;
        }
        let current = data
            .properties
            .shared_value(&PropertyKey::NameManagerId)
            .and_then(Variant::as_int)
            .map(|v| v as SessionId);
        if current == Some(session_id) {
            return;
        }

        // the previous manager now needs its own view of the name
        if let Some(previous) = current {
            let keeps_view = data.is_attached_to(previous)
                && contexts
                    .get(&previous)
                    .and_then(|c| c.naming_filter())
                    .map(|f| f.prohibits_duplicates())
                    .unwrap_or(false);
            if keeps_view {
                let name = data.name.clone();
                data.properties
                    .set_observer_value(PropertyKey::InstanceNames, previous, name);
            }
        }

        if self.prohibits_duplicates() {
            let instance_name = data
                .properties
                .observer_value(&PropertyKey::InstanceNames, session_id)
                .and_then(Variant::as_str)
                .map(str::to_string);
            data.properties
                .remove_observer_value(&PropertyKey::InstanceNames, session_id);
            if let Some(name) = instance_name {
                data.properties
                    .set_shared_value(PropertyKey::ObjectName, name.as_str());
                data.name = name;
            }
        }
        data.properties
            .set_shared_value(PropertyKey::NameManagerId, session_id);
        debug!(object = %object, context = session_id, "Assigned name manager");
    }

    /// Hand name management of `object` to another naming context it is attached to.
    fn assign_new_name_manager(&self, cx: &mut FilterContext<'_>, object: ObjectId) {
        if !self.is_name_manager(&cx.view(), object) {
            return;
        }
        let session_id = cx.session_id();
        let contexts = cx.contexts;
        let candidates: Vec<SessionId> = match cx.object(object) {
            Some(data) => data
                .attached_contexts()
                .into_iter()
                .filter(|id| *id != session_id)
                .collect(),
            None => return,
        };

        for id in candidates {
            let Some(other) = contexts.get(&id) else {
                continue;
            };
            if let Some(naming) = other.naming_filter() {
                let mut other_cx = cx.for_context(other);
                naming.make_name_manager(&mut other_cx, object);
                return;
            }
        }

        if let Some(data) = cx.object_mut(object) {
            data.properties.remove(&PropertyKey::InstanceNames);
            data.properties.remove(&PropertyKey::NameManagerId);
        }
    }

    fn name_value(cx: &FilterView<'_>, object: ObjectId, key: &PropertyKey) -> Option<String> {
        let data = cx.object(object)?;
        let value = match key {
            PropertyKey::ObjectName => data.properties.shared_value(key),
            _ => data.properties.observer_value(key, cx.session_id()),
        };
        value.and_then(Variant::as_str).map(str::to_string)
    }

    /// Write a name to `key` and let other monitoring filters react.
    fn store_name(cx: &mut FilterContext<'_>, object: ObjectId, key: &PropertyKey, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        let session_id = cx.session_id();
        let Some(data) = cx.object_mut(object) else {
            return false;
        };
        match key {
            PropertyKey::ObjectName => {
                data.properties
                    .set_shared_value(PropertyKey::ObjectName, name);
                data.name = name.to_string();
            }
            _ => data
                .properties
                .set_observer_value(PropertyKey::InstanceNames, session_id, name),
        }
        cx.notify_property_changed(object, key);
        true
    }

    /// Validate the name stored under `key`, applying the resolution policies.
    fn validate_name_change(&self, cx: &mut FilterContext<'_>, object: ObjectId, key: &PropertyKey) -> bool {
        let Some(changed) = Self::name_value(&cx.view(), object, key).filter(|n| !n.is_empty()) else {
            return false;
        };
        let validity = self.evaluate_name(&cx.view(), &changed);
        if validity.contains(NameValidity::INVALID) {
            return self.resolve(cx, object, key, &changed, validity, self.validity_resolution);
        }
        if validity.contains(NameValidity::DUPLICATE)
            && self.conflicting_object(&cx.view(), &changed) != Some(object)
        {
            return self.resolve(cx, object, key, &changed, validity, self.uniqueness_resolution);
        }
        true
    }

    fn resolve(
        &self,
        cx: &mut FilterContext<'_>,
        object: ObjectId,
        key: &PropertyKey,
        name: &str,
        validity: NameValidity,
        policy: ResolutionPolicy,
    ) -> bool {
        match policy {
            ResolutionPolicy::Reject => {
                debug!(object = %object, name, context = cx.session_id(), "Name rejected");
                false
            }
            ResolutionPolicy::AutoRename => {
                let valid_name = self.generate_valid_name(&cx.view(), name, false);
                Self::store_name(cx, object, key, &valid_name)
            }
            ResolutionPolicy::PromptUser => {
                let suggested = self.generate_valid_name(&cx.view(), name, false);
                let reused = {
                    let cycle = self.cycle.lock();
                    if cycle.active {
                        cycle.decision.clone()
                    } else {
                        None
                    }
                };
                let resolution = match reused {
                    // a concrete name only fits the object it was chosen for
                    Some(NameResolution::Rename(_)) => NameResolution::AutoRename,
                    Some(resolution) => resolution,
                    None => {
                        let request = ConflictRequest {
                            object,
                            name,
                            context: cx.session_id(),
                            context_name: cx.context().name(),
                            validity,
                            suggested_name: &suggested,
                        };
                        let Some(decision) = cx.resolver().and_then(|r| r.resolve(&request)) else {
                            debug!(object = %object, name, "Naming conflict left unresolved");
                            return false;
                        };
                        if decision.apply_to_all {
                            let mut cycle = self.cycle.lock();
                            if cycle.active {
                                cycle.decision = Some(decision.resolution.clone());
                            }
                        }
                        decision.resolution
                    }
                };
                match resolution {
                    NameResolution::Reject => false,
                    NameResolution::AutoRename => Self::store_name(cx, object, key, &suggested),
                    NameResolution::Rename(new_name) => {
                        if self.evaluate_name(&cx.view(), &new_name).is_empty() {
                            Self::store_name(cx, object, key, &new_name)
                        } else {
                            warn!(object = %object, name = %new_name, "Resolver supplied an unacceptable name");
                            false
                        }
                    }
                }
            }
        }
    }
}

/// Split a trailing counter off `name`: `file_3` gives `("file", "_", 3)`.
fn split_counter(name: &str) -> (&str, &'static str, u32) {
    if let Some((stem, tail)) = name.rsplit_once('_') {
        if let Ok(n) = tail.parse::<u32>() {
            return (stem, "_", n);
        }
    }
    if let Some((stem, tail)) = name.rsplit_once(' ') {
        if let Ok(n) = tail.parse::<u32>() {
            return (stem, " ", n);
        }
    }
    (name, "_", 0)
}

impl SubjectFilter for NamingPolicyFilter {
    fn tag(&self) -> FilterTag {
        FilterTag::NamingPolicy
    }

    fn evaluate_attachment(&self, cx: &FilterView<'_>, object: ObjectId) -> Evaluation {
        let Some(data) = cx.object(object) else {
            return Evaluation::Rejected;
        };
        let validity = self.evaluate_name(cx, &data.name);
        let policy = if validity.contains(NameValidity::INVALID) {
            self.validity_resolution
        } else if validity.contains(NameValidity::DUPLICATE) {
            self.uniqueness_resolution
        } else {
            return Evaluation::Allowed;
        };
        match policy {
            ResolutionPolicy::Reject => Evaluation::Rejected,
            ResolutionPolicy::PromptUser => Evaluation::Conditional,
            ResolutionPolicy::AutoRename => Evaluation::Allowed,
        }
    }

    fn initialize_attachment(&self, cx: &mut FilterContext<'_>, object: ObjectId) -> bool {
        let session_id = cx.session_id();
        let Some(data) = cx.object_mut(object) else {
            return false;
        };
        let name = data.name.clone();
        self.rollback_names.lock().insert(object, name.clone());

        let mut valid = true;
        if !data.properties.contains(&PropertyKey::ObjectName) {
            data.properties
                .set_shared_value(PropertyKey::ObjectName, name.as_str());
            data.properties
                .set_shared_value(PropertyKey::NameManagerId, session_id);
            valid = self.validate_name_change(cx, object, &PropertyKey::ObjectName);
        } else if !data.properties.contains(&PropertyKey::NameManagerId) {
            data.properties
                .set_shared_value(PropertyKey::NameManagerId, session_id);
        }

        if self.is_name_manager(&cx.view(), object) {
            if let Some(managed) = Self::name_value(&cx.view(), object, &PropertyKey::ObjectName) {
                if let Some(data) = cx.object_mut(object) {
                    data.name = managed;
                }
            }
        } else if self.prohibits_duplicates() {
            if let Some(data) = cx.object_mut(object) {
                data.properties
                    .set_observer_value(PropertyKey::InstanceNames, session_id, name.as_str());
            }
            valid = self.validate_name_change(cx, object, &PropertyKey::InstanceNames);
        }
        valid
    }

    fn finalize_attachment(&self, cx: &mut FilterContext<'_>, object: ObjectId, attached: bool) {
        let rollback = self.rollback_names.lock().remove(&object);
        if attached {
            return;
        }
        let session_id = cx.session_id();
        let is_manager = self.is_name_manager(&cx.view(), object);
        let Some(data) = cx.object_mut(object) else {
            return;
        };
        if is_manager {
            data.properties.remove(&PropertyKey::ObjectName);
            data.properties.remove(&PropertyKey::NameManagerId);
            if let Some(name) = rollback {
                data.name = name;
            }
        } else {
            data.properties
                .remove_observer_value(&PropertyKey::InstanceNames, session_id);
        }
    }

    fn finalize_detachment(
        &self,
        cx: &mut FilterContext<'_>,
        object: ObjectId,
        detached: bool,
        subject_deleted: bool,
    ) {
        if !detached || subject_deleted {
            return;
        }
        let session_id = cx.session_id();
        if let Some(data) = cx.object_mut(object) {
            data.properties
                .remove_observer_value(&PropertyKey::InstanceNames, session_id);
        }
        self.assign_new_name_manager(cx, object);
    }

    fn monitored_properties(&self) -> &[PropertyKey] {
        &MONITORED
    }

    fn monitored_property_changed(
        &self,
        cx: &mut FilterContext<'_>,
        object: ObjectId,
        key: &PropertyKey,
    ) -> PropertyVerdict {
        // a change made while this filter is already validating is its own
        let Some(_busy) = self.busy.try_lock() else {
            return PropertyVerdict::Allow;
        };
        let session_id = cx.session_id();
        match key {
            PropertyKey::ObjectName => {
                if !self.is_name_manager(&cx.view(), object) {
                    return PropertyVerdict::Allow;
                }
                let current = cx.object(object).map(|o| o.name.clone());
                let changed = Self::name_value(&cx.view(), object, key);
                if changed.is_some() && changed == current {
                    return PropertyVerdict::Allow;
                }
                if !self.validate_name_change(cx, object, key) {
                    return PropertyVerdict::Block;
                }
                if let Some(name) = Self::name_value(&cx.view(), object, key) {
                    if let Some(data) = cx.object_mut(object) {
                        data.name = name;
                    }
                }
                PropertyVerdict::Allow
            }
            PropertyKey::InstanceNames => {
                let last_changed = cx
                    .object(object)
                    .and_then(|o| o.properties.observer(&PropertyKey::InstanceNames))
                    .map(|p| p.last_changed_context());
                if last_changed != Some(session_id) {
                    return PropertyVerdict::Allow;
                }
                if self.validate_name_change(cx, object, key) {
                    PropertyVerdict::Allow
                } else {
                    PropertyVerdict::Block
                }
            }
            PropertyKey::NameManagerId => {
                warn!(object = %object, "Name manager can only change through make_name_manager");
                PropertyVerdict::Block
            }
            _ => PropertyVerdict::Allow,
        }
    }

    fn start_validation_cycle(&self) {
        let mut cycle = self.cycle.lock();
        cycle.active = true;
        cycle.decision = None;
    }

    fn end_validation_cycle(&self) {
        let mut cycle = self.cycle.lock();
        cycle.active = false;
        cycle.decision = None;
    }

    fn export_binary(&self, w: &mut ByteWriter) {
        w.write_u32(self.uniqueness.as_u32());
        w.write_u32(self.uniqueness_resolution.as_u32());
        w.write_u32(self.validity_resolution.as_u32());
        w.write_str(&self.pattern);
    }

    fn import_binary(&mut self, r: &mut ByteReader<'_>) -> Result<(), CodecError> {
        self.uniqueness = UniquenessPolicy::from_u32(r.read_u32()?)?;
        self.uniqueness_resolution = ResolutionPolicy::from_u32(r.read_u32()?)?;
        self.validity_resolution = ResolutionPolicy::from_u32(r.read_u32()?)?;
        let pattern = r.read_string()?;
        self.set_validation_pattern(&pattern)
            .map_err(|e| CodecError::InvalidProperty(format!("invalid name pattern: {}", e)))
    }
}
