//! Property changes routed through subject filters, and per-object property
//! streaming.

use super::ObjectManager;
use crate::codec::{read_property_block, write_property_block, ByteReader, ByteWriter};
use crate::error::{ObserverError, RelationError};
use crate::object::ObjectData;
use crate::observer::filter::dispatch_property_change;
use crate::observer::{ObserverEvent, PropertyVerdict};
use crate::property::{PropertyKey, PropertyTypes, SharedProperty, Variant};
use crate::types::{ObjectId, SessionId};
use tracing::{debug, warn};

impl ObjectManager {
    /// Write the exportable properties of `object` as a property block.
    pub fn export_object_properties(
        &self,
        object: ObjectId,
        w: &mut ByteWriter,
        types: PropertyTypes,
    ) -> Result<(), RelationError> {
        let data = self
            .objects
            .get(&object)
            .ok_or(RelationError::ObjectNotFound(object))?;
        write_property_block(w, &data.properties, types, &data.name);
        Ok(())
    }

    /// Read a property block into `object`.
    ///
    /// The block is decoded in full before anything is applied, so a malformed
    /// stream leaves the object untouched.
    pub fn import_object_properties(
        &mut self,
        object: ObjectId,
        r: &mut ByteReader<'_>,
    ) -> Result<(), RelationError> {
        let data = self
            .objects
            .get_mut(&object)
            .ok_or(RelationError::ObjectNotFound(object))?;
        let block = read_property_block(r)?;
        if !block.has_visitor_id() {
            warn!(object = %object, name = %data.name, "No visitor id property found in stream");
        }
        block.apply_to(&mut data.properties);
        Ok(())
    }

    /// Set a shared property, letting monitoring filters veto the change.
    pub fn set_shared_property(
        &mut self,
        object: ObjectId,
        property: SharedProperty,
    ) -> Result<(), ObserverError> {
        let key = property.key.clone();
        self.commit_property_change(object, &key, move |data| {
            data.properties.set_shared(property);
        })
    }

    /// Set the value `context` sees for an observer-scoped property.
    pub fn set_observer_property_value(
        &mut self,
        object: ObjectId,
        key: PropertyKey,
        context: SessionId,
        value: impl Into<Variant>,
    ) -> Result<(), ObserverError> {
        let value = value.into();
        let changed = key.clone();
        self.commit_property_change(object, &changed, move |data| {
            data.properties.set_observer_value(key, context, value);
        })
    }

    /// Rename `object` as seen from `session_id`.
    ///
    /// Objects with a per-context instance name get that renamed; everything
    /// else has its shared name changed.
    pub fn rename_subject(
        &mut self,
        session_id: SessionId,
        object: ObjectId,
        name: &str,
    ) -> Result<(), ObserverError> {
        let data = self
            .objects
            .get(&object)
            .ok_or(ObserverError::ObjectNotFound(object))?;
        if !data.is_attached_to(session_id) {
            return Err(ObserverError::NotAttached {
                object,
                context: session_id,
            });
        }
        let name = name.to_string();
        if data
            .properties
            .observer_value(&PropertyKey::InstanceNames, session_id)
            .is_some()
        {
            return self.set_observer_property_value(object, PropertyKey::InstanceNames, session_id, name);
        }
        self.commit_property_change(object, &PropertyKey::ObjectName, move |data| {
            if data.properties.contains(&PropertyKey::ObjectName) {
                data.properties
                    .set_shared_value(PropertyKey::ObjectName, name.as_str());
            } else {
                data.name = name;
            }
        })
    }

    /// Strip the visitor ids stamped during export or import.
    pub fn remove_relational_properties(&mut self, objects: &[ObjectId]) {
        for object in objects {
            if let Some(data) = self.objects.get_mut(object) {
                data.properties.remove(&PropertyKey::VisitorId);
            }
        }
    }

    fn commit_property_change(
        &mut self,
        object: ObjectId,
        key: &PropertyKey,
        apply: impl FnOnce(&mut ObjectData),
    ) -> Result<(), ObserverError> {
        let data = self
            .objects
            .get_mut(&object)
            .ok_or(ObserverError::ObjectNotFound(object))?;
        let snapshot = (data.properties.clone(), data.name.clone());
        apply(data);
        // unmanaged names follow the shared name property directly
        if *key == PropertyKey::ObjectName && !data.properties.contains(&PropertyKey::NameManagerId) {
            if let Some(name) = data
                .properties
                .shared_value(&PropertyKey::ObjectName)
                .and_then(Variant::as_str)
            {
                data.name = name.to_string();
            }
        }

        let verdict = dispatch_property_change(
            &self.contexts,
            &mut self.objects,
            self.resolver.as_deref(),
            object,
            key,
        );
        if verdict == PropertyVerdict::Block {
            if let Some(data) = self.objects.get_mut(&object) {
                data.properties = snapshot.0;
                data.name = snapshot.1;
            }
            debug!(object = %object, property = %key, "Property change rolled back");
            return Err(ObserverError::PropertyChangeBlocked {
                object,
                key: key.to_string(),
            });
        }

        let attached = self
            .objects
            .get(&object)
            .map(ObjectData::attached_contexts)
            .unwrap_or_default();
        for context in attached {
            self.emit(ObserverEvent::PropertyChanged {
                context,
                object,
                key: key.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Ownership;
    use crate::observer::{FilterSlot, NamingPolicyFilter, ResolutionPolicy, UniquenessPolicy};

    fn named_context(resolution: ResolutionPolicy) -> (ObjectManager, SessionId, ObjectId, ObjectId) {
        let mut manager = ObjectManager::new();
        let (ctx, _) = manager.create_observer("ctx");
        manager.observer_mut(ctx).unwrap().install_filter(FilterSlot::Naming(
            NamingPolicyFilter::new(
                UniquenessPolicy::ProhibitDuplicateNames,
                resolution,
                ResolutionPolicy::Reject,
            ),
        ));
        let a = manager.create_object("a", "Object");
        let b = manager.create_object("b", "Object");
        manager.attach_subject(ctx, a, Ownership::Manual).unwrap();
        manager.attach_subject(ctx, b, Ownership::Manual).unwrap();
        (manager, ctx, a, b)
    }

    #[test]
    fn test_rename_to_duplicate_is_auto_renamed() {
        let (mut manager, ctx, _, b) = named_context(ResolutionPolicy::AutoRename);
        manager.rename_subject(ctx, b, "a").unwrap();
        assert_eq!(manager.object(b).unwrap().name, "a_1");
    }

    #[test]
    fn test_rename_to_duplicate_is_rolled_back_when_rejected() {
        let (mut manager, ctx, _, b) = named_context(ResolutionPolicy::Reject);
        assert!(matches!(
            manager.rename_subject(ctx, b, "a"),
            Err(ObserverError::PropertyChangeBlocked { .. })
        ));
        let data = manager.object(b).unwrap();
        assert_eq!(data.name, "b");
        assert_eq!(
            data.properties.shared_value(&PropertyKey::ObjectName),
            Some(&Variant::from("b"))
        );
    }

    #[test]
    fn test_rename_without_naming_filter() {
        let mut manager = ObjectManager::new();
        let (ctx, _) = manager.create_observer("ctx");
        let a = manager.create_object("a", "Object");
        manager.attach_subject(ctx, a, Ownership::Manual).unwrap();
        manager.drain_events();

        manager.rename_subject(ctx, a, "renamed").unwrap();
        assert_eq!(manager.object(a).unwrap().name, "renamed");
        assert!(manager.drain_events().contains(&ObserverEvent::PropertyChanged {
            context: ctx,
            object: a,
            key: PropertyKey::ObjectName,
        }));
    }

    #[test]
    fn test_property_block_round_trip_through_manager() {
        let mut manager = ObjectManager::new();
        let a = manager.create_object("a", "Object");
        let b = manager.create_object("b", "Object");
        manager
            .set_shared_property(a, SharedProperty::new(PropertyKey::VisitorId, 4))
            .unwrap();
        manager
            .set_shared_property(a, SharedProperty::new(PropertyKey::custom("colour"), "red"))
            .unwrap();

        let mut w = ByteWriter::new();
        manager
            .export_object_properties(a, &mut w, PropertyTypes::ALL)
            .unwrap();
        let bytes = w.into_bytes();
        manager
            .import_object_properties(b, &mut ByteReader::new(&bytes))
            .unwrap();

        let data = manager.object(b).unwrap();
        assert_eq!(data.visitor_id(), Some(4));
        assert_eq!(
            data.properties.shared_value(&PropertyKey::custom("colour")),
            Some(&Variant::from("red"))
        );
    }

    #[test]
    fn test_truncated_block_leaves_object_untouched() {
        let mut manager = ObjectManager::new();
        let a = manager.create_object("a", "Object");
        manager
            .set_shared_property(a, SharedProperty::new(PropertyKey::custom("colour"), "red"))
            .unwrap();
        let mut w = ByteWriter::new();
        manager
            .export_object_properties(a, &mut w, PropertyTypes::ALL)
            .unwrap();
        let bytes = w.into_bytes();

        let b = manager.create_object("b", "Object");
        let result = manager.import_object_properties(b, &mut ByteReader::new(&bytes[..bytes.len() - 2]));
        assert!(result.is_err());
        assert!(manager.object(b).unwrap().properties.shared_properties().next().is_none());
    }
}
