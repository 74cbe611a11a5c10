//! Object and filter factories used to recreate a graph from an export stream.

use crate::codec::{ByteReader, ByteWriter};
use crate::error::CodecError;
use crate::manager::ObjectManager;
use crate::observer::{FilterSlot, FilterTag, NamingPolicyFilter, SubjectTypeFilter};
use crate::types::ObjectId;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Factory tag of plain objects.
pub const OBJECT_FACTORY_TAG: &str = "Object";

/// Factory tag of objects hosting an observer context.
pub const OBSERVER_FACTORY_TAG: &str = "Observer";

/// Creates an object in `manager` from a factory tag and instance name.
pub trait ObjectFactory: Send + Sync {
    fn create(&self, manager: &mut ObjectManager, instance_name: &str) -> ObjectId;
}

impl<F> ObjectFactory for F
where
    F: Fn(&mut ObjectManager, &str) -> ObjectId + Send + Sync,
{
    fn create(&self, manager: &mut ObjectManager, instance_name: &str) -> ObjectId {
        self(manager, instance_name)
    }
}

type FilterFactory = Arc<dyn Fn() -> FilterSlot + Send + Sync>;

/// Factory tag plus instance name, the header of every streamed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryData {
    pub tag: String,
    pub instance_name: String,
}

impl FactoryData {
    pub fn new(tag: impl Into<String>, instance_name: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            instance_name: instance_name.into(),
        }
    }

    pub fn export_binary(&self, w: &mut ByteWriter) {
        w.write_str(&self.tag);
        w.write_str(&self.instance_name);
    }

    pub fn import_binary(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let tag = r.read_string()?;
        let instance_name = r.read_string()?;
        Ok(Self { tag, instance_name })
    }
}

/// Registry of object and subject filter factories.
///
/// The first registration of a tag wins; later ones are refused.
#[derive(Clone)]
pub struct FactoryRegistry {
    objects: BTreeMap<String, Arc<dyn ObjectFactory>>,
    filters: BTreeMap<FilterTag, FilterFactory>,
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("objects", &self.objects.keys().collect::<Vec<_>>())
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FactoryRegistry {
    pub fn empty() -> Self {
        Self {
            objects: BTreeMap::new(),
            filters: BTreeMap::new(),
        }
    }

    /// Registry holding the built-in object and filter factories.
    pub fn with_builtins(naming: NamingPolicyFilter) -> Self {
        let mut registry = Self::empty();
        registry.register_object_factory(
            OBJECT_FACTORY_TAG,
            |manager: &mut ObjectManager, name: &str| manager.create_object(name, OBJECT_FACTORY_TAG),
        );
        registry.register_object_factory(
            OBSERVER_FACTORY_TAG,
            |manager: &mut ObjectManager, name: &str| manager.create_observer(name).1,
        );

        let uniqueness = naming.uniqueness_policy();
        let uniqueness_resolution = naming.uniqueness_resolution_policy();
        let validity_resolution = naming.validity_resolution_policy();
        let pattern = naming.validation_pattern().to_string();
        registry.register_filter_factory(FilterTag::NamingPolicy, move || {
            let mut filter =
                NamingPolicyFilter::new(uniqueness, uniqueness_resolution, validity_resolution);
            if let Err(e) = filter.set_validation_pattern(&pattern) {
                warn!(pattern = %pattern, error = %e, "Ignoring invalid name pattern");
            }
            FilterSlot::Naming(filter)
        });
        registry.register_filter_factory(FilterTag::SubjectType, || {
            FilterSlot::SubjectType(SubjectTypeFilter::default())
        });
        registry
    }

    pub fn register_object_factory(
        &mut self,
        tag: impl Into<String>,
        factory: impl ObjectFactory + 'static,
    ) -> bool {
        let tag = tag.into();
        if self.objects.contains_key(&tag) {
            warn!(tag = %tag, "Object factory already registered");
            return false;
        }
        self.objects.insert(tag, Arc::new(factory));
        true
    }

    pub fn object_factory(&self, tag: &str) -> Option<Arc<dyn ObjectFactory>> {
        self.objects.get(tag).cloned()
    }

    pub fn has_object_factory(&self, tag: &str) -> bool {
        self.objects.contains_key(tag)
    }

    pub fn object_tags(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    pub fn register_filter_factory(
        &mut self,
        tag: FilterTag,
        factory: impl Fn() -> FilterSlot + Send + Sync + 'static,
    ) -> bool {
        if self.filters.contains_key(&tag) {
            warn!(tag = %tag, "Subject filter factory already registered");
            return false;
        }
        self.filters.insert(tag, Arc::new(factory));
        true
    }

    pub fn create_filter(&self, tag: &FilterTag) -> Option<FilterSlot> {
        self.filters.get(tag).map(|factory| factory())
    }

    pub fn filter_tags(&self) -> impl Iterator<Item = &FilterTag> {
        self.filters.keys()
    }
}

impl Default for FactoryRegistry {
    fn default() -> Self {
        Self::with_builtins(NamingPolicyFilter::default())
    }
}
