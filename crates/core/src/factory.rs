//! Component factory boundary.
//!
//! Fragment builders never invent a component's property schema: they ask a
//! factory, keyed by type name, for a fresh component carrying the type's
//! defaults, then set what they need explicitly.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::component::{Component, ComponentKind, PropertyValue};
use crate::error::ConfigError;

/// Produces fresh components of one implementation type.
pub trait ComponentFactory: Send + Sync {
    /// The implementation type this factory configures (e.g. `"JetMaker"`).
    fn type_name(&self) -> &str;

    /// The role components of this type play.
    fn kind(&self) -> ComponentKind;

    /// Default property values. These are recorded as non-explicit.
    fn defaults(&self) -> BTreeMap<String, PropertyValue>;

    /// A new component named `instance_name`, defaults filled in.
    fn create(&self, instance_name: &str) -> Component {
        let mut component = Component::new(self.kind(), self.type_name(), instance_name);
        for (name, value) in self.defaults() {
            component.set_default(name, value);
        }
        component
    }
}

/// A factory described entirely by data, e.g. loaded from a schema file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaFactory {
    pub type_name: String,
    pub kind: ComponentKind,
    #[serde(default)]
    pub defaults: BTreeMap<String, PropertyValue>,
}

impl SchemaFactory {
    pub fn new(type_name: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            type_name: type_name.into(),
            kind,
            defaults: BTreeMap::new(),
        }
    }

    pub fn with_default(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.defaults.insert(name.into(), value.into());
        self
    }
}

impl ComponentFactory for SchemaFactory {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn kind(&self) -> ComponentKind {
        self.kind
    }

    fn defaults(&self) -> BTreeMap<String, PropertyValue> {
        self.defaults.clone()
    }
}

/// A registry of factories keyed by type name.
pub struct FactoryRegistry {
    factories: HashMap<String, Box<dyn ComponentFactory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory. Replaces any existing factory for the same type.
    pub fn register(&mut self, factory: Box<dyn ComponentFactory>) {
        let name = factory.type_name().to_string();
        self.factories.insert(name, factory);
    }

    pub fn get(&self, type_name: &str) -> Option<&dyn ComponentFactory> {
        self.factories.get(type_name).map(|f| f.as_ref())
    }

    /// Create a component from a `Type` or `Type/instance` name.
    pub fn create(&self, full_name: &str) -> Result<Component, ConfigError> {
        let (type_name, instance) = full_name.split_once('/').unwrap_or((full_name, full_name));
        let factory = self
            .get(type_name)
            .ok_or_else(|| ConfigError::UnknownComponentType(type_name.to_string()))?;
        Ok(factory.create(instance))
    }

    /// All registered type names.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for FactoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
