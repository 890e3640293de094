//! Component model: the named, typed units a configuration is built from.
//!
//! A [`Component`] is a pure value: its identity is its instance name, and it
//! carries a map of [`Property`] values that remember whether they were set
//! explicitly or came from a factory default. Reconciling two components is
//! the job of [`crate::dedup`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The role a component plays in a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Runs once per event, placed in the sequence tree.
    EventAlgorithm,
    /// Produces conditions data; unordered, resolved as a DAG downstream.
    ConditionsAlgorithm,
    /// A long-lived service shared by the whole application.
    Service,
    /// A tool shared by name between owners.
    PublicTool,
    /// A tool owned by exactly one parent component.
    PrivateTool,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EventAlgorithm => write!(f, "event algorithm"),
            Self::ConditionsAlgorithm => write!(f, "conditions algorithm"),
            Self::Service => write!(f, "service"),
            Self::PublicTool => write!(f, "public tool"),
            Self::PrivateTool => write!(f, "private tool"),
        }
    }
}

/// Whether a data handle reads or writes its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    Write,
}

/// A declared input or output of a component: which data it touches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataHandle {
    /// Data type stored under the key (e.g. `"JetContainer"`).
    pub kind: String,
    /// Store key.
    pub key: String,
    pub mode: AccessMode,
}

impl DataHandle {
    pub fn read(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
            mode: AccessMode::Read,
        }
    }

    pub fn write(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
            mode: AccessMode::Write,
        }
    }
}

impl fmt::Display for DataHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            AccessMode::Read => "read",
            AccessMode::Write => "write",
        };
        write!(f, "{}#{} ({mode})", self.kind, self.key)
    }
}

/// The value of a single component property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Handle(DataHandle),
    /// Merged by union under reconciliation.
    List(Vec<PropertyValue>),
    /// A nested component owned by this property (e.g. a private tool).
    Component(Box<Component>),
    /// An ordered array of nested components, reconciled by instance name.
    ComponentList(Vec<Component>),
}

impl PropertyValue {
    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    /// Value equality for reconciliation. Floats compare bit for bit, so an
    /// identical `NaN` matches itself.
    pub fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_value(y))
            }
            (Self::Component(a), Self::Component(b)) => a.same_as(b),
            (Self::ComponentList(a), Self::ComponentList(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_as(y))
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::Handle(h) => write!(f, "{h}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Component(c) => write!(f, "{}", c.full_name()),
            Self::ComponentList(items) => {
                let names: Vec<String> = items.iter().map(Component::full_name).collect();
                write!(f, "[{}]", names.join(", "))
            }
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<DataHandle> for PropertyValue {
    fn from(v: DataHandle) -> Self {
        Self::Handle(v)
    }
}

impl From<Component> for PropertyValue {
    fn from(v: Component) -> Self {
        Self::Component(Box::new(v))
    }
}

impl<T: Into<PropertyValue>> From<Vec<T>> for PropertyValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

/// A property slot: the value plus whether a caller set it explicitly.
///
/// Only explicit values take part in conflict detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub value: PropertyValue,
    #[serde(default = "default_true")]
    pub explicit: bool,
}

fn default_true() -> bool {
    true
}

/// A named, typed configuration unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub kind: ComponentKind,

    /// The implementation this component configures.
    pub type_name: String,

    /// Identity key, unique within a collection.
    pub instance_name: String,

    #[serde(default)]
    properties: BTreeMap<String, Property>,
}

impl Component {
    /// Create a component with no properties.
    pub fn new(
        kind: ComponentKind,
        type_name: impl Into<String>,
        instance_name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            type_name: type_name.into(),
            instance_name: instance_name.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Parse a `Type/instance` name. Without a `/` the instance is named
    /// after its type.
    pub fn from_full_name(kind: ComponentKind, full_name: &str) -> Self {
        match full_name.split_once('/') {
            Some((type_name, instance)) => Self::new(kind, type_name, instance),
            None => Self::new(kind, full_name, full_name),
        }
    }

    pub fn event_algorithm(type_name: impl Into<String>, instance_name: impl Into<String>) -> Self {
        Self::new(ComponentKind::EventAlgorithm, type_name, instance_name)
    }

    pub fn conditions_algorithm(
        type_name: impl Into<String>,
        instance_name: impl Into<String>,
    ) -> Self {
        Self::new(ComponentKind::ConditionsAlgorithm, type_name, instance_name)
    }

    pub fn service(type_name: impl Into<String>, instance_name: impl Into<String>) -> Self {
        Self::new(ComponentKind::Service, type_name, instance_name)
    }

    pub fn public_tool(type_name: impl Into<String>, instance_name: impl Into<String>) -> Self {
        Self::new(ComponentKind::PublicTool, type_name, instance_name)
    }

    pub fn private_tool(type_name: impl Into<String>, instance_name: impl Into<String>) -> Self {
        Self::new(ComponentKind::PrivateTool, type_name, instance_name)
    }

    /// `Type/instance`, or just the type when both are equal.
    pub fn full_name(&self) -> String {
        if self.type_name == self.instance_name {
            self.type_name.clone()
        } else {
            format!("{}/{}", self.type_name, self.instance_name)
        }
    }

    /// Builder-style explicit property setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a property explicitly.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(
            name.into(),
            Property {
                value: value.into(),
                explicit: true,
            },
        );
    }

    /// Record a default value. Never replaces an explicit setting.
    pub fn set_default(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties
            .entry(name.into())
            .or_insert_with(|| Property {
                value: value.into(),
                explicit: false,
            });
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name).map(|p| &p.value)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    /// Whether `name` was set explicitly rather than left at its default.
    pub fn is_set(&self, name: &str) -> bool {
        self.properties.get(name).is_some_and(|p| p.explicit)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &Property)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn properties_mut(&mut self) -> &mut BTreeMap<String, Property> {
        &mut self.properties
    }

    /// Same identity and the same properties under
    /// [`PropertyValue::same_value`].
    pub fn same_as(&self, other: &Component) -> bool {
        self.kind == other.kind
            && self.type_name == other.type_name
            && self.instance_name == other.instance_name
            && self.properties.len() == other.properties.len()
            && self
                .properties
                .iter()
                .zip(&other.properties)
                .all(|((ka, a), (kb, b))| {
                    ka == kb && a.explicit == b.explicit && a.value.same_value(&b.value)
                })
    }

    /// Every data handle declared by this component or anything nested in it.
    pub fn data_dependencies(&self) -> Vec<DataHandle> {
        let mut out = Vec::new();
        for property in self.properties.values() {
            collect_handles(&property.value, &mut out);
        }
        out
    }
}

fn collect_handles(value: &PropertyValue, out: &mut Vec<DataHandle>) {
    match value {
        PropertyValue::Handle(h) => out.push(h.clone()),
        PropertyValue::List(items) => {
            for item in items {
                collect_handles(item, out);
            }
        }
        PropertyValue::Component(c) => out.extend(c.data_dependencies()),
        PropertyValue::ComponentList(items) => {
            for c in items {
                out.extend(c.data_dependencies());
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_name_roundtrip() {
        let svc = Component::from_full_name(ComponentKind::Service, "S/inst");
        assert_eq!(svc.type_name, "S");
        assert_eq!(svc.instance_name, "inst");
        assert_eq!(svc.full_name(), "S/inst");

        let bare = Component::from_full_name(ComponentKind::Service, "MessageSvc");
        assert_eq!(bare.instance_name, "MessageSvc");
        assert_eq!(bare.full_name(), "MessageSvc");
    }

    #[test]
    fn defaults_are_not_explicit() {
        let mut tool = Component::private_tool("Fitter", "Fitter");
        tool.set_default("MaxIterations", 10);
        assert_eq!(tool.get("MaxIterations"), Some(&PropertyValue::Int(10)));
        assert!(!tool.is_set("MaxIterations"));

        tool.set("MaxIterations", 20);
        assert!(tool.is_set("MaxIterations"));

        tool.set_default("MaxIterations", 5);
        assert_eq!(tool.get("MaxIterations"), Some(&PropertyValue::Int(20)));
    }

    #[test]
    fn data_dependencies_include_nested() {
        let inner = Component::private_tool("Calib", "Calib")
            .with("Input", DataHandle::read("CaloCells", "AllCalo"));
        let alg = Component::event_algorithm("JetMaker", "JetMaker")
            .with("Output", DataHandle::write("JetContainer", "Jets"))
            .with("Tool", inner)
            .with(
                "Extra",
                vec![PropertyValue::Handle(DataHandle::read("Event", "EventInfo"))],
            );

        let deps = alg.data_dependencies();
        assert_eq!(deps.len(), 3);
        assert!(deps.contains(&DataHandle::read("CaloCells", "AllCalo")));
        assert!(deps.contains(&DataHandle::write("JetContainer", "Jets")));
        assert!(deps.contains(&DataHandle::read("Event", "EventInfo")));
    }

    #[test]
    fn list_display() {
        let v = PropertyValue::from(vec!["a", "b"]);
        assert_eq!(v.to_string(), r#"["a", "b"]"#);
    }

    #[test]
    fn same_value_matches_identical_nan() {
        let nan = PropertyValue::Float(f64::NAN);
        assert_ne!(nan, nan.clone());
        assert!(nan.same_value(&nan.clone()));
        assert!(!nan.same_value(&PropertyValue::Float(1.0)));

        let a = Component::public_tool("T", "T").with("Cuts", vec![f64::NAN, 2.0]);
        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&a.clone().with("Cuts", vec![f64::NAN])));
    }
}
