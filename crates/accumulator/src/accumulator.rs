//! The accumulator, a mergeable unit of partial configuration.
//!
//! An [`Accumulator`] owns one main sequence tree (plus any dangling
//! top-level trees adopted through merges), the flat event-algorithm
//! registry, the conditions-algorithm, service and public-tool sets, at most
//! one pending private tool, an optional primary component, and
//! application-wide properties.
//!
//! A rejected call leaves the unit exactly as it was. Single-unit operations
//! validate everything before they mutate; merges run against a staged copy
//! of the contents and commit only on success.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

use confweave_config::EngineSettings;
use confweave_core::dedup::union;
use confweave_core::{
    merge_component, Component, ComponentArena, ComponentId, ComponentKind, ComponentSet, ConfigError, DataHandle,
    Diagnostic, DiagnosticKind, PropertyValue, Result,
};

use crate::sequence::SequenceNode;

/// The payload of the private-tool slot.
#[derive(Debug, Clone, PartialEq)]
pub enum PrivateTools {
    Single(Component),
    List(Vec<Component>),
}

impl PrivateTools {
    fn components(&self) -> &[Component] {
        match self {
            Self::Single(c) => std::slice::from_ref(c),
            Self::List(items) => items,
        }
    }

    /// Display form used in errors and diagnostics.
    pub fn describe(&self) -> String {
        let names: Vec<String> = self.components().iter().map(Component::full_name).collect();
        match self {
            Self::Single(_) => names.join(""),
            Self::List(_) => format!("[{}]", names.join(", ")),
        }
    }

    pub fn into_vec(self) -> Vec<Component> {
        match self {
            Self::Single(c) => vec![c],
            Self::List(items) => items,
        }
    }
}

impl From<Component> for PrivateTools {
    fn from(tool: Component) -> Self {
        Self::Single(tool)
    }
}

impl From<Vec<Component>> for PrivateTools {
    fn from(tools: Vec<Component>) -> Self {
        Self::List(tools)
    }
}

/// Private tools attach to a parent as a component or component-list property.
impl From<PrivateTools> for PropertyValue {
    fn from(tools: PrivateTools) -> Self {
        match tools {
            PrivateTools::Single(c) => PropertyValue::Component(Box::new(c)),
            PrivateTools::List(items) => PropertyValue::ComponentList(items),
        }
    }
}

/// What a fragment hands back to its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Primary {
    /// The pending private tool(s), now owned by the caller.
    PrivateTools(PrivateTools),
    /// A snapshot of the designated primary component.
    Component(Component),
}

/// A data dependency declared by a component the accumulator holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeclaredDependency {
    /// Full name of the declaring component.
    pub component: String,
    pub handle: DataHandle,
}

#[derive(Debug, Clone)]
pub(crate) struct Contents {
    pub(crate) arena: ComponentArena,
    pub(crate) main: SequenceNode,
    pub(crate) dangling: Vec<SequenceNode>,
    pub(crate) algorithms: ComponentSet,
    pub(crate) conditions_algorithms: ComponentSet,
    pub(crate) services: ComponentSet,
    pub(crate) services_to_create: Vec<String>,
    pub(crate) public_tools: ComponentSet,
    pub(crate) private_tools: Option<PrivateTools>,
    pub(crate) primary: Option<ComponentId>,
    pub(crate) properties: BTreeMap<String, PropertyValue>,
    pub(crate) last_added: Option<String>,
    pub(crate) diagnostics: Vec<Diagnostic>,
}

impl Contents {
    fn new(main: SequenceNode) -> Self {
        Self {
            arena: ComponentArena::new(),
            main,
            dangling: Vec::new(),
            algorithms: ComponentSet::new(ComponentKind::EventAlgorithm),
            conditions_algorithms: ComponentSet::new(ComponentKind::ConditionsAlgorithm),
            services: ComponentSet::new(ComponentKind::Service),
            services_to_create: Vec::new(),
            public_tools: ComponentSet::new(ComponentKind::PublicTool),
            private_tools: None,
            primary: None,
            properties: BTreeMap::new(),
            last_added: None,
            diagnostics: Vec::new(),
        }
    }

    pub(crate) fn set_for(&self, kind: ComponentKind) -> Option<&ComponentSet> {
        match kind {
            ComponentKind::EventAlgorithm => Some(&self.algorithms),
            ComponentKind::ConditionsAlgorithm => Some(&self.conditions_algorithms),
            ComponentKind::Service => Some(&self.services),
            ComponentKind::PublicTool => Some(&self.public_tools),
            ComponentKind::PrivateTool => None,
        }
    }

    fn lookup(&self, kind: ComponentKind, name: &str) -> Option<&Component> {
        let id = self.set_for(kind)?.get(name)?;
        self.arena.get(id)
    }

    fn set_primary(&mut self, id: ComponentId) {
        if let Some(previous) = self.primary.filter(|p| *p != id) {
            let previous = self.arena.name(previous).to_string();
            let current = self.arena.name(id).to_string();
            self.diagnostics.push(Diagnostic::warning(
                DiagnosticKind::PrimaryOverwritten {
                    previous: previous.clone(),
                    current: current.clone(),
                },
                format!("primary component '{previous}' replaced by '{current}'"),
            ));
        }
        self.primary = Some(id);
    }

    /// Sequence names are unique across the whole main tree, not just among
    /// siblings, since lookups by name are depth first.
    fn add_sub_sequence(&mut self, node: SequenceNode, parent: Option<&str>) -> Result<()> {
        let count = node.all_algorithms().len();
        if count > 0 {
            return Err(ConfigError::PrepopulatedSequence {
                sequence: node.name().to_string(),
                count,
            });
        }

        let parent_name = parent.unwrap_or(self.main.name()).to_string();
        if self.main.find_sub_sequence(&parent_name).is_none() {
            return Err(ConfigError::SequenceNotFound { name: parent_name });
        }
        for name in node.flatten().into_keys() {
            if self.main.find_sub_sequence(&name).is_some() {
                let parent = self
                    .main
                    .parent_of(&name)
                    .unwrap_or("<top level>")
                    .to_string();
                return Err(ConfigError::SequenceAlreadyPresent { name, parent });
            }
        }
        node.check_consistency(&self.arena)?;

        if let Some(target) = self.main.find_sub_sequence_mut(&parent_name) {
            target.push_sequence(node);
        }
        Ok(())
    }

    fn add_event_algorithms(
        &mut self,
        algorithms: Vec<Component>,
        sequence: Option<&str>,
        primary: bool,
    ) -> Result<()> {
        for algo in &algorithms {
            expect_kind(algo, ComponentKind::EventAlgorithm)?;
        }
        let sequence_name = sequence.unwrap_or(self.main.name()).to_string();
        if self.main.find_sub_sequence(&sequence_name).is_none() {
            return Err(ConfigError::SequenceNotFound {
                name: sequence_name,
            });
        }

        let last = algorithms.last().map(|a| a.instance_name.clone());

        // Repeats within one call fold into their first occurrence.
        let mut batch: Vec<Component> = Vec::with_capacity(algorithms.len());
        let mut diagnostics = Vec::new();
        for algo in algorithms {
            match batch.iter_mut().find(|c| c.instance_name == algo.instance_name) {
                Some(slot) => {
                    let outcome = merge_component(slot, &algo)?;
                    diagnostics.extend(outcome.diagnostics);
                    *slot = outcome.merged;
                }
                None => batch.push(algo),
            }
        }

        let mut staged = Vec::with_capacity(batch.len());
        for algo in batch {
            let plan = self.algorithms.stage(&self.arena, algo)?;
            if let Some(id) = plan.existing() {
                self.main.check_append(&sequence_name, id, &self.arena)?;
            }
            staged.push(plan);
        }

        // Validated; nothing below fails.
        let mut first = None;
        for plan in staged {
            let reconciled = self.algorithms.commit(&mut self.arena, plan);
            diagnostics.extend(reconciled.diagnostics);
            if let Some(target) = self.main.find_sub_sequence_mut(&sequence_name) {
                target.push_algorithm(reconciled.id);
            }
            first.get_or_insert(reconciled.id);
        }
        self.diagnostics.extend(diagnostics);
        if last.is_some() {
            self.last_added = last;
        }

        if primary {
            if let Some(id) = first {
                self.set_primary(id);
            }
        }
        Ok(())
    }

    fn add_to_set(&mut self, component: Component, primary: bool) -> Result<ComponentId> {
        let name = component.instance_name.clone();
        let set = match component.kind {
            ComponentKind::EventAlgorithm => &mut self.algorithms,
            ComponentKind::ConditionsAlgorithm => &mut self.conditions_algorithms,
            ComponentKind::Service => &mut self.services,
            ComponentKind::PublicTool => &mut self.public_tools,
            ComponentKind::PrivateTool => {
                return Err(ConfigError::WrongKind {
                    component: component.full_name(),
                    expected: ComponentKind::PublicTool,
                    found: ComponentKind::PrivateTool,
                });
            }
        };
        let reconciled = set.reconcile(&mut self.arena, component)?;
        self.diagnostics.extend(reconciled.diagnostics);
        if primary {
            self.set_primary(reconciled.id);
        }
        self.last_added = Some(name);
        Ok(reconciled.id)
    }
}

/// Merge `value` into the application property `key`.
///
/// Absent keys are adopted, equal values are a no-op, lists are unioned, and
/// differing scalars conflict unless `overwrite` is set.
pub(crate) fn merge_app_property(
    properties: &mut BTreeMap<String, PropertyValue>,
    diagnostics: &mut Vec<Diagnostic>,
    key: &str,
    value: &PropertyValue,
    overwrite: bool,
) -> Result<()> {
    let merged = match (properties.get(key), value) {
        (None, _) => value.clone(),
        (Some(current), _) if current.same_value(value) => return Ok(()),
        (Some(_), _) if overwrite => value.clone(),
        (Some(PropertyValue::List(current)), PropertyValue::List(incoming)) => {
            diagnostics.push(Diagnostic::warning(
                DiagnosticKind::AppPropertyUnion {
                    key: key.to_string(),
                },
                format!("application property '{key}': merging lists"),
            ));
            PropertyValue::List(union(current, incoming))
        }
        (Some(current), _) => {
            return Err(ConfigError::PropertyConflict {
                key: key.to_string(),
                left: current.to_string(),
                right: value.to_string(),
            });
        }
    };
    properties.insert(key.to_string(), merged);
    Ok(())
}

fn expect_kind(component: &Component, expected: ComponentKind) -> Result<()> {
    if component.kind != expected {
        return Err(ConfigError::WrongKind {
            component: component.full_name(),
            expected,
            found: component.kind,
        });
    }
    Ok(())
}

/// A mergeable unit of partial configuration.
#[derive(Debug)]
pub struct Accumulator {
    pub(crate) id: Uuid,
    pub(crate) contents: Contents,
    pub(crate) merged: bool,
    pub(crate) launched: bool,
    pub(crate) mergeable: bool,
    leak_check: bool,
}

impl Accumulator {
    /// An empty accumulator using default settings.
    pub fn new() -> Self {
        Self::with_settings(&EngineSettings::default())
    }

    /// An empty accumulator whose main sequence follows `settings`.
    pub fn with_settings(settings: &EngineSettings) -> Self {
        let mut main = SequenceNode::new(settings.main_sequence.clone());
        main.flags.sequential = settings.main_sequence_sequential;
        Self {
            id: Uuid::new_v4(),
            contents: Contents::new(main),
            merged: false,
            launched: false,
            mergeable: true,
            leak_check: settings.leak_check,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn was_merged(&self) -> bool {
        self.merged
    }

    pub fn is_mergeable(&self) -> bool {
        self.mergeable
    }

    /// Nothing has been added: no components, sub-sequences, properties or
    /// pending tool.
    pub fn is_empty(&self) -> bool {
        let c = &self.contents;
        c.arena.is_empty()
            && c.main.is_empty()
            && c.dangling.is_empty()
            && c.properties.is_empty()
            && c.private_tools.is_none()
    }

    /// Apply `op` directly to the contents. `op` must validate before it
    /// mutates, so an error leaves nothing behind.
    fn apply<T>(&mut self, op: impl FnOnce(&mut Contents) -> Result<T>) -> Result<T> {
        let mark = self.contents.diagnostics.len();
        let value = op(&mut self.contents)?;
        for diagnostic in &self.contents.diagnostics[mark..] {
            diagnostic.emit();
        }
        Ok(value)
    }

    /// Apply `op` to a staged copy of the contents, committing on success.
    /// Used where validating up front would mean replaying the whole
    /// operation.
    pub(crate) fn transact<T>(&mut self, op: impl FnOnce(&mut Contents) -> Result<T>) -> Result<T> {
        let mut staged = self.contents.clone();
        let value = op(&mut staged)?;
        for diagnostic in &staged.diagnostics[self.contents.diagnostics.len()..] {
            diagnostic.emit();
        }
        self.contents = staged;
        Ok(value)
    }

    // ── Sequences ──────────────────────────────────────────────────

    /// The main sequence tree.
    pub fn main_sequence(&self) -> &SequenceNode {
        &self.contents.main
    }

    /// Top-level trees adopted from merges and not attached to the main tree.
    pub fn dangling_sequences(&self) -> &[SequenceNode] {
        &self.contents.dangling
    }

    /// Find a sequence by name in the main tree.
    pub fn sequence(&self, name: &str) -> Option<&SequenceNode> {
        self.contents.main.find_sub_sequence(name)
    }

    /// Attach an empty sequence under `parent` (the main sequence if `None`).
    pub fn add_sub_sequence(&mut self, node: SequenceNode, parent: Option<&str>) -> Result<()> {
        let name = node.name().to_string();
        self.apply(|c| c.add_sub_sequence(node, parent))?;
        debug!(unit = %self.id, sequence = %name, parent = ?parent, "Sub-sequence added");
        Ok(())
    }

    /// Raw structural access for external tooling. The unit can no longer be
    /// merged as a child afterwards.
    pub fn edit_sequence(&mut self, name: &str) -> Option<&mut SequenceNode> {
        let found = self.contents.main.find_sub_sequence_mut(name)?;
        self.mergeable = false;
        warn!(unit = %self.id, sequence = %name, "Sequence edited directly; unit marked non-mergeable");
        Some(found)
    }

    // ── Components ─────────────────────────────────────────────────

    /// Add one event algorithm to `sequence` (the main sequence if `None`).
    pub fn add_event_algorithm(
        &mut self,
        algorithm: Component,
        sequence: Option<&str>,
        primary: bool,
    ) -> Result<()> {
        self.add_event_algorithms(vec![algorithm], sequence, primary)
    }

    /// Add event algorithms to `sequence`, each reconciled into the registry
    /// and appended unless already a direct child there. With `primary`, the
    /// first becomes the primary component.
    pub fn add_event_algorithms(
        &mut self,
        algorithms: Vec<Component>,
        sequence: Option<&str>,
        primary: bool,
    ) -> Result<()> {
        let count = algorithms.len();
        self.apply(|c| c.add_event_algorithms(algorithms, sequence, primary))?;
        debug!(unit = %self.id, count, sequence = ?sequence, "Event algorithms added");
        Ok(())
    }

    /// Reconcile an event algorithm into the registry without attaching it to
    /// any sequence. It must be attached before this unit is merged.
    pub fn register_event_algorithm(&mut self, algorithm: Component) -> Result<()> {
        expect_kind(&algorithm, ComponentKind::EventAlgorithm)?;
        self.apply(|c| c.add_to_set(algorithm, false))?;
        Ok(())
    }

    pub fn add_conditions_algorithm(&mut self, algorithm: Component, primary: bool) -> Result<()> {
        expect_kind(&algorithm, ComponentKind::ConditionsAlgorithm)?;
        self.apply(|c| c.add_to_set(algorithm, primary))?;
        Ok(())
    }

    /// Add a service. With `create`, the service is instantiated eagerly
    /// rather than merely declared available.
    pub fn add_service(&mut self, service: Component, primary: bool, create: bool) -> Result<()> {
        expect_kind(&service, ComponentKind::Service)?;
        let name = service.instance_name.clone();
        self.apply(|c| {
            c.add_to_set(service, primary)?;
            if create && !c.services_to_create.contains(&name) {
                c.services_to_create.push(name.clone());
            }
            Ok(())
        })?;
        debug!(unit = %self.id, service = %name, create, "Service added");
        Ok(())
    }

    pub fn add_public_tool(&mut self, tool: Component, primary: bool) -> Result<()> {
        expect_kind(&tool, ComponentKind::PublicTool)?;
        self.apply(|c| c.add_to_set(tool, primary))?;
        Ok(())
    }

    pub fn event_algorithm(&self, name: &str) -> Option<&Component> {
        self.contents.lookup(ComponentKind::EventAlgorithm, name)
    }

    /// Edit a registered algorithm's properties in place; every sequence
    /// position holding it observes the change. Renaming or retyping it is
    /// rejected and leaves the algorithm untouched.
    pub fn edit_event_algorithm(
        &mut self,
        name: &str,
        edit: impl FnOnce(&mut Component),
    ) -> Result<()> {
        let not_found = || ConfigError::ComponentNotFound {
            kind: ComponentKind::EventAlgorithm,
            name: name.to_string(),
        };
        let id = self.contents.algorithms.get(name).ok_or_else(not_found)?;
        let slot = self.contents.arena.get_mut(id).ok_or_else(not_found)?;

        let mut edited = slot.clone();
        edit(&mut edited);
        if edited.kind != slot.kind
            || edited.type_name != slot.type_name
            || edited.instance_name != slot.instance_name
        {
            return Err(ConfigError::IdentityChanged {
                component: slot.full_name(),
                edited: edited.full_name(),
            });
        }
        *slot = edited;
        Ok(())
    }

    pub fn conditions_algorithm(&self, name: &str) -> Option<&Component> {
        self.contents.lookup(ComponentKind::ConditionsAlgorithm, name)
    }

    pub fn service(&self, name: &str) -> Option<&Component> {
        self.contents.lookup(ComponentKind::Service, name)
    }

    pub fn public_tool(&self, name: &str) -> Option<&Component> {
        self.contents.lookup(ComponentKind::PublicTool, name)
    }

    /// All components of `kind`, in insertion order.
    pub fn components(&self, kind: ComponentKind) -> Vec<&Component> {
        match self.contents.set_for(kind) {
            Some(set) => set
                .ids()
                .iter()
                .filter_map(|id| self.contents.arena.get(*id))
                .collect(),
            None => self
                .contents
                .private_tools
                .as_ref()
                .map(|t| t.components().iter().collect())
                .unwrap_or_default(),
        }
    }

    /// Services flagged to be created eagerly, in the order they were flagged.
    pub fn services_to_create(&self) -> &[String] {
        &self.contents.services_to_create
    }

    /// Resolve a sequence leaf to its algorithm.
    pub fn resolve(&self, id: ComponentId) -> Option<&Component> {
        self.contents.arena.get(id)
    }

    /// For every sequence in the main tree, the names of the algorithms it
    /// reaches.
    pub fn flattened_sequences(&self) -> BTreeMap<String, Vec<String>> {
        self.contents
            .main
            .flatten()
            .into_iter()
            .map(|(seq, ids)| {
                let names = ids
                    .into_iter()
                    .map(|id| self.contents.arena.name(id).to_string())
                    .collect();
                (seq, names)
            })
            .collect()
    }

    // ── Private tool and primary ───────────────────────────────────

    /// Stage a private tool (or list of them) for the caller to pop.
    pub fn set_private_tool(&mut self, tools: impl Into<PrivateTools>) -> Result<()> {
        let tools = tools.into();
        if let Some(pending) = &self.contents.private_tools {
            return Err(ConfigError::PrivateToolAlreadySet {
                pending: pending.describe(),
            });
        }
        for tool in tools.components() {
            expect_kind(tool, ComponentKind::PrivateTool)?;
        }
        debug!(unit = %self.id, tool = %tools.describe(), "Private tool staged");
        self.contents.private_tools = Some(tools);
        Ok(())
    }

    /// Take ownership of the pending private tool, leaving the slot empty.
    pub fn pop_private_tool(&mut self) -> Option<PrivateTools> {
        self.contents.private_tools.take()
    }

    /// The pending private tool (popped), else the primary component.
    pub fn get_primary(&mut self) -> Result<Primary> {
        if let Some(tools) = self.pop_private_tool() {
            return Ok(Primary::PrivateTools(tools));
        }
        self.contents
            .primary
            .and_then(|id| self.contents.arena.get(id))
            .cloned()
            .map(Primary::Component)
            .ok_or(ConfigError::NoPrimary)
    }

    /// Name of the primary component, if one was recorded.
    pub fn primary_name(&self) -> Option<&str> {
        self.contents.primary.map(|id| self.contents.arena.name(id))
    }

    pub(crate) fn primary_key(&self) -> Option<(ComponentKind, String)> {
        let id = self.contents.primary?;
        let component = self.contents.arena.get(id)?;
        Some((component.kind, component.instance_name.clone()))
    }

    pub(crate) fn find_component(&self, kind: ComponentKind, name: &str) -> Option<&Component> {
        self.contents.lookup(kind, name)
    }

    // ── Application properties ─────────────────────────────────────

    /// Set an application-wide property. A differing scalar fails unless
    /// `overwrite`; lists are unioned.
    pub fn set_app_property(
        &mut self,
        key: &str,
        value: impl Into<PropertyValue>,
        overwrite: bool,
    ) -> Result<()> {
        let value = value.into();
        self.apply(|c| {
            merge_app_property(&mut c.properties, &mut c.diagnostics, key, &value, overwrite)
        })
    }

    pub fn app_property(&self, key: &str) -> Option<&PropertyValue> {
        self.contents.properties.get(key)
    }

    pub fn app_properties(&self) -> &BTreeMap<String, PropertyValue> {
        &self.contents.properties
    }

    // ── Introspection ──────────────────────────────────────────────

    /// Every data handle declared by any component this unit holds.
    pub fn data_dependencies(&self) -> Vec<DeclaredDependency> {
        let kinds = [
            ComponentKind::EventAlgorithm,
            ComponentKind::ConditionsAlgorithm,
            ComponentKind::Service,
            ComponentKind::PublicTool,
            ComponentKind::PrivateTool,
        ];
        kinds
            .into_iter()
            .flat_map(|kind| self.components(kind))
            .flat_map(|component| {
                let name = component.full_name();
                component
                    .data_dependencies()
                    .into_iter()
                    .map(move |handle| DeclaredDependency {
                        component: name.clone(),
                        handle,
                    })
            })
            .collect()
    }

    /// Diagnostics recorded by this unit and every unit merged into it.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.contents.diagnostics
    }

    /// Name of the component most recently added (diagnostic aid).
    pub fn last_added(&self) -> Option<&str> {
        self.contents.last_added.as_deref()
    }

    /// Problems that would be reported if this unit were dropped now.
    pub fn leak_report(&self) -> Vec<Diagnostic> {
        let unit = self.id.to_string();
        let mut report = Vec::new();
        if let Some(tools) = &self.contents.private_tools {
            report.push(Diagnostic::error(
                DiagnosticKind::LeakedPrivateTool {
                    unit: unit.clone(),
                    tool: tools.describe(),
                },
                format!("unit {unit} dropped with private tool {} still pending", tools.describe()),
            ));
        }
        if !self.merged && !self.launched && !self.is_empty() {
            report.push(Diagnostic::error(
                DiagnosticKind::UnmergedUnit { unit: unit.clone() },
                format!("unit {unit} was never merged or launched"),
            ));
        }
        report
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Accumulator {
    fn drop(&mut self) {
        if !self.leak_check {
            return;
        }
        for diagnostic in self.leak_report() {
            diagnostic.emit();
        }
    }
}
