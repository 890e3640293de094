//! Deduplication engine for components that share an identity.
//!
//! Components live in a [`ComponentArena`] and every collection holds
//! [`ComponentId`]s into it, so reconciling into an existing slot is seen by
//! every holder of that id. A [`ComponentSet`] is one such collection, keyed
//! by instance name.
//!
//! [`merge_component`] is the pure decision function:
//!
//! | existing | candidate | result |
//! |----------|-----------|--------|
//! | unset / default | explicit | adopt candidate |
//! | explicit | equal | keep |
//! | list | different list | union, warn |
//! | component | component, same name | recurse |
//! | scalar | different scalar | [`ConflictError::PropertyMismatch`] |

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::component::{Component, ComponentKind, Property, PropertyValue};
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::error::ConflictError;

/// Index of a component slot in a [`ComponentArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(usize);

/// Owns every component an accumulator knows about.
#[derive(Debug, Clone, Default)]
pub struct ComponentArena {
    slots: Vec<Component>,
}

impl ComponentArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, component: Component) -> ComponentId {
        self.slots.push(component);
        ComponentId(self.slots.len() - 1)
    }

    pub fn get(&self, id: ComponentId) -> Option<&Component> {
        self.slots.get(id.0)
    }

    pub fn get_mut(&mut self, id: ComponentId) -> Option<&mut Component> {
        self.slots.get_mut(id.0)
    }

    /// Instance name of a slot, or `"?"` for an id from another arena.
    pub fn name(&self, id: ComponentId) -> &str {
        self.get(id).map_or("?", |c| c.instance_name.as_str())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Result of reconciling a candidate into a [`ComponentSet`].
#[derive(Debug)]
pub struct Reconciliation {
    pub id: ComponentId,
    /// `true` if the candidate was new to the set.
    pub inserted: bool,
    pub diagnostics: Vec<Diagnostic>,
}

/// The outcome of [`merge_component`].
#[derive(Debug)]
pub struct MergeOutcome {
    pub merged: Component,
    pub diagnostics: Vec<Diagnostic>,
}

/// A reconciliation decided by [`ComponentSet::stage`] but not yet applied.
#[derive(Debug)]
pub struct Staged {
    slot: Option<ComponentId>,
    component: Component,
    pub diagnostics: Vec<Diagnostic>,
}

impl Staged {
    /// The slot this candidate merges into, if the set already holds its name.
    pub fn existing(&self) -> Option<ComponentId> {
        self.slot
    }
}

/// An insertion-ordered collection of components of one kind, unique by
/// instance name.
#[derive(Debug, Clone)]
pub struct ComponentSet {
    kind: ComponentKind,
    order: Vec<ComponentId>,
    by_name: HashMap<String, ComponentId>,
}

impl ComponentSet {
    pub fn new(kind: ComponentKind) -> Self {
        Self {
            kind,
            order: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn get(&self, name: &str) -> Option<ComponentId> {
        self.by_name.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> &[ComponentId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Decide how `candidate` reconciles with this set without touching it.
    pub fn stage(&self, arena: &ComponentArena, candidate: Component) -> Result<Staged, ConflictError> {
        if candidate.kind != self.kind {
            return Err(ConflictError::KindMismatch {
                instance: candidate.instance_name,
                existing: self.kind,
                candidate: candidate.kind,
            });
        }

        if let Some(id) = self.get(&candidate.instance_name) {
            if let Some(existing) = arena.get(id) {
                let outcome = merge_component(existing, &candidate)?;
                return Ok(Staged {
                    slot: Some(id),
                    component: outcome.merged,
                    diagnostics: outcome.diagnostics,
                });
            }
        }
        Ok(Staged {
            slot: None,
            component: candidate,
            diagnostics: Vec::new(),
        })
    }

    /// Apply a staged reconciliation. Cannot fail.
    pub fn commit(&mut self, arena: &mut ComponentArena, staged: Staged) -> Reconciliation {
        if let Some(id) = staged.slot {
            if let Some(slot) = arena.get_mut(id) {
                *slot = staged.component;
                return Reconciliation {
                    id,
                    inserted: false,
                    diagnostics: staged.diagnostics,
                };
            }
        }

        let name = staged.component.instance_name.clone();
        let id = arena.insert(staged.component);
        if self.by_name.insert(name, id).is_none() {
            self.order.push(id);
        }
        Reconciliation {
            id,
            inserted: true,
            diagnostics: staged.diagnostics,
        }
    }

    /// Insert `candidate`, or merge it into the same-named member.
    ///
    /// On conflict neither the arena nor the set is touched.
    pub fn reconcile(
        &mut self,
        arena: &mut ComponentArena,
        candidate: Component,
    ) -> Result<Reconciliation, ConflictError> {
        let staged = self.stage(arena, candidate)?;
        Ok(self.commit(arena, staged))
    }
}

/// Merge `candidate` into a copy of `existing`.
///
/// Pure: neither input is modified, and the merged value is returned only if
/// every property reconciles.
pub fn merge_component(
    existing: &Component,
    candidate: &Component,
) -> Result<MergeOutcome, ConflictError> {
    if existing.kind != candidate.kind {
        return Err(ConflictError::KindMismatch {
            instance: existing.instance_name.clone(),
            existing: existing.kind,
            candidate: candidate.kind,
        });
    }
    if existing.type_name != candidate.type_name {
        return Err(ConflictError::TypeMismatch {
            instance: existing.instance_name.clone(),
            existing: existing.type_name.clone(),
            candidate: candidate.type_name.clone(),
        });
    }

    let mut merged = existing.clone();
    let mut diagnostics = Vec::new();
    let component = existing.full_name();

    for (name, incoming) in candidate.properties() {
        let props = merged.properties_mut();
        let Some(current) = props.get(name) else {
            props.insert(name.to_string(), incoming.clone());
            continue;
        };

        if !incoming.explicit {
            continue;
        }
        if !current.explicit {
            props.insert(name.to_string(), incoming.clone());
            continue;
        }
        if current.value.same_value(&incoming.value) {
            continue;
        }

        let value = merge_values(&component, name, &current.value, &incoming.value, &mut diagnostics)?;
        props.insert(
            name.to_string(),
            Property {
                value,
                explicit: true,
            },
        );
    }

    Ok(MergeOutcome {
        merged,
        diagnostics,
    })
}

/// Reconcile two different explicit values of one property.
fn merge_values(
    component: &str,
    property: &str,
    left: &PropertyValue,
    right: &PropertyValue,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<PropertyValue, ConflictError> {
    match (left, right) {
        (PropertyValue::List(a), PropertyValue::List(b)) => {
            diagnostics.push(Diagnostic::warning(
                DiagnosticKind::ListUnion {
                    component: component.to_string(),
                    property: property.to_string(),
                },
                format!("{component}.{property}: merging {left} with {right}"),
            ));
            Ok(PropertyValue::List(union(a, b)))
        }
        (PropertyValue::Component(a), PropertyValue::Component(b))
            if a.instance_name == b.instance_name =>
        {
            let outcome = merge_component(a, b)?;
            diagnostics.extend(outcome.diagnostics);
            Ok(PropertyValue::Component(Box::new(outcome.merged)))
        }
        (PropertyValue::ComponentList(a), PropertyValue::ComponentList(b)) => {
            let mut out = a.clone();
            for incoming in b {
                match out
                    .iter_mut()
                    .find(|c| c.instance_name == incoming.instance_name)
                {
                    Some(slot) => {
                        let outcome = merge_component(slot, incoming)?;
                        diagnostics.extend(outcome.diagnostics);
                        *slot = outcome.merged;
                    }
                    None => out.push(incoming.clone()),
                }
            }
            Ok(PropertyValue::ComponentList(out))
        }
        _ => Err(ConflictError::PropertyMismatch {
            component: component.to_string(),
            property: property.to_string(),
            left: left.to_string(),
            right: right.to_string(),
        }),
    }
}

/// Union preserving first-seen order.
pub fn union(left: &[PropertyValue], right: &[PropertyValue]) -> Vec<PropertyValue> {
    let mut out = left.to_vec();
    for item in right {
        if !out.iter().any(|v| v.same_value(item)) {
            out.push(item.clone());
        }
    }
    out
}
