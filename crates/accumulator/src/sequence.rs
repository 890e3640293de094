//! Sequence tree: ordered groups of event algorithms.
//!
//! A [`SequenceNode`] is a named group whose children are either nested
//! sequences or references to event algorithms held in a
//! [`ComponentArena`]. Children keep insertion order exactly; execution order
//! depends on it.
//!
//! The merge functions here are pure with respect to logging: algorithm
//! reconciliation is delegated to a caller-supplied resolver, so the
//! structural decisions can be tested without an accumulator.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use confweave_core::{ComponentArena, ComponentId, ConfigError, Result};

/// Execution-mode flags of a sequence. Two same-named sequences must agree
/// on all of them to merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceFlags {
    /// Run children one after another (otherwise in parallel).
    pub sequential: bool,
    /// Pass if any child passes (otherwise all must).
    pub mode_or: bool,
    /// Keep running children after one fails its filter.
    pub stop_override: bool,
    /// Ignore children's filter decisions entirely.
    pub ignore_filter_passed: bool,
}

impl Default for SequenceFlags {
    fn default() -> Self {
        Self {
            sequential: false,
            mode_or: false,
            stop_override: true,
            ignore_filter_passed: false,
        }
    }
}

impl SequenceFlags {
    /// First flag on which `self` and `other` differ.
    fn first_difference(&self, other: &Self) -> Option<(&'static str, bool, bool)> {
        [
            ("Sequential", self.sequential, other.sequential),
            ("ModeOR", self.mode_or, other.mode_or),
            ("StopOverride", self.stop_override, other.stop_override),
            (
                "IgnoreFilterPassed",
                self.ignore_filter_passed,
                other.ignore_filter_passed,
            ),
        ]
        .into_iter()
        .find(|(_, a, b)| a != b)
    }
}

/// A child of a sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceChild {
    Sequence(SequenceNode),
    Algorithm(ComponentId),
}

/// A named group of sequences and algorithms.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceNode {
    name: String,
    pub flags: SequenceFlags,
    children: Vec<SequenceChild>,
}

impl SequenceNode {
    /// A parallel AND sequence.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: SequenceFlags::default(),
            children: Vec::new(),
        }
    }

    /// A sequence that runs its children in order.
    pub fn sequential(name: impl Into<String>) -> Self {
        let mut seq = Self::new(name);
        seq.flags.sequential = true;
        seq
    }

    pub fn with_flags(mut self, flags: SequenceFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Builder-style nested sequence. Only empty containers can be built this
    /// way; algorithms are attached through the accumulator.
    pub fn with_sub_sequence(mut self, child: SequenceNode) -> Self {
        self.children.push(SequenceChild::Sequence(child));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> &[SequenceChild] {
        &self.children
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Remove the direct child sequence `name`. Returns whether one existed.
    pub fn remove_sub_sequence(&mut self, name: &str) -> bool {
        let before = self.children.len();
        self.children
            .retain(|c| !matches!(c, SequenceChild::Sequence(s) if s.name == name));
        self.children.len() < before
    }

    pub(crate) fn push_sequence(&mut self, child: SequenceNode) {
        self.children.push(SequenceChild::Sequence(child));
    }

    /// Append an algorithm unless it is already a direct child.
    /// Returns whether it was appended.
    pub(crate) fn push_algorithm(&mut self, id: ComponentId) -> bool {
        if self.has_algorithm(id) {
            return false;
        }
        self.children.push(SequenceChild::Algorithm(id));
        true
    }

    pub fn has_algorithm(&self, id: ComponentId) -> bool {
        self.children
            .iter()
            .any(|c| matches!(c, SequenceChild::Algorithm(a) if *a == id))
    }

    /// Direct algorithm children, in order.
    pub fn algorithms(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.children.iter().filter_map(|c| match c {
            SequenceChild::Algorithm(id) => Some(*id),
            SequenceChild::Sequence(_) => None,
        })
    }

    /// Direct sub-sequences, in order.
    pub fn sub_sequences(&self) -> impl Iterator<Item = &SequenceNode> + '_ {
        self.children.iter().filter_map(|c| match c {
            SequenceChild::Sequence(s) => Some(s),
            SequenceChild::Algorithm(_) => None,
        })
    }

    /// Every algorithm anywhere in this tree, depth first.
    pub fn all_algorithms(&self) -> Vec<ComponentId> {
        let mut out = Vec::new();
        self.collect_algorithms(&mut out);
        out
    }

    fn collect_algorithms(&self, out: &mut Vec<ComponentId>) {
        for child in &self.children {
            match child {
                SequenceChild::Algorithm(id) => out.push(*id),
                SequenceChild::Sequence(s) => s.collect_algorithms(out),
            }
        }
    }

    /// Depth-first search by name, including this node.
    pub fn find_sub_sequence(&self, name: &str) -> Option<&SequenceNode> {
        if self.name == name {
            return Some(self);
        }
        self.sub_sequences().find_map(|s| s.find_sub_sequence(name))
    }

    /// Depth-first search by name, including this node.
    pub fn find_sub_sequence_mut(&mut self, name: &str) -> Option<&mut SequenceNode> {
        if self.name == name {
            return Some(self);
        }
        self.find_descendant_mut(name)
    }

    /// Depth-first search by name among descendants only.
    fn find_descendant_mut(&mut self, name: &str) -> Option<&mut SequenceNode> {
        for child in &mut self.children {
            if let SequenceChild::Sequence(s) = child {
                if let Some(found) = s.find_sub_sequence_mut(name) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Push onto `chain` the nodes from `self` down to the first sequence
    /// named `target`, depth first. Leaves `chain` as it was on a miss.
    fn chain_to<'a>(&'a self, target: &str, chain: &mut Vec<&'a SequenceNode>) -> bool {
        chain.push(self);
        if self.name == target {
            return true;
        }
        if self.sub_sequences().any(|sub| sub.chain_to(target, chain)) {
            return true;
        }
        chain.pop();
        false
    }

    /// Name of the sequence directly holding `name`. `None` if `name` is
    /// this node or absent.
    pub fn parent_of(&self, name: &str) -> Option<&str> {
        let mut chain = Vec::new();
        if !self.chain_to(name, &mut chain) {
            return None;
        }
        chain.len().checked_sub(2).map(|i| chain[i].name())
    }

    /// Fail if appending `id` to the sequence `target` would put it twice on
    /// one root-to-leaf path. Appending to a sequence that already holds it
    /// directly is a no-op and always passes.
    pub fn check_append(&self, target: &str, id: ComponentId, arena: &ComponentArena) -> Result<()> {
        let mut chain = Vec::new();
        if !self.chain_to(target, &mut chain) {
            return Err(ConfigError::SequenceNotFound {
                name: target.to_string(),
            });
        }
        let Some(node) = chain.last() else {
            return Ok(());
        };
        if node.has_algorithm(id) {
            return Ok(());
        }

        let above = chain.iter().any(|n| n.has_algorithm(id));
        let below = node.sub_sequences().any(|s| s.all_algorithms().contains(&id));
        if above || below {
            let path: Vec<&str> = chain.iter().map(|n| n.name()).collect();
            return Err(ConfigError::DuplicateAlgorithm {
                algorithm: arena.name(id).to_string(),
                path: path.join("/"),
            });
        }
        Ok(())
    }

    /// For every named group, the algorithms reachable from it in order.
    pub fn flatten(&self) -> BTreeMap<String, Vec<ComponentId>> {
        let mut out = BTreeMap::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut BTreeMap<String, Vec<ComponentId>>) {
        out.insert(self.name.clone(), self.all_algorithms());
        for sub in self.sub_sequences() {
            sub.flatten_into(out);
        }
    }

    /// Check that no algorithm appears twice along any root-to-leaf path and
    /// that no sequence is nested inside a same-named one.
    pub fn check_consistency(&self, arena: &ComponentArena) -> Result<()> {
        let mut path = Vec::new();
        let mut seen = HashSet::new();
        self.check_path(arena, &mut path, &mut seen)
    }

    fn check_path(
        &self,
        arena: &ComponentArena,
        path: &mut Vec<String>,
        seen: &mut HashSet<ComponentId>,
    ) -> Result<()> {
        if path.contains(&self.name) {
            return Err(ConfigError::DuplicateSequence {
                name: self.name.clone(),
                path: path.join("/"),
            });
        }
        path.push(self.name.clone());

        let mut added = Vec::new();
        for id in self.algorithms() {
            if !seen.insert(id) {
                return Err(ConfigError::DuplicateAlgorithm {
                    algorithm: arena.name(id).to_string(),
                    path: path.join("/"),
                });
            }
            added.push(id);
        }

        for sub in self.sub_sequences() {
            sub.check_path(arena, path, seen)?;
        }

        for id in added {
            seen.remove(&id);
        }
        path.pop();
        Ok(())
    }

    /// Copy of this tree with every algorithm reference passed through
    /// `resolve`.
    pub(crate) fn remap(
        &self,
        resolve: &mut dyn FnMut(ComponentId) -> Result<ComponentId>,
    ) -> Result<SequenceNode> {
        let mut children = Vec::with_capacity(self.children.len());
        for child in &self.children {
            children.push(match child {
                SequenceChild::Algorithm(id) => SequenceChild::Algorithm(resolve(*id)?),
                SequenceChild::Sequence(s) => SequenceChild::Sequence(s.remap(resolve)?),
            });
        }
        Ok(SequenceNode {
            name: self.name.clone(),
            flags: self.flags,
            children,
        })
    }

    /// Fail unless `other` has identical flags.
    pub fn check_flags(&self, other: &SequenceNode) -> Result<()> {
        match self.flags.first_difference(&other.flags) {
            Some((property, left, right)) => Err(ConfigError::SequencePropertyConflict {
                sequence: self.name.clone(),
                property: property.to_string(),
                left,
                right,
            }),
            None => Ok(()),
        }
    }

    /// Serializable outline of the tree with algorithm names.
    pub fn outline(&self, arena: &ComponentArena) -> SequenceOutline {
        SequenceOutline {
            name: self.name.clone(),
            flags: self.flags,
            members: self
                .children
                .iter()
                .map(|c| match c {
                    SequenceChild::Algorithm(id) => OutlineMember::Algorithm {
                        name: arena.name(*id).to_string(),
                    },
                    SequenceChild::Sequence(s) => OutlineMember::Sequence(s.outline(arena)),
                })
                .collect(),
        }
    }
}

/// Structurally merge `src` into `dest`.
///
/// Sub-sequences with a same-named counterpart under `dest` are merged
/// recursively once their flags are checked; unmatched ones are adopted
/// whole. Algorithm references are passed through `resolve`, which maps
/// them into `dest`'s arena, and appended only if not already a direct
/// child.
pub fn merge_sequences(
    dest: &mut SequenceNode,
    src: &SequenceNode,
    resolve: &mut dyn FnMut(ComponentId) -> Result<ComponentId>,
) -> Result<()> {
    for child in &src.children {
        match child {
            SequenceChild::Sequence(sub) => {
                if let Some(existing) = dest.find_descendant_mut(&sub.name) {
                    existing.check_flags(sub)?;
                    merge_sequences(existing, sub, resolve)?;
                } else {
                    let adopted = sub.remap(resolve)?;
                    dest.push_sequence(adopted);
                }
            }
            SequenceChild::Algorithm(id) => {
                let resolved = resolve(*id)?;
                dest.push_algorithm(resolved);
            }
        }
    }
    Ok(())
}

/// A serializable view of a sequence tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceOutline {
    pub name: String,
    pub flags: SequenceFlags,
    pub members: Vec<OutlineMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutlineMember {
    Algorithm { name: String },
    Sequence(SequenceOutline),
}
