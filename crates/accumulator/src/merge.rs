//! Merge algorithm: folding one accumulator into another.
//!
//! [`Contents::absorb`] does the structural work on a staged copy of the
//! parent; [`Accumulator::merge`] and friends check the preconditions, commit
//! the staged copy, and redirect the child's entries to the parent's
//! reconciled components.

use std::collections::HashMap;
use tracing::info;

use confweave_core::{ComponentId, ComponentKind, ConfigError, Result};

use crate::accumulator::{Accumulator, Contents, Primary, PrivateTools, merge_app_property};
use crate::sequence::{SequenceNode, merge_sequences};

/// Find a sequence named `name` in the main tree, else in the dangling forest.
fn find_top<'a>(
    main: &'a mut SequenceNode,
    dangling: &'a mut [SequenceNode],
    name: &str,
) -> Option<&'a mut SequenceNode> {
    if main.find_sub_sequence(name).is_some() {
        return main.find_sub_sequence_mut(name);
    }
    dangling
        .iter_mut()
        .find_map(|tree| tree.find_sub_sequence_mut(name))
}

impl Contents {
    /// Merge `other` into `self`. Returns how `other`'s algorithm ids map
    /// onto `self`'s.
    ///
    /// With `destination`, `other`'s main tree is merged under that sequence
    /// instead of a same-named one. Dangling trees are never redirected.
    pub(crate) fn absorb(
        &mut self,
        other: &Contents,
        destination: Option<&str>,
    ) -> Result<HashMap<ComponentId, ComponentId>> {
        let Contents {
            arena,
            main,
            dangling,
            algorithms,
            diagnostics,
            ..
        } = &mut *self;

        let mut remap: HashMap<ComponentId, ComponentId> = HashMap::new();
        let mut resolve = |id: ComponentId| -> Result<ComponentId> {
            if let Some(mapped) = remap.get(&id) {
                return Ok(*mapped);
            }
            let component = other.arena.get(id).cloned().ok_or_else(|| {
                ConfigError::OrphanedAlgorithm {
                    name: other.arena.name(id).to_string(),
                }
            })?;
            let reconciled = algorithms.reconcile(arena, component)?;
            diagnostics.extend(reconciled.diagnostics);
            remap.insert(id, reconciled.id);
            Ok(reconciled.id)
        };

        let trees = std::iter::once((&other.main, destination))
            .chain(other.dangling.iter().map(|tree| (tree, None)));
        for (tree, redirect) in trees {
            let target = redirect.unwrap_or(tree.name());
            match find_top(main, dangling, target) {
                Some(dest) => {
                    if redirect.is_none() {
                        dest.check_flags(tree)?;
                    }
                    merge_sequences(dest, tree, &mut resolve)?;
                }
                None if redirect.is_some() => {
                    return Err(ConfigError::SequenceNotFound {
                        name: target.to_string(),
                    });
                }
                None => {
                    let adopted = tree.remap(&mut resolve)?;
                    dangling.push(adopted);
                }
            }
        }

        self.main.check_consistency(&self.arena)?;
        for tree in &self.dangling {
            tree.check_consistency(&self.arena)?;
        }

        // Everything in other's registry must have come through a tree.
        for id in other.algorithms.ids() {
            if !remap.contains_key(id) {
                return Err(ConfigError::OrphanedAlgorithm {
                    name: other.arena.name(*id).to_string(),
                });
            }
        }

        let sets = [
            (&other.conditions_algorithms, &mut self.conditions_algorithms),
            (&other.services, &mut self.services),
            (&other.public_tools, &mut self.public_tools),
        ];
        for (from, into) in sets {
            for id in from.ids() {
                let Some(component) = other.arena.get(*id) else {
                    continue;
                };
                let reconciled = into.reconcile(&mut self.arena, component.clone())?;
                self.diagnostics.extend(reconciled.diagnostics);
            }
        }
        for name in &other.services_to_create {
            if !self.services_to_create.contains(name) {
                self.services_to_create.push(name.clone());
            }
        }

        for (key, value) in &other.properties {
            merge_app_property(&mut self.properties, &mut self.diagnostics, key, value, false)?;
        }

        if other.last_added.is_some() {
            self.last_added.clone_from(&other.last_added);
        }
        Ok(remap)
    }
}

impl Accumulator {
    /// Merge `other` into this accumulator.
    ///
    /// On success `other` is marked merged and its registries are refreshed
    /// from this unit. On failure neither side is modified.
    pub fn merge(&mut self, other: &mut Accumulator) -> Result<()> {
        self.merge_with(other, None)
    }

    /// Merge `other`, placing its main sequence's contents under the
    /// sequence named `destination`.
    pub fn merge_into_sequence(&mut self, other: &mut Accumulator, destination: &str) -> Result<()> {
        self.merge_with(other, Some(destination))
    }

    /// Merge a unit a builder may have failed to return.
    pub fn merge_optional(&mut self, other: Option<&mut Accumulator>) -> Result<()> {
        match other {
            Some(other) => self.merge(other),
            None => Err(ConfigError::AlreadyMerged {
                unit: "<none>".into(),
            }),
        }
    }

    /// Pop `other`'s private tool, merge the rest, and hand the tool back.
    pub fn merge_and_pop_tool(&mut self, mut other: Accumulator) -> Result<PrivateTools> {
        let tool = other.pop_private_tool();
        self.merge(&mut other)?;
        tool.ok_or(ConfigError::NoPrimary)
    }

    /// Merge `other` and return its primary output: its pending private tool
    /// if it had one, else this unit's reconciled copy of its primary
    /// component.
    pub fn merge_and_get_primary(&mut self, mut other: Accumulator) -> Result<Primary> {
        let tool = other.pop_private_tool();
        let primary = other.primary_key();
        self.merge(&mut other)?;

        if let Some(tools) = tool {
            return Ok(Primary::PrivateTools(tools));
        }
        primary
            .and_then(|(kind, name)| self.find_component(kind, &name))
            .cloned()
            .map(Primary::Component)
            .ok_or(ConfigError::NoPrimary)
    }

    fn merge_with(&mut self, other: &mut Accumulator, destination: Option<&str>) -> Result<()> {
        if other.merged {
            return Err(ConfigError::AlreadyMerged {
                unit: other.id.to_string(),
            });
        }
        if let Some(tools) = &other.contents.private_tools {
            return Err(ConfigError::UnpoppedPrivateTool {
                tool: tools.describe(),
            });
        }
        if !other.mergeable {
            return Err(ConfigError::NonMergeableUnit {
                unit: other.id.to_string(),
            });
        }

        let remap = self.transact(|c| c.absorb(&other.contents, destination))?;

        self.contents
            .diagnostics
            .extend(other.contents.diagnostics.iter().cloned());
        other.redirect_to(self, &remap);
        other.merged = true;

        info!(
            unit = %self.id,
            child = %other.id,
            algorithms = remap.len(),
            destination = ?destination,
            "Merged accumulator"
        );
        Ok(())
    }

    /// Point every component this (merged) unit holds at the parent's
    /// reconciled state.
    fn redirect_to(&mut self, parent: &Accumulator, remap: &HashMap<ComponentId, ComponentId>) {
        for (from, to) in remap {
            if let (Some(slot), Some(merged)) = (
                self.contents.arena.get_mut(*from),
                parent.contents.arena.get(*to),
            ) {
                *slot = merged.clone();
            }
        }

        for kind in [
            ComponentKind::ConditionsAlgorithm,
            ComponentKind::Service,
            ComponentKind::PublicTool,
        ] {
            let ids = match self.contents.set_for(kind) {
                Some(set) => set.ids().to_vec(),
                None => continue,
            };
            for id in ids {
                let name = self.contents.arena.name(id).to_string();
                if let (Some(slot), Some(merged)) = (
                    self.contents.arena.get_mut(id),
                    parent.find_component(kind, &name),
                ) {
                    *slot = merged.clone();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confweave_config::EngineSettings;
    use confweave_core::{Component, PropertyValue};

    fn unit() -> Accumulator {
        Accumulator::with_settings(&EngineSettings {
            leak_check: false,
            ..EngineSettings::default()
        })
    }

    fn alg(name: &str) -> Component {
        Component::event_algorithm(name, name)
    }

    #[test]
    fn merge_combines_sequences_and_marks_child() {
        let mut parent = unit();
        parent.add_event_algorithm(alg("A"), None, false).unwrap();

        let mut child = unit();
        child.add_event_algorithm(alg("A"), None, false).unwrap();
        child.add_event_algorithm(alg("B"), None, false).unwrap();

        parent.merge(&mut child).unwrap();
        assert!(child.was_merged());
        assert_eq!(parent.flattened_sequences()["AthAlgSeq"], ["A", "B"]);
        assert!(parent.dangling_sequences().is_empty());
    }

    #[test]
    fn merging_twice_fails_fast() {
        let mut parent = unit();
        let mut child = unit();
        parent.merge(&mut child).unwrap();
        assert!(matches!(
            parent.merge(&mut child),
            Err(ConfigError::AlreadyMerged { .. })
        ));
    }

    #[test]
    fn merge_optional_none_is_already_merged() {
        let mut parent = unit();
        assert_eq!(
            parent.merge_optional(None).unwrap_err(),
            ConfigError::AlreadyMerged {
                unit: "<none>".into()
            }
        );
    }

    #[test]
    fn pending_private_tool_blocks_merge() {
        let mut parent = unit();
        let mut child = unit();
        child
            .set_private_tool(Component::private_tool("Fitter", "Fitter"))
            .unwrap();
        assert!(matches!(
            parent.merge(&mut child),
            Err(ConfigError::UnpoppedPrivateTool { .. })
        ));
        assert!(!child.was_merged());
        child.pop_private_tool();
    }

    #[test]
    fn edited_unit_cannot_be_merged_as_child() {
        let mut parent = unit();
        let mut child = unit();
        child.edit_sequence("AthAlgSeq").unwrap();
        assert!(matches!(
            parent.merge(&mut child),
            Err(ConfigError::NonMergeableUnit { .. })
        ));

        // It can still be the parent.
        let mut grandchild = unit();
        grandchild.add_event_algorithm(alg("A"), None, false).unwrap();
        child.merge(&mut grandchild).unwrap();
    }

    #[test]
    fn unknown_top_level_tree_becomes_dangling() {
        let mut parent = unit();
        let mut child = Accumulator::with_settings(&EngineSettings {
            main_sequence: "OtherTop".into(),
            leak_check: false,
            ..EngineSettings::default()
        });
        child.add_event_algorithm(alg("X"), None, false).unwrap();

        parent.merge(&mut child).unwrap();
        assert_eq!(parent.dangling_sequences().len(), 1);
        assert_eq!(parent.dangling_sequences()[0].name(), "OtherTop");
        assert!(parent.event_algorithm("X").is_some());
    }

    /// A child holding `Tracks` in its main tree and `G` in a dangling
    /// "Extra" tree it picked up from its own merge.
    fn child_with_dangling_extra() -> Accumulator {
        let mut grandchild = Accumulator::with_settings(&EngineSettings {
            main_sequence: "Extra".into(),
            leak_check: false,
            ..EngineSettings::default()
        });
        grandchild.add_event_algorithm(alg("G"), None, false).unwrap();

        let mut child = unit();
        child.add_event_algorithm(alg("Tracks"), None, false).unwrap();
        child.merge(&mut grandchild).unwrap();
        assert_eq!(child.dangling_sequences().len(), 1);
        child
    }

    #[test]
    fn dangling_tree_lands_in_same_named_parent_sequence() {
        let mut parent = unit();
        parent
            .add_sub_sequence(SequenceNode::sequential("Extra"), None)
            .unwrap();
        let mut child = child_with_dangling_extra();

        parent.merge(&mut child).unwrap();
        assert!(parent.dangling_sequences().is_empty());
        let flat = parent.flattened_sequences();
        assert_eq!(flat["Extra"], ["G"]);
        assert_eq!(flat["AthAlgSeq"], ["Tracks"]);
    }

    #[test]
    fn unmatched_dangling_tree_stays_dangling_in_parent() {
        let mut parent = unit();
        let mut child = child_with_dangling_extra();

        parent.merge(&mut child).unwrap();
        let names: Vec<&str> = parent.dangling_sequences().iter().map(|t| t.name()).collect();
        assert_eq!(names, ["Extra"]);
        assert!(parent.event_algorithm("G").is_some());
        assert!(!parent.flattened_sequences().contains_key("Extra"));
    }

    #[test]
    fn redirect_moves_only_the_main_tree() {
        let mut parent = unit();
        parent
            .add_sub_sequence(SequenceNode::new("Reco"), None)
            .unwrap();
        let mut child = child_with_dangling_extra();

        parent.merge_into_sequence(&mut child, "Reco").unwrap();
        let reco = parent.sequence("Reco").unwrap();
        assert_eq!(reco.sub_sequences().count(), 0);
        assert_eq!(parent.flattened_sequences()["Reco"], ["Tracks"]);
        let names: Vec<&str> = parent.dangling_sequences().iter().map(|t| t.name()).collect();
        assert_eq!(names, ["Extra"]);
    }

    #[test]
    fn merge_into_sequence_redirects_main_tree() {
        let mut parent = unit();
        parent
            .add_sub_sequence(SequenceNode::new("Reco"), None)
            .unwrap();
        let mut child = unit();
        child.add_event_algorithm(alg("Tracks"), None, false).unwrap();

        parent.merge_into_sequence(&mut child, "Reco").unwrap();
        let flat = parent.flattened_sequences();
        assert_eq!(flat["Reco"], ["Tracks"]);
        assert_eq!(parent.main_sequence().algorithms().count(), 0);
    }

    #[test]
    fn redirect_to_missing_sequence_fails() {
        let mut parent = unit();
        let mut child = unit();
        assert_eq!(
            parent
                .merge_into_sequence(&mut child, "Missing")
                .unwrap_err(),
            ConfigError::SequenceNotFound {
                name: "Missing".into()
            }
        );
        assert!(!child.was_merged());
    }

    #[test]
    fn unattached_registry_entry_is_orphaned() {
        let mut parent = unit();
        let mut child = unit();
        child.register_event_algorithm(alg("Lonely")).unwrap();

        assert_eq!(
            parent.merge(&mut child).unwrap_err(),
            ConfigError::OrphanedAlgorithm {
                name: "Lonely".into()
            }
        );
        assert!(parent.is_empty());
    }

    #[test]
    fn sequence_flag_mismatch_aborts_merge() {
        let mut parent = unit();
        parent
            .add_sub_sequence(SequenceNode::new("Reco"), None)
            .unwrap();
        let mut child = unit();
        child
            .add_sub_sequence(SequenceNode::sequential("Reco"), None)
            .unwrap();
        assert!(matches!(
            parent.merge(&mut child),
            Err(ConfigError::SequencePropertyConflict { .. })
        ));
    }

    #[test]
    fn services_and_create_flags_carry_over() {
        let mut parent = unit();
        parent
            .add_service(Component::service("Svc", "A"), false, false)
            .unwrap();
        let mut child = unit();
        child
            .add_service(Component::service("Svc", "B"), false, true)
            .unwrap();
        child
            .add_public_tool(Component::public_tool("T", "T"), false)
            .unwrap();

        parent.merge(&mut child).unwrap();
        assert!(parent.service("B").is_some());
        assert!(parent.public_tool("T").is_some());
        assert_eq!(parent.services_to_create(), ["B"]);
    }

    #[test]
    fn child_registry_is_redirected_to_merged_state() {
        let mut parent = unit();
        parent
            .add_event_algorithm(alg("Jets").with("PtMin", 20), None, false)
            .unwrap();
        let mut child = unit();
        child
            .add_event_algorithm(alg("Jets").with("Radius", 4), None, false)
            .unwrap();

        parent.merge(&mut child).unwrap();
        let seen_by_child = child.event_algorithm("Jets").unwrap();
        assert_eq!(seen_by_child.get("PtMin"), Some(&PropertyValue::Int(20)));
        assert_eq!(seen_by_child.get("Radius"), Some(&PropertyValue::Int(4)));
    }

    #[test]
    fn app_properties_merge_and_conflict() {
        let mut parent = unit();
        parent.set_app_property("Files", vec!["a"], false).unwrap();
        let mut child = unit();
        child.set_app_property("Files", vec!["b"], false).unwrap();
        parent.merge(&mut child).unwrap();
        assert_eq!(
            parent.app_property("Files"),
            Some(&PropertyValue::from(vec!["a", "b"]))
        );

        let mut clash = unit();
        parent.set_app_property("EvtMax", 10, false).unwrap();
        clash.set_app_property("EvtMax", 5, false).unwrap();
        assert!(matches!(
            parent.merge(&mut clash),
            Err(ConfigError::PropertyConflict { .. })
        ));
    }

    #[test]
    fn merge_and_pop_tool_returns_child_tool() {
        let mut parent = unit();
        let mut child = unit();
        child.add_event_algorithm(alg("User"), None, false).unwrap();
        child
            .set_private_tool(Component::private_tool("Fitter", "Fitter"))
            .unwrap();

        let tool = parent.merge_and_pop_tool(child).unwrap();
        assert_eq!(tool.into_vec()[0].instance_name, "Fitter");
        assert!(parent.event_algorithm("User").is_some());
    }

    #[test]
    fn merge_and_get_primary_returns_parent_copy() {
        let mut parent = unit();
        parent
            .add_service(Component::service("Svc", "Svc").with("A", 1), false, false)
            .unwrap();
        let mut child = unit();
        child
            .add_service(Component::service("Svc", "Svc").with("B", 2), true, false)
            .unwrap();

        match parent.merge_and_get_primary(child).unwrap() {
            Primary::Component(svc) => {
                assert_eq!(svc.get("A"), Some(&PropertyValue::Int(1)));
                assert_eq!(svc.get("B"), Some(&PropertyValue::Int(2)));
            }
            other => panic!("unexpected primary: {other:?}"),
        }
    }

    #[test]
    fn child_diagnostics_are_carried_into_parent() {
        let mut parent = unit();
        let mut child = unit();
        child.set_app_property("L", vec![1], false).unwrap();
        child.set_app_property("L", vec![2], false).unwrap();
        assert_eq!(child.diagnostics().len(), 1);

        parent.merge(&mut child).unwrap();
        assert_eq!(parent.diagnostics().len(), 1);
    }
}
