//! Launcher boundary.
//!
//! Once a root accumulator holds a single top-level sequence tree and no
//! pending private tool, it can be projected into a [`LaunchPlan`] and handed
//! to whatever [`Launcher`] turns plans into running jobs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

use confweave_config::EngineSettings;
use confweave_core::{Component, ComponentKind, ConfigError, PropertyValue, Result};

use crate::accumulator::Accumulator;
use crate::sequence::SequenceOutline;

/// Everything a launcher needs, with components resolved by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchPlan {
    pub main_sequence: String,
    pub sequence: SequenceOutline,
    /// For every sequence, the algorithm names it reaches, in execution order.
    pub flattened: BTreeMap<String, Vec<String>>,
    pub algorithms: Vec<Component>,
    pub conditions_algorithms: Vec<Component>,
    /// Bootstrap services first, in bootstrap order; the rest as added.
    pub services: Vec<Component>,
    /// Names of services to create eagerly, ordered like `services`.
    pub services_to_create: Vec<String>,
    pub public_tools: Vec<Component>,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl LaunchPlan {
    /// Pretty JSON rendering, for logs and dumps.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Launch(e.to_string()))
    }

    pub fn service(&self, name: &str) -> Option<&Component> {
        self.services.iter().find(|s| s.instance_name == name)
    }
}

/// Consumes launch plans.
pub trait Launcher {
    type Error: fmt::Display;

    fn launch(&mut self, plan: &LaunchPlan) -> std::result::Result<(), Self::Error>;
}

/// Stable sort: bootstrap entries by rank, then everything else in order.
fn bootstrap_order<T>(items: &mut [T], name: impl Fn(&T) -> &str, settings: &EngineSettings) {
    items.sort_by_key(|item| settings.bootstrap_rank(name(item)).unwrap_or(usize::MAX));
}

impl Accumulator {
    /// Validate this unit as a root and project it for a launcher.
    ///
    /// Marks the unit as handed off, so dropping it afterwards is not a leak.
    pub fn launch_plan(&mut self, settings: &EngineSettings) -> Result<LaunchPlan> {
        if !self.contents.dangling.is_empty() {
            return Err(ConfigError::DanglingSequences {
                names: self
                    .contents
                    .dangling
                    .iter()
                    .map(|tree| tree.name().to_string())
                    .collect(),
            });
        }
        if let Some(tools) = &self.contents.private_tools {
            return Err(ConfigError::UnpoppedPrivateTool {
                tool: tools.describe(),
            });
        }

        let owned = |kind| -> Vec<Component> {
            self.components(kind).into_iter().cloned().collect()
        };
        let mut services = owned(ComponentKind::Service);
        bootstrap_order(&mut services, |s| s.instance_name.as_str(), settings);
        let mut services_to_create = self.contents.services_to_create.clone();
        bootstrap_order(&mut services_to_create, |s| s.as_str(), settings);

        let plan = LaunchPlan {
            main_sequence: self.contents.main.name().to_string(),
            sequence: self.contents.main.outline(&self.contents.arena),
            flattened: self.flattened_sequences(),
            algorithms: owned(ComponentKind::EventAlgorithm),
            conditions_algorithms: owned(ComponentKind::ConditionsAlgorithm),
            services,
            services_to_create,
            public_tools: owned(ComponentKind::PublicTool),
            properties: self.contents.properties.clone(),
        };

        self.launched = true;
        info!(
            unit = %self.id,
            algorithms = plan.algorithms.len(),
            services = plan.services.len(),
            "Launch plan built"
        );
        Ok(plan)
    }

    /// Build the launch plan and hand it to `launcher`.
    pub fn launch<L: Launcher>(&mut self, launcher: &mut L, settings: &EngineSettings) -> Result<()> {
        let plan = self.launch_plan(settings)?;
        launcher
            .launch(&plan)
            .map_err(|e| ConfigError::Launch(e.to_string()))
    }
}
