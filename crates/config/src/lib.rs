//! Engine settings loading and validation for confweave.
//!
//! Loads settings from `~/.confweave/config.toml` with environment variable
//! overrides. Validates all settings before they reach an accumulator.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// The root settings structure.
///
/// Maps directly to `~/.confweave/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Name of the main sequence every new accumulator creates
    #[serde(default = "default_main_sequence")]
    pub main_sequence: String,

    /// Whether the main sequence runs its children in order
    #[serde(default = "default_true")]
    pub main_sequence_sequential: bool,

    /// Services the launch plan initializes before all others, in this order
    #[serde(default = "default_bootstrap_services")]
    pub bootstrap_services: Vec<String>,

    /// Report accumulators dropped without being merged or launched
    #[serde(default = "default_true")]
    pub leak_check: bool,
}

fn default_main_sequence() -> String {
    "AthAlgSeq".into()
}
fn default_bootstrap_services() -> Vec<String> {
    vec![
        "MessageSvc".into(),
        "EventStore".into(),
        "DetectorStore".into(),
        "ConditionStore".into(),
    ]
}
fn default_true() -> bool {
    true
}

impl EngineSettings {
    /// Load settings from the default path (~/.confweave/config.toml).
    ///
    /// Environment overrides:
    /// - `CONFWEAVE_MAIN_SEQUENCE`
    /// - `CONFWEAVE_LEAK_CHECK` (`0`/`false` disables)
    pub fn load() -> Result<Self, SettingsError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut settings = Self::load_from(&config_path)?;

        if let Ok(name) = std::env::var("CONFWEAVE_MAIN_SEQUENCE") {
            settings.main_sequence = name;
        }

        if let Ok(flag) = std::env::var("CONFWEAVE_LEAK_CHECK") {
            settings.leak_check = !matches!(flag.trim(), "0" | "false" | "off");
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            tracing::info!("No settings file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            SettingsError::ParseError { reason, .. } => SettingsError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse and validate settings from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(content).map_err(|e| SettingsError::ParseError {
            path: PathBuf::new(),
            reason: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".confweave")
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.main_sequence.trim().is_empty() {
            return Err(SettingsError::ValidationError(
                "main_sequence must not be empty".into(),
            ));
        }

        let mut seen = HashSet::new();
        for name in &self.bootstrap_services {
            if !seen.insert(name.as_str()) {
                return Err(SettingsError::ValidationError(format!(
                    "bootstrap service '{name}' listed twice"
                )));
            }
        }

        Ok(())
    }

    /// Position of a service in the bootstrap order, if it is one.
    pub fn bootstrap_rank(&self, service: &str) -> Option<usize> {
        self.bootstrap_services.iter().position(|s| s == service)
    }

    /// Generate a default settings TOML string.
    pub fn default_toml() -> String {
        let settings = Self::default();
        toml::to_string_pretty(&settings).unwrap_or_default()
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            main_sequence: default_main_sequence(),
            main_sequence_sequential: true,
            bootstrap_services: default_bootstrap_services(),
            leak_check: true,
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Settings errors.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read settings file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse settings file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Settings validation failed: {0}")]
    ValidationError(String),
}
