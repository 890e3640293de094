//! Diagnostics recorded while composing a configuration.
//!
//! Reconciliation returns these instead of logging, so the decision logic
//! stays free of side effects. Callers decide whether to log or keep them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// What a diagnostic is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Two sides of a reconciliation set the same list property differently;
    /// the result is their union.
    ListUnion { component: String, property: String },
    /// An application property list was extended by a merge.
    AppPropertyUnion { key: String },
    /// A new primary component replaced an earlier one.
    PrimaryOverwritten { previous: String, current: String },
    /// A unit was dropped without being merged or launched.
    UnmergedUnit { unit: String },
    /// A unit was dropped while still holding a private tool.
    LeakedPrivateTool { unit: String, tool: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Diagnostic {
    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Emit through `tracing` at the matching level.
    pub fn emit(&self) {
        match self.severity {
            Severity::Warning => tracing::warn!(kind = ?self.kind, "{}", self.message),
            Severity::Error => tracing::error!(kind = ?self.kind, "{}", self.message),
        }
    }
}
