//! Error types for configuration composition.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! [`ConflictError`] covers the reconciliation of two same-named components;
//! [`ConfigError`] covers everything an accumulator operation can reject.

use thiserror::Error;

use crate::component::ComponentKind;

/// Result type alias using [`ConfigError`].
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Two components sharing an identity could not be reconciled.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConflictError {
    #[error("component '{instance}' is configured as both '{existing}' and '{candidate}'")]
    TypeMismatch {
        instance: String,
        existing: String,
        candidate: String,
    },

    #[error("component '{instance}' is registered as {existing} but merged as {candidate}")]
    KindMismatch {
        instance: String,
        existing: ComponentKind,
        candidate: ComponentKind,
    },

    #[error("property '{property}' of '{component}' set to both {left} and {right}")]
    PropertyMismatch {
        component: String,
        property: String,
        left: String,
        right: String,
    },
}

/// Everything an accumulator operation can fail with.
///
/// None of these are retried: they surface to the caller building the
/// configuration, which is expected to stop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("'{component}' is a {found}, expected a {expected}")]
    WrongKind {
        component: String,
        expected: ComponentKind,
        found: ComponentKind,
    },

    #[error("reconciliation failed: {0}")]
    Conflict(#[from] ConflictError),

    #[error("sequence '{sequence}' has {property} = {left} on one side and {right} on the other")]
    SequencePropertyConflict {
        sequence: String,
        property: String,
        left: bool,
        right: bool,
    },

    #[error("application property '{key}' set to both {left} and {right}")]
    PropertyConflict {
        key: String,
        left: String,
        right: String,
    },

    #[error("a private tool is already pending ({pending}); pop it before staging another")]
    PrivateToolAlreadySet { pending: String },

    #[error("cannot merge a unit that still holds the private tool {tool}; pop it first")]
    UnpoppedPrivateTool { tool: String },

    #[error("no primary component and no pending private tool")]
    NoPrimary,

    #[error("algorithm '{name}' is registered but not attached to any sequence")]
    OrphanedAlgorithm { name: String },

    #[error("unit {unit} was edited structurally and can only be merged as a parent")]
    NonMergeableUnit { unit: String },

    #[error("unit {unit} was already merged (did a builder forget to return its unit?)")]
    AlreadyMerged { unit: String },

    #[error("sequence '{name}' not found")]
    SequenceNotFound { name: String },

    #[error("sequence '{name}' is already present under '{parent}'")]
    SequenceAlreadyPresent { name: String, parent: String },

    #[error("sequence '{sequence}' already holds {count} algorithm(s); add them through the accumulator")]
    PrepopulatedSequence { sequence: String, count: usize },

    #[error("algorithm '{algorithm}' appears more than once along {path}")]
    DuplicateAlgorithm { algorithm: String, path: String },

    #[error("sequence '{name}' is nested inside itself along {path}")]
    DuplicateSequence { name: String, path: String },

    #[error("expected a single top-level sequence, found dangling {names:?}")]
    DanglingSequences { names: Vec<String> },

    #[error("no {kind} named '{name}'")]
    ComponentNotFound { kind: ComponentKind, name: String },

    #[error("an edit may only change properties of '{component}', not rename or retype it (got '{edited}')")]
    IdentityChanged { component: String, edited: String },

    #[error("unknown component type: {0}")]
    UnknownComponentType(String),

    #[error("launch failed: {0}")]
    Launch(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_mismatch_displays_both_values() {
        let err = ConfigError::from(ConflictError::PropertyMismatch {
            component: "S/inst".into(),
            property: "P".into(),
            left: "1".into(),
            right: "9".into(),
        });
        let text = err.to_string();
        assert!(text.contains("S/inst"));
        assert!(text.contains('P'));
        assert!(text.contains('1'));
        assert!(text.contains('9'));
    }

    #[test]
    fn wrong_kind_names_both_kinds() {
        let err = ConfigError::WrongKind {
            component: "Svc".into(),
            expected: ComponentKind::PublicTool,
            found: ComponentKind::Service,
        };
        assert!(err.to_string().contains("public tool"));
        assert!(err.to_string().contains("service"));
    }
}
