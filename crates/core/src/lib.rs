//! # confweave core
//!
//! Domain types for composing pipeline configurations: the component model,
//! the reconciliation engine that deduplicates components sharing a name, the
//! error taxonomy, and the factory boundary through which fragment builders
//! obtain fresh components.
//!
//! Nothing here knows about sequences or accumulators; those live in
//! `confweave-accumulator` and depend inward on this crate.

pub mod component;
pub mod dedup;
pub mod diagnostics;
pub mod error;
pub mod factory;

// Re-export key types at crate root for ergonomics
pub use component::{AccessMode, Component, ComponentKind, DataHandle, Property, PropertyValue};
pub use dedup::{merge_component, ComponentArena, ComponentId, ComponentSet, Reconciliation, Staged};
pub use diagnostics::{Diagnostic, DiagnosticKind, Severity};
pub use error::{ConfigError, ConflictError, Result};
pub use factory::{ComponentFactory, FactoryRegistry, SchemaFactory};
