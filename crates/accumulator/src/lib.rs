//! # confweave accumulator
//!
//! The mergeable unit of partial configuration and the algorithm that folds
//! units together.
//!
//! Callers build small [`Accumulator`]s bottom-up, one per sub-system,
//! [`merge`](Accumulator::merge) children into parents, and pull the one
//! useful output of each fragment with
//! [`get_primary`](Accumulator::get_primary) or
//! [`pop_private_tool`](Accumulator::pop_private_tool). The root is finally
//! projected into a [`LaunchPlan`] for an external [`Launcher`].
//!
//! ```
//! use confweave_accumulator::{Accumulator, SequenceNode};
//! use confweave_core::Component;
//!
//! let mut root = Accumulator::new();
//! root.add_sub_sequence(SequenceNode::new("Reco"), None)?;
//!
//! let mut tracking = Accumulator::new();
//! tracking.add_event_algorithm(Component::event_algorithm("TrackFinder", "Tracks"), None, true)?;
//! root.merge_into_sequence(&mut tracking, "Reco")?;
//!
//! assert_eq!(root.flattened_sequences()["Reco"], ["Tracks"]);
//! # let _ = root.launch_plan(&Default::default())?;
//! # Ok::<(), confweave_core::ConfigError>(())
//! ```

pub mod accumulator;
pub mod launch;
pub mod merge;
pub mod sequence;

pub use accumulator::{Accumulator, DeclaredDependency, Primary, PrivateTools};
pub use launch::{LaunchPlan, Launcher};
pub use sequence::{OutlineMember, SequenceChild, SequenceFlags, SequenceNode, SequenceOutline, merge_sequences};
