//! Sequence engine: authored test flows and their execution.
//!
//! A sequence is a tree of items. Leaves perform one bench action
//! (register access, instrument control, delays, operator holds);
//! interior nodes are loops that bind a variable over a sweep and run
//! their children once per point. The [`SequencePlayer`] walks the
//! tree against a register map and an instrument context, reporting
//! progress through an [`EventSink`].
//!
//! ```text
//!   file.rs    TOML  ->  Sequence (validated tree)
//!   item.rs    actions, parameters, tree nodes
//!   sweep.rs   numeric-range / value-list / fixed-count expansion
//!   scope.rs   loop variable bindings, innermost wins
//!   player.rs  execution, failure policy, cancellation
//! ```
//!
//! [`EventSink`]: crate::events::EventSink

pub mod file;
pub mod item;
pub mod player;
pub mod scope;
pub mod sweep;

pub use file::{Sequence, SequenceFileError};
pub use item::{Action, ActionItem, LoopItem, ParamValue, SequenceItem};
pub use player::{ActionError, PlayerOptions, SequencePlayer};
pub use scope::{LoopFrame, ScopeStack};
pub use sweep::{SweepSpec, ValidationError};
