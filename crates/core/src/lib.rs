//! Convergence core for time-looping variables.
//!
//! `chronovar_core` is the engine behind a logic runtime in which named
//! variables hold ordered superpositions of values ("slices") and evolve
//! across repeated executions of a user program until every variable's
//! state stabilises. The engine runs the user's code forward and in
//! reverse, recording each mutation on an undo ledger so that reverse
//! passes can replay and invert prior states. When the forward trajectory
//! reproduces a state already present in a variable's history, the engine
//! *unifies* every state seen since that point into a single multi-valued
//! slice, marks the run converged, and executes one final forward pass
//! whose side effects constitute the visible output.
//!
//! # Layout
//!
//! - [`slice`] — the multi-value container contract variables are built on.
//! - [`timeline`] — the ordered, non-empty sequence of slices one variable owns.
//! - [`variable`] — the positronic variable: identity, timeline, STM participation.
//! - [`ops`] — the variable's public mutation surface (`assign`, arithmetic, bitwise).
//! - [`operation`] — reversible operation records and the default undo shapes.
//! - [`ledger`] — the idempotent, commit-id-keyed undo stack.
//! - [`archivist`] — the sole code path allowed to mutate a timeline buffer.
//! - [`registry`] — the `(type, name) -> variable` identity map.
//! - [`transaction`] — the STM transaction: read-set validation, staged writes, commit.
//! - [`coordinator`] — the single-writer work queue that serialises commits.
//! - [`entropy`] — the forward/reverse/final sign bit driving the loop.
//! - [`context`] — ambient ledger routing for mutations made outside a transaction.
//! - [`config`] — engine tunables and the observable runtime counters.
//! - [`engine`] — the improbability engine: the forward/reverse loop itself.
//! - [`telemetry`] — optional commit/retry/queue counters.
//! - [`error`] — the public error surface.
//!
//! # Entry point
//!
//! The main entry point is [`Engine`], built from an [`EngineConfig`] and
//! driven with [`Engine::run`]:
//!
//! ```rust,ignore
//! use chronovar_core::slice::ValueSet;
//! use chronovar_core::{Engine, EngineConfig};
//!
//! let mut engine = Engine::new(EngineConfig::default());
//! let result = engine.run(|registry| {
//!     let antival = registry.get_or_create::<i64, ValueSet<i64>>("antival", || ValueSet::singleton(-1));
//!     let cur = antival.to_values()[0];
//!     antival.assign_value(-cur);
//! });
//! ```
//!
//! Multi-threaded producers that want writes serialised through a single
//! coordinator thread instead enqueue [`coordinator::WorkItem`]s on a
//! [`Coordinator`] built over the same [`Registry`].

pub mod archivist;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod entropy;
pub mod error;
pub mod ledger;
pub mod operation;
pub mod ops;
pub mod registry;
pub mod slice;
pub mod telemetry;
pub mod timeline;
pub mod transaction;
pub mod variable;

pub mod engine;

pub use archivist::Snapshot;
pub use config::{EngineConfig, RuntimeState};
pub use coordinator::Coordinator;
pub use engine::Engine;
pub use entropy::Entropy;
pub use error::{CommitError, EngineError};
pub use ledger::{CommitId, Ledger};
pub use registry::Registry;
pub use slice::{Slice, ValueSet};
pub use transaction::Transaction;
pub use variable::{Variable, VariableId};
