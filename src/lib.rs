//! Quasar: a DAG-scheduled runtime for multi-agent coding orchestration.
//!
//! Phases are laid out as a dependency graph (`dag`), scoped by the files
//! they intend to touch (`scope`), and dispatched wave by wave
//! (`scheduler`) once a `poll` against the shared `fabric` clears them to
//! run. Each dispatched phase executes a bounded coder-reviewer `cycle`,
//! escalating to the `architect` for decomposition when it struggles, and
//! committing its work through `branch`. Concurrency is shaped by an AIMD
//! controller (`metrics::aimd`) and observed through the `events` bus.

pub mod architect;
pub mod branch;
pub mod cycle;
pub mod dag;
pub mod errors;
pub mod events;
pub mod fabric;
pub mod filter;
pub mod invoker;
pub mod manifest;
pub mod metrics;
pub mod nebula;
pub mod phase;
pub mod poll;
pub mod scheduler;
pub mod scope;
pub mod wave;
