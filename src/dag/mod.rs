//! Dependency DAG: a typed graph of phase IDs.
//!
//! Supports idempotent mutation at runtime rather than a fixed build-once
//! shape, since the scheduler hot-adds phases and decomposition rewrites
//! the live graph while a run is in progress.

mod graph;

pub use graph::Dag;

use crate::errors::SchedulerError;

/// A single layer of the topological order: phases with no dependency
/// between them, ready to run together.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Wave {
    pub number: usize,
    pub node_ids: Vec<String>,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
