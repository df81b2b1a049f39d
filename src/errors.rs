//! Typed error hierarchy for the Quasar runtime.
//!
//! Three top-level enums cover the three subsystems, mirroring how the
//! upstream orchestrator splits its errors by concern:
//! - `FabricError` — coordination store / claim / poll failures
//! - `SchedulerError` — DAG, dispatch, and decomposition failures
//! - `LoopError` — per-phase cycle, budget, and checkpoint failures
//!
//! Functions that cross subsystem boundaries return `anyhow::Result` and
//! attach context with `.context(...)` rather than inventing a fourth enum.

use thiserror::Error;

/// Errors surfaced by the coordination fabric (entanglements, claims,
/// discoveries, pulses, phase states) and by the pollers that read it.
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("storage error: {0}")]
    Storage(#[source] rusqlite::Error),

    #[error("claim on {path} already held by {owner}")]
    ClaimHeld { path: String, owner: String },

    #[error("snapshot build failed: {0}")]
    SnapshotFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the DAG, scope engine, wave scanner, worker pool, and
/// decomposition.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("cycle detected adding edge {from} -> {to}")]
    Cycle { from: String, to: String },

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("decomposition of {phase} would create a cycle; rolled back")]
    DecompositionCycle { phase: String },

    #[error("decomposition of {phase} produced duplicate sub-phase id {id}")]
    DecompositionDuplicate { phase: String, id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the per-phase coder-reviewer loop.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("budget exhausted: spent ${spent:.2} of ${budget:.2}")]
    BudgetExceeded { spent: f64, budget: f64 },

    #[error("max cycles ({max_cycles}) reached without approval")]
    MaxCyclesReached { max_cycles: u32 },

    #[error("invoker error: {0}")]
    Invoker(String),

    #[error("checkpoint git SHA mismatch: checkpoint={checkpoint_sha} head={head_sha}")]
    GitShaMismatch {
        checkpoint_sha: String,
        head_sha: String,
    },

    #[error("checkpoint version {found} unsupported (expected {expected})")]
    UnsupportedCheckpointVersion { found: u32, expected: u32 },

    #[error("branch mismatch: expected {expected}, current {current}")]
    BranchMismatch { expected: String, current: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fabric_error_claim_held_renders_both_fields() {
        let err = FabricError::ClaimHeld {
            path: "src/x.rs".into(),
            owner: "02".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("src/x.rs"));
        assert!(msg.contains("02"));
    }

    #[test]
    fn scheduler_error_cycle_is_matchable() {
        let err = SchedulerError::Cycle {
            from: "a".into(),
            to: "b".into(),
        };
        assert!(matches!(err, SchedulerError::Cycle { .. }));
    }

    #[test]
    fn loop_error_budget_exceeded_carries_amounts() {
        let err = LoopError::BudgetExceeded {
            spent: 12.5,
            budget: 10.0,
        };
        assert!(err.to_string().contains("12.50"));
        assert!(err.to_string().contains("10.00"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&FabricError::SnapshotFailed("x".into()));
        assert_std_error(&SchedulerError::UnknownNode("x".into()));
        assert_std_error(&LoopError::MaxCyclesReached { max_cycles: 5 });
    }
}
