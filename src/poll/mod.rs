//! Pollers: decide whether a phase is ready to run against a fabric
//! snapshot.

mod contract;
mod llm;

pub use contract::{ContractPoller, MatchMode, PhaseContract};
pub use llm::LlmPoller;

use crate::fabric::Snapshot;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    NeedInfo,
    Conflict,
}

#[derive(Debug, Clone, Default)]
pub struct PollResult {
    pub decision: Option<Decision>,
    pub reason: String,
    pub missing: Vec<String>,
    pub conflict_with: Option<String>,
}

impl PollResult {
    pub fn proceed(reason: impl Into<String>) -> Self {
        Self {
            decision: Some(Decision::Proceed),
            reason: reason.into(),
            ..Default::default()
        }
    }

    pub fn need_info(reason: impl Into<String>, missing: Vec<String>) -> Self {
        Self {
            decision: Some(Decision::NeedInfo),
            reason: reason.into(),
            missing,
            ..Default::default()
        }
    }

    pub fn conflict(reason: impl Into<String>, conflict_with: impl Into<String>) -> Self {
        Self {
            decision: Some(Decision::Conflict),
            reason: reason.into(),
            conflict_with: Some(conflict_with.into()),
            ..Default::default()
        }
    }

    pub fn decision(&self) -> Decision {
        self.decision.clone().unwrap_or(Decision::Proceed)
    }
}

/// `Poll(ctx, phase_id, snapshot) -> PollResult`. Both the deterministic
/// contract poller and the LLM fallback implement this trait so the wave
/// scanner is agnostic to which one backs a given nebula.
#[async_trait]
pub trait Poller: Send + Sync {
    async fn poll(&self, phase_id: &str, snapshot: &Snapshot) -> PollResult;
}
