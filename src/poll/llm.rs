//! `LlmPoller`: prompt-based fallback poller. Formulates a
//! prompt from the phase body and rendered snapshot; parses the first
//! token. Malformed output is mapped to PROCEED — fail-open, never
//! fail-closed, matching the contract poller's fail-open default when no
//! contract is registered.

use super::{Decision, PollResult, Poller};
use crate::fabric::Snapshot;
use crate::invoker::{AgentSpec, Invoker};
use async_trait::async_trait;
use std::sync::Arc;

pub struct LlmPoller {
    invoker: Arc<dyn Invoker>,
    agent_spec: AgentSpec,
}

impl LlmPoller {
    pub fn new(invoker: Arc<dyn Invoker>, agent_spec: AgentSpec) -> Self {
        Self { invoker, agent_spec }
    }

    fn build_prompt(phase_id: &str, phase_body: &str, snapshot: &Snapshot) -> String {
        format!(
            "Phase {phase_id}\n\n{phase_body}\n\n{}\n\nRespond with PROCEED, NEED_INFO, or CONFLICT as the first token, followed by a reason.",
            snapshot.render()
        )
    }

    /// Parse a raw LLM response into a `PollResult`. Unrecognized first
    /// tokens are treated as malformed and mapped to PROCEED.
    pub fn parse_response(response: &str) -> PollResult {
        let mut lines = response.lines();
        let first_line = lines.next().unwrap_or("").trim();
        let mut words = first_line.splitn(2, char::is_whitespace);
        let token = words.next().unwrap_or("").trim();
        let rest_of_first_line = words.next().unwrap_or("").trim();

        match token {
            "PROCEED" => PollResult::proceed(rest_of_first_line.to_string()),
            "NEED_INFO" => {
                let missing: Vec<String> = lines
                    .map(str::trim)
                    .filter(|l| l.starts_with('-') || l.starts_with('*'))
                    .map(|l| l.trim_start_matches(['-', '*']).trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect();
                PollResult::need_info(rest_of_first_line.to_string(), missing)
            }
            "CONFLICT" => {
                let conflict_with = rest_of_first_line.split_whitespace().next().unwrap_or("unknown");
                PollResult::conflict(rest_of_first_line.to_string(), conflict_with.to_string())
            }
            _ => PollResult::proceed("malformed poller response, failing open"),
        }
    }

    pub async fn poll_with_body(&self, phase_id: &str, phase_body: &str, snapshot: &Snapshot) -> PollResult {
        let prompt = Self::build_prompt(phase_id, phase_body, snapshot);
        match self
            .invoker
            .invoke(&self.agent_spec, &prompt, &crate::invoker::default_work_dir())
            .await
        {
            Ok(result) => Self::parse_response(&result.result_text),
            Err(_) => PollResult::proceed("invoker error, failing open"),
        }
    }
}

#[async_trait]
impl Poller for LlmPoller {
    async fn poll(&self, phase_id: &str, snapshot: &Snapshot) -> PollResult {
        self.poll_with_body(phase_id, "", snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_proceed() {
        let result = LlmPoller::parse_response("PROCEED looks good");
        assert_eq!(result.decision(), Decision::Proceed);
    }

    #[test]
    fn parses_need_info_with_bullets() {
        let response = "NEED_INFO waiting on producer\n- type Store (pkg)\n- function Run (pkg)\n";
        let result = LlmPoller::parse_response(response);
        assert_eq!(result.decision(), Decision::NeedInfo);
        assert_eq!(result.missing.len(), 2);
    }

    #[test]
    fn parses_conflict_with_conflicting_phase() {
        let result = LlmPoller::parse_response("CONFLICT B overlapping scope");
        assert_eq!(result.decision(), Decision::Conflict);
        assert_eq!(result.conflict_with, Some("B".to_string()));
    }

    #[test]
    fn malformed_response_fails_open_to_proceed() {
        let result = LlmPoller::parse_response("I'm not sure what to do here");
        assert_eq!(result.decision(), Decision::Proceed);
    }

    #[test]
    fn empty_response_fails_open_to_proceed() {
        let result = LlmPoller::parse_response("");
        assert_eq!(result.decision(), Decision::Proceed);
    }

    #[tokio::test]
    async fn invoker_error_fails_open() {
        struct FailingInvoker;
        #[async_trait]
        impl Invoker for FailingInvoker {
            async fn invoke(
                &self,
                _: &AgentSpec,
                _: &str,
                _: &std::path::Path,
            ) -> Result<crate::invoker::InvocationResult, crate::invoker::InvokerError> {
                Err(crate::invoker::InvokerError::Failed("boom".into()))
            }
        }
        let poller = LlmPoller::new(
            Arc::new(FailingInvoker),
            AgentSpec { name: "coder".into(), model: None },
        );
        let result = poller.poll("P", &Snapshot::default()).await;
        assert_eq!(result.decision(), Decision::Proceed);
    }
}
