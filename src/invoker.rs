//! The `Invoker` trait: the LLM subprocess boundary. The core treats the
//! agent as opaque and never implements agent logic itself — invocation is
//! a trait so the core can be driven by a fake in tests.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub name: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub result_text: String,
    pub cost_usd: f64,
    pub duration: Duration,
    pub session_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum InvokerError {
    #[error("invocation failed: {0}")]
    Failed(String),
    #[error("invocation timed out after {0:?}")]
    Timeout(Duration),
}

/// `Invoke(ctx, agent_spec, prompt, work_dir) -> { result_text, cost_usd,
/// duration, session_id }`. Errors are cost-bearing failures, not panics.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(
        &self,
        agent_spec: &AgentSpec,
        prompt: &str,
        work_dir: &std::path::Path,
    ) -> Result<InvocationResult, InvokerError>;
}

/// A scripted invoker for tests: returns canned responses in order, cycling
/// on the last one if exhausted.
pub struct ScriptedInvoker {
    responses: Vec<String>,
    cost_per_call: f64,
    call_count: std::sync::atomic::AtomicUsize,
}

impl ScriptedInvoker {
    pub fn new(responses: Vec<String>, cost_per_call: f64) -> Self {
        Self {
            responses,
            cost_per_call,
            call_count: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Invoker for ScriptedInvoker {
    async fn invoke(
        &self,
        _agent_spec: &AgentSpec,
        _prompt: &str,
        _work_dir: &std::path::Path,
    ) -> Result<InvocationResult, InvokerError> {
        let idx = self.call_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let text = self
            .responses
            .get(idx)
            .or_else(|| self.responses.last())
            .cloned()
            .unwrap_or_default();
        Ok(InvocationResult {
            result_text: text,
            cost_usd: self.cost_per_call,
            duration: Duration::from_millis(1),
            session_id: format!("scripted-{idx}"),
        })
    }
}

/// Convenience used by pollers/loop when no work directory override matters.
pub fn default_work_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
