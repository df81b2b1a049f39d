//! Cycle state: the per-phase coder-reviewer loop's state
//! document, persisted at cycle boundaries for checkpointing.

use super::struggle::ProgressTracker;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub severity: Severity,
    pub description: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Fixed,
    StillPresent,
    Regressed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub finding_id: String,
    pub status: VerificationStatus,
    pub comment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewReport {
    pub satisfaction: Level,
    pub risk: Level,
    pub needs_human_review: bool,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Idle,
    Coder,
    Reviewer,
    Approved,
}

/// The persistent per-phase cycle state document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleState {
    pub cycle: u32,
    pub max_cycles: u32,
    pub phase: LoopPhase,
    pub coder_output: String,
    pub findings: Vec<Finding>,
    pub all_findings: Vec<Finding>,
    pub verifications: Vec<Verification>,
    pub filter_history: Vec<String>,
    pub cycle_commits: Vec<String>,
    pub base_commit_sha: String,
    pub total_cost_usd: f64,
    pub max_budget_usd: f64,
    pub task_title: String,
    pub task_id: String,
    pub review_report: Option<ReviewReport>,
    #[serde(default)]
    pub progress: ProgressTracker,
}

impl CycleState {
    pub fn new(task_id: impl Into<String>, task_title: impl Into<String>, max_cycles: u32, max_budget_usd: f64, base_commit_sha: impl Into<String>) -> Self {
        Self {
            cycle: 1,
            max_cycles,
            phase: LoopPhase::Idle,
            coder_output: String::new(),
            findings: Vec::new(),
            all_findings: Vec::new(),
            verifications: Vec::new(),
            filter_history: Vec::new(),
            cycle_commits: Vec::new(),
            base_commit_sha: base_commit_sha.into(),
            total_cost_usd: 0.0,
            max_budget_usd,
            task_title: task_title.into(),
            task_id: task_id.into(),
            review_report: None,
            progress: ProgressTracker::new(),
        }
    }

    pub fn has_unverified_critical_finding(&self) -> bool {
        self.findings.iter().any(|f| {
            f.severity == Severity::Critical
                && !self
                    .verifications
                    .iter()
                    .any(|v| v.finding_id == f.id && v.status == VerificationStatus::Fixed)
        })
    }

    pub fn remaining_budget(&self) -> f64 {
        (self.max_budget_usd - self.total_cost_usd).max(0.0)
    }

    pub fn budget_exceeded(&self) -> bool {
        self.total_cost_usd >= self.max_budget_usd
    }
}
