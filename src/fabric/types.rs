//! Fabric data types: entanglements, claims, discoveries, pulses, and the
//! phase-state lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a phase. Transitions are owned exclusively by the
/// scheduler + coder-reviewer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    Pending,
    Scanning,
    Running,
    Done,
    Failed,
    Blocked,
    Decomposed,
    HumanDecision,
}

impl PhaseState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PhaseState::Done | PhaseState::Failed | PhaseState::Decomposed
        )
    }
}

impl std::fmt::Display for PhaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PhaseState::Pending => "pending",
            PhaseState::Scanning => "scanning",
            PhaseState::Running => "running",
            PhaseState::Done => "done",
            PhaseState::Failed => "failed",
            PhaseState::Blocked => "blocked",
            PhaseState::Decomposed => "decomposed",
            PhaseState::HumanDecision => "human_decision",
        };
        write!(f, "{s}")
    }
}

/// Entanglement kind: the category of contract a phase publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntanglementKind {
    Type,
    Function,
    Interface,
    Constant,
    Package,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntanglementStatus {
    Pending,
    Fulfilled,
}

/// A typed contract published by a phase and consumable by others.
/// Identity is `(producer, kind, name, package)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entanglement {
    pub producer: String,
    pub kind: EntanglementKind,
    pub name: String,
    pub package: String,
    pub signature: String,
    pub status: EntanglementStatus,
}

impl Entanglement {
    pub fn identity_key(&self) -> (String, String, String) {
        (
            format!("{:?}", self.kind).to_lowercase(),
            self.name.clone(),
            self.package.clone(),
        )
    }
}

/// A specification of what a phase needs, matched against published
/// entanglements by the `ContractPoller`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntanglementSpec {
    pub kind: EntanglementKind,
    pub name: String,
    pub package: Option<String>,
}

/// An exclusive advisory lock on a file path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileClaim {
    pub path: String,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryKind {
    EntanglementDispute,
    MissingDependency,
    FileConflict,
    RequirementsAmbiguity,
    BudgetAlert,
    /// Reviewer reported an unverified critical finding.
    CriticalFinding,
    /// Reviewer reported risk=high and satisfaction=low in the same report.
    RiskEscalation,
    /// Reviewer set `NEEDS_HUMAN_REVIEW: yes`.
    HumanReviewRequested,
    /// A phase exhausted its cycle budget without approval.
    CycleLimitReached,
}

/// An agent-surfaced issue routed to humans or other phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discovery {
    pub id: String,
    pub source: String,
    pub kind: DiscoveryKind,
    pub detail: String,
    pub affects: Option<String>,
    pub resolved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseKind {
    Note,
    Decision,
    Failure,
    ReviewerFeedback,
}

/// A timestamped note emitted by a phase, replayed into downstream prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pulse {
    pub task_id: String,
    pub content: String,
    pub kind: PulseKind,
    pub created_at: DateTime<Utc>,
}

/// A point-in-time consistent view of the whole fabric, built within a
/// single storage transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub entanglements: Vec<Entanglement>,
    pub file_claims: std::collections::BTreeMap<String, String>,
    pub completed: Vec<String>,
    pub in_progress: Vec<String>,
    pub unresolved_discoveries: Vec<Discovery>,
    pub pulses: Vec<Pulse>,
}

impl Snapshot {
    /// Render a stable, byte-deterministic text block for LLM consumption:
    /// entanglements sorted by producer then name; claims by path.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("## Entanglements\n");
        let mut ents = self.entanglements.clone();
        ents.sort_by(|a, b| (a.producer.as_str(), a.name.as_str()).cmp(&(b.producer.as_str(), b.name.as_str())));
        for e in &ents {
            out.push_str(&format!(
                "- {:?} {} ({}) from {} [{:?}]\n",
                e.kind, e.name, e.package, e.producer, e.status
            ));
        }
        out.push_str("\n## File claims\n");
        for (path, owner) in &self.file_claims {
            out.push_str(&format!("- {path} -> {owner}\n"));
        }
        out.push_str("\n## Completed\n");
        for id in &self.completed {
            out.push_str(&format!("- {id}\n"));
        }
        out.push_str("\n## In progress\n");
        for id in &self.in_progress {
            out.push_str(&format!("- {id}\n"));
        }
        out.push_str("\n## Unresolved discoveries\n");
        for d in &self.unresolved_discoveries {
            out.push_str(&format!("- [{:?}] {} ({})\n", d.kind, d.detail, d.source));
        }
        out.push_str("\n## Pulses\n");
        for p in &self.pulses {
            out.push_str(&format!("- [{:?}] {}: {}\n", p.kind, p.task_id, p.content));
        }
        out
    }
}
