//! The bounded coder-reviewer cycle: drives one phase through
//! coder -> filter -> commit -> reviewer -> struggle-check -> budget-check,
//! up to `max_cycles`, checkpointing at review completion and at terminal
//! outcomes. Reviewer output is parsed as tolerant `ISSUE:`/`VERIFICATION:`/
//! `REPORT:` line-prefixed blocks; coder output is scanned for `ENTANGLEMENT:`
//! lines that get published to the fabric.

use super::checkpoint;
use super::state::{CycleState, Finding, Level, LoopPhase, ReviewReport, Severity, Verification, VerificationStatus};
use super::struggle::{self, StruggleConfig, StruggleEvaluation};
use crate::branch::BranchManager;
use crate::errors::LoopError;
use crate::fabric::{Discovery, DiscoveryKind, Entanglement, EntanglementKind, EntanglementStatus, FabricStore, Pulse, PulseKind};
use crate::filter::Filter;
use crate::invoker::{AgentSpec, Invoker};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Reviewer approved with no unverified critical findings.
    Approved,
    /// Phase should be handed to the architect for decomposition.
    StruggleDetected(StruggleEvaluation),
    /// Budget was exhausted before approval.
    BudgetExceeded,
    /// Max cycles reached without approval.
    MaxCyclesReached,
    /// Reviewer flagged this for a human (gate=Approve path).
    NeedsHumanReview(ReviewReport),
}

/// Lenient/standard/strict reviewer posture, widening as the loop nears
/// `max_cycles` without approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReviewStrictness {
    Lenient,
    Standard,
    Strict,
}

impl ReviewStrictness {
    fn label(&self) -> &'static str {
        match self {
            ReviewStrictness::Lenient => "lenient",
            ReviewStrictness::Standard => "standard",
            ReviewStrictness::Strict => "strict",
        }
    }

    fn guidance(&self) -> &'static str {
        match self {
            ReviewStrictness::Lenient => "Focus on approach correctness; let style and polish slide.",
            ReviewStrictness::Standard => "Review for correctness and reasonable quality.",
            ReviewStrictness::Strict => "Be exacting: this phase is close to its cycle limit.",
        }
    }
}

/// Cycle N of M: early cycles get a lenient reviewer, middle cycles
/// standard, late cycles strict.
fn strictness_for_cycle(cycle: u32, max_cycles: u32) -> ReviewStrictness {
    if max_cycles <= 1 {
        return ReviewStrictness::Strict;
    }
    let fraction = (cycle.saturating_sub(1)) as f64 / (max_cycles - 1) as f64;
    if fraction < 1.0 / 3.0 {
        ReviewStrictness::Lenient
    } else if fraction < 2.0 / 3.0 {
        ReviewStrictness::Standard
    } else {
        ReviewStrictness::Strict
    }
}

pub struct CycleRunner {
    coder_agent: AgentSpec,
    reviewer_agent: AgentSpec,
    invoker: Arc<dyn Invoker>,
    filter: Filter,
    struggle_config: StruggleConfig,
    fabric: Arc<FabricStore>,
    branch: Arc<BranchManager>,
}

impl CycleRunner {
    pub fn new(
        coder_agent: AgentSpec,
        reviewer_agent: AgentSpec,
        invoker: Arc<dyn Invoker>,
        filter: Filter,
        struggle_config: StruggleConfig,
        fabric: Arc<FabricStore>,
        branch: Arc<BranchManager>,
    ) -> Self {
        Self { coder_agent, reviewer_agent, invoker, filter, struggle_config, fabric, branch }
    }

    /// Run (or resume) the cycle loop for a single phase until a terminal
    /// outcome. `work_dir` is the checkout the coder/reviewer/filter act on;
    /// `nebula_dir` is where checkpoints are written.
    pub async fn run(&self, mut state: CycleState, phase_body: &str, work_dir: &Path, nebula_dir: &Path, git_sha: &str) -> Result<(CycleState, CycleOutcome), LoopError> {
        loop {
            if state.budget_exceeded() {
                self.post_discovery(&state, DiscoveryKind::BudgetAlert, format!("budget exhausted at cycle {} of {}", state.cycle, state.max_cycles));
                checkpoint::save(nebula_dir, &state.task_id, &state, git_sha).map_err(LoopError::Other)?;
                return Ok((state, CycleOutcome::BudgetExceeded));
            }
            if state.cycle > state.max_cycles {
                let summary = format!(
                    "max cycles ({}) reached without approval; {} unresolved finding(s)",
                    state.max_cycles,
                    state.findings.len(),
                );
                self.post_discovery(&state, DiscoveryKind::CycleLimitReached, summary);
                checkpoint::save(nebula_dir, &state.task_id, &state, git_sha).map_err(LoopError::Other)?;
                return Ok((state, CycleOutcome::MaxCyclesReached));
            }

            state.phase = LoopPhase::Coder;
            let prior_findings = state.all_findings.clone();
            let coder_prompt = self.build_coder_prompt(phase_body, &state);
            let coder_result = self
                .invoker
                .invoke(&self.coder_agent, &coder_prompt, work_dir)
                .await
                .map_err(|e| LoopError::Invoker(e.to_string()))?;
            state.coder_output = coder_result.result_text;
            state.total_cost_usd += coder_result.cost_usd;

            for entanglement in parse_entanglements(&state.coder_output, &state.task_id) {
                self.fabric.publish(&entanglement).map_err(|e| LoopError::Other(e.into()))?;
            }

            let filter_result = self.filter.run(work_dir);
            let filter_marker = if filter_result.passed() { "pass".to_string() } else { filter_result.first_failed_check_name.clone().unwrap_or_else(|| "fail".into()) };
            state.filter_history.push(filter_marker);

            let cycle_sha = self
                .branch
                .commit_cycle(&state.task_id, state.cycle, &state.task_title)
                .map_err(LoopError::Other)?;
            state.cycle_commits.push(cycle_sha);

            if let Ok(changes) = self.branch.diff_summary(&state.base_commit_sha) {
                state.progress.update(&changes, None);
            }

            if !filter_result.passed() {
                state.cycle += 1;
                continue;
            }

            state.phase = LoopPhase::Reviewer;
            let reviewer_prompt = self.build_reviewer_prompt(phase_body, &state);
            let reviewer_result = self
                .invoker
                .invoke(&self.reviewer_agent, &reviewer_prompt, work_dir)
                .await
                .map_err(|e| LoopError::Invoker(e.to_string()))?;
            state.total_cost_usd += reviewer_result.cost_usd;

            let parsed = parse_reviewer_output(&reviewer_result.result_text);
            state.verifications.extend(parsed.verifications);
            state.findings.extend(parsed.findings.clone());
            state.all_findings.extend(parsed.findings);
            state.review_report = parsed.report.clone();

            if let Some(report) = &parsed.report {
                self.emit_review_pulse(&state, report);
                if report.risk == Level::High && report.satisfaction == Level::Low {
                    self.post_discovery(&state, DiscoveryKind::RiskEscalation, format!("risk=high, satisfaction=low at cycle {}: {}", state.cycle, report.summary));
                }
            }

            checkpoint::save(nebula_dir, &state.task_id, &state, git_sha).map_err(LoopError::Other)?;

            if let Some(report) = &parsed.report {
                if report.needs_human_review {
                    self.post_discovery(&state, DiscoveryKind::HumanReviewRequested, report.summary.clone());
                    state.phase = LoopPhase::Idle;
                    return Ok((state, CycleOutcome::NeedsHumanReview(report.clone())));
                }
            }

            if !state.has_unverified_critical_finding() {
                state.phase = LoopPhase::Approved;
                let nebula_name = self.branch.nebula_name().to_string();
                let phase_sha = self
                    .branch
                    .commit_phase(&nebula_name, &state.task_id, &state.task_title)
                    .map_err(LoopError::Other)?;
                state.cycle_commits.push(phase_sha);
                checkpoint::save(nebula_dir, &state.task_id, &state, git_sha).map_err(LoopError::Other)?;
                return Ok((state, CycleOutcome::Approved));
            }

            self.post_discovery(
                &state,
                DiscoveryKind::CriticalFinding,
                format!("unverified critical finding remains at cycle {}", state.cycle),
            );

            if let Some(eval) = struggle::evaluate(&state, &prior_findings, &self.struggle_config, Some(&state.progress)) {
                if eval.should_decompose {
                    return Ok((state, CycleOutcome::StruggleDetected(eval)));
                }
            }

            state.cycle += 1;
        }
    }

    fn post_discovery(&self, state: &CycleState, kind: DiscoveryKind, detail: String) {
        let discovery = Discovery {
            id: Uuid::new_v4().to_string(),
            source: state.task_id.clone(),
            kind,
            detail,
            affects: Some(state.task_id.clone()),
            resolved: false,
        };
        if let Err(e) = self.fabric.post_discovery(&discovery) {
            tracing::warn!(phase = %state.task_id, error = %e, "failed to post discovery");
        }
    }

    fn emit_review_pulse(&self, state: &CycleState, report: &ReviewReport) {
        let pulse = Pulse {
            task_id: state.task_id.clone(),
            content: format!("cycle {}: satisfaction={:?} risk={:?}: {}", state.cycle, report.satisfaction, report.risk, report.summary),
            kind: PulseKind::ReviewerFeedback,
            created_at: Utc::now(),
        };
        if let Err(e) = self.fabric.emit_pulse(&pulse) {
            tracing::warn!(phase = %state.task_id, error = %e, "failed to emit pulse");
        }
    }

    fn build_coder_prompt(&self, phase_body: &str, state: &CycleState) -> String {
        let mut sections = vec![phase_body.to_string()];

        if !state.findings.is_empty() {
            let issues: Vec<String> = state
                .findings
                .iter()
                .map(|f| format!("- [{:?}] {}{}", f.severity, f.description, f.file.as_deref().map(|p| format!(" ({p})")).unwrap_or_default()))
                .collect();
            sections.push(format!("Address the following review findings:\n{}", issues.join("\n")));
        }

        let pulses = self.fabric.pulses_for(&state.task_id).unwrap_or_default();
        if !pulses.is_empty() {
            let lines: Vec<String> = pulses.iter().map(|p| format!("- [{:?}] {}", p.kind, p.content)).collect();
            sections.push(format!("Prior pulses for this task:\n{}", lines.join("\n")));
        }

        if let Ok(snapshot) = self.fabric.build_snapshot() {
            sections.push(format!("Fabric snapshot:\n{}", snapshot.render()));
        }

        let remaining_cycles = (state.max_cycles - state.cycle + 1).max(1);
        let budget_hint = state.remaining_budget() / (2.0 * remaining_cycles as f64);
        sections.push(format!("Budget for this cycle: ${budget_hint:.2} (cycle {} of {})", state.cycle, state.max_cycles));

        sections.join("\n\n")
    }

    fn build_reviewer_prompt(&self, phase_body: &str, state: &CycleState) -> String {
        let strictness = strictness_for_cycle(state.cycle, state.max_cycles);
        format!(
            "[Review mode: {} — cycle {}/{}]\n{}\n\nReview the changes made for the following task:\n{phase_body}\n\nCoder output:\n{}",
            strictness.label(),
            state.cycle,
            state.max_cycles,
            strictness.guidance(),
            state.coder_output,
        )
    }
}

/// Parse `ENTANGLEMENT: <kind>|<name>|<package>|<signature>` lines from
/// coder output. Malformed lines are skipped rather than erroring.
fn parse_entanglements(text: &str, producer: &str) -> Vec<Entanglement> {
    let mut out = Vec::new();
    for line in text.lines() {
        let Some(rest) = line.trim().strip_prefix("ENTANGLEMENT:") else { continue };
        let parts: Vec<&str> = rest.trim().splitn(4, '|').collect();
        let [kind, name, package, signature] = parts.as_slice() else { continue };
        out.push(Entanglement {
            producer: producer.to_string(),
            kind: parse_entanglement_kind(kind.trim()),
            name: name.trim().to_string(),
            package: package.trim().to_string(),
            signature: signature.trim().to_string(),
            status: EntanglementStatus::Fulfilled,
        });
    }
    out
}

fn parse_entanglement_kind(s: &str) -> EntanglementKind {
    match s {
        "type" => EntanglementKind::Type,
        "function" => EntanglementKind::Function,
        "interface" => EntanglementKind::Interface,
        "constant" => EntanglementKind::Constant,
        "package" => EntanglementKind::Package,
        _ => EntanglementKind::Other,
    }
}

struct ParsedReview {
    findings: Vec<Finding>,
    verifications: Vec<Verification>,
    report: Option<ReviewReport>,
}

/// Parse reviewer output for `ISSUE:`, `VERIFICATION:`, and `REPORT:` blocks.
/// Unrecognized lines are ignored.
fn parse_reviewer_output(text: &str) -> ParsedReview {
    let mut findings = Vec::new();
    let mut verifications = Vec::new();
    let mut report = None;
    let mut next_finding_id = 1usize;

    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("ISSUE:") {
            let (severity, description) = split_severity(rest.trim());
            findings.push(Finding {
                id: format!("f{next_finding_id}"),
                severity,
                description,
                file: None,
                line: None,
            });
            next_finding_id += 1;
        } else if let Some(rest) = line.strip_prefix("VERIFICATION:") {
            if let Some((finding_id, status_str, comment)) = split_verification(rest.trim()) {
                let status = match status_str.to_lowercase().as_str() {
                    "fixed" => VerificationStatus::Fixed,
                    "regressed" => VerificationStatus::Regressed,
                    _ => VerificationStatus::StillPresent,
                };
                verifications.push(Verification { finding_id, status, comment });
            }
        } else if let Some(rest) = line.strip_prefix("REPORT:") {
            report = Some(parse_report(rest.trim()));
        }
    }

    ParsedReview { findings, verifications, report }
}

fn split_severity(s: &str) -> (Severity, String) {
    if let Some(rest) = s.strip_prefix("[critical]") {
        (Severity::Critical, rest.trim().to_string())
    } else if let Some(rest) = s.strip_prefix("[major]") {
        (Severity::Major, rest.trim().to_string())
    } else if let Some(rest) = s.strip_prefix("[minor]") {
        (Severity::Minor, rest.trim().to_string())
    } else {
        (Severity::Minor, s.to_string())
    }
}

fn split_verification(s: &str) -> Option<(String, String, String)> {
    let mut parts = s.splitn(3, '|');
    let id = parts.next()?.trim().to_string();
    let status = parts.next()?.trim().to_string();
    let comment = parts.next().unwrap_or("").trim().to_string();
    Some((id, status, comment))
}

fn parse_report(s: &str) -> ReviewReport {
    let mut satisfaction = Level::Medium;
    let mut risk = Level::Medium;
    let mut needs_human_review = false;
    let mut summary = String::new();

    for field in s.split(';') {
        let field = field.trim();
        if let Some(v) = field.strip_prefix("satisfaction=") {
            satisfaction = parse_level(v);
        } else if let Some(v) = field.strip_prefix("risk=") {
            risk = parse_level(v);
        } else if let Some(v) = field.strip_prefix("needs_human=") {
            needs_human_review = v.eq_ignore_ascii_case("true");
        } else if let Some(v) = field.strip_prefix("summary=") {
            summary = v.to_string();
        }
    }

    ReviewReport { satisfaction, risk, needs_human_review, summary }
}

fn parse_level(s: &str) -> Level {
    match s.to_lowercase().as_str() {
        "low" => Level::Low,
        "high" => Level::High,
        _ => Level::Medium,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::{InvocationResult, InvokerError};
    use async_trait::async_trait;
    use git2::{Repository, Signature};
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedInvoker {
        coder_cost: f64,
        reviewer_responses: Vec<String>,
        call_count: AtomicUsize,
    }

    #[async_trait]
    impl Invoker for ScriptedInvoker {
        async fn invoke(&self, spec: &AgentSpec, _prompt: &str, _work_dir: &Path) -> Result<InvocationResult, InvokerError> {
            if spec.name == "coder" {
                return Ok(InvocationResult {
                    result_text: "implemented".into(),
                    cost_usd: self.coder_cost,
                    duration: std::time::Duration::from_secs(1),
                    session_id: "scripted-coder".into(),
                });
            }
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            let text = self.reviewer_responses.get(idx).cloned().unwrap_or_else(|| "REPORT: satisfaction=high;risk=low;needs_human=false;summary=ok".into());
            Ok(InvocationResult { result_text: text, cost_usd: 0.1, duration: std::time::Duration::from_secs(1), session_id: "scripted-reviewer".into() })
        }
    }

    fn make_filter_always_pass() -> Filter {
        Filter::new(vec![])
    }

    /// A throwaway git repo with one initial commit, wrapped in a
    /// `BranchManager` already checked out onto `nebula/<nebula>`.
    fn init_branch(nebula: &str) -> (tempfile::TempDir, Arc<BranchManager>, String) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let sig = Signature::now("test", "test@localhost").unwrap();
        let mut index = repo.index().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
        drop(repo);

        let manager = BranchManager::open(dir.path(), nebula).unwrap();
        manager.ensure_branch().unwrap();
        let base_sha = manager.head_sha().unwrap();
        (dir, Arc::new(manager), base_sha)
    }

    #[tokio::test]
    async fn approves_when_reviewer_reports_no_issues() {
        let invoker = Arc::new(ScriptedInvoker {
            coder_cost: 0.5,
            reviewer_responses: vec!["REPORT: satisfaction=high;risk=low;needs_human=false;summary=clean".into()],
            call_count: AtomicUsize::new(0),
        });
        let (dir, branch, base_sha) = init_branch("demo");
        let fabric = Arc::new(FabricStore::open_in_memory().unwrap());
        let runner = CycleRunner::new(
            AgentSpec { name: "coder".into(), model: None },
            AgentSpec { name: "reviewer".into(), model: None },
            invoker,
            make_filter_always_pass(),
            StruggleConfig::default(),
            fabric,
            branch,
        );
        let state = CycleState::new("T1", "Build thing", 5, 10.0, &base_sha);
        let (final_state, outcome) = runner.run(state, "do the thing", dir.path(), dir.path(), &base_sha).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Approved);
        assert_eq!(final_state.phase, LoopPhase::Approved);
        assert!(!final_state.cycle_commits.is_empty());
    }

    #[tokio::test]
    async fn stops_at_max_cycles_with_persistent_critical_finding() {
        let invoker = Arc::new(ScriptedInvoker {
            coder_cost: 0.1,
            reviewer_responses: vec![
                "ISSUE: [critical] sql injection\nREPORT: satisfaction=low;risk=high;needs_human=false;summary=bad".into(),
                "ISSUE: [critical] sql injection\nREPORT: satisfaction=low;risk=high;needs_human=false;summary=bad".into(),
            ],
            call_count: AtomicUsize::new(0),
        });
        let (dir, branch, base_sha) = init_branch("demo");
        let fabric = Arc::new(FabricStore::open_in_memory().unwrap());
        let runner = CycleRunner::new(
            AgentSpec { name: "coder".into(), model: None },
            AgentSpec { name: "reviewer".into(), model: None },
            invoker,
            make_filter_always_pass(),
            StruggleConfig { min_cycles_before_check: 100, ..StruggleConfig::default() },
            fabric.clone(),
            branch,
        );
        let state = CycleState::new("T1", "Build thing", 2, 10.0, &base_sha);
        let (_final_state, outcome) = runner.run(state, "do the thing", dir.path(), dir.path(), &base_sha).await.unwrap();
        assert_eq!(outcome, CycleOutcome::MaxCyclesReached);
        let discoveries = fabric.all_discoveries().unwrap();
        assert!(discoveries.iter().any(|d| d.kind == DiscoveryKind::CycleLimitReached));
    }

    #[tokio::test]
    async fn risk_escalation_posts_discovery_and_pulse_is_fed_back() {
        let invoker = Arc::new(ScriptedInvoker {
            coder_cost: 0.1,
            reviewer_responses: vec!["REPORT: satisfaction=low;risk=high;needs_human=false;summary=worrying coupling".into()],
            call_count: AtomicUsize::new(0),
        });
        let (dir, branch, base_sha) = init_branch("demo");
        let fabric = Arc::new(FabricStore::open_in_memory().unwrap());
        let runner = CycleRunner::new(
            AgentSpec { name: "coder".into(), model: None },
            AgentSpec { name: "reviewer".into(), model: None },
            invoker,
            make_filter_always_pass(),
            StruggleConfig { min_cycles_before_check: 100, ..StruggleConfig::default() },
            fabric.clone(),
            branch,
        );
        let state = CycleState::new("T1", "Build thing", 1, 10.0, &base_sha);
        let _ = runner.run(state, "do the thing", dir.path(), dir.path(), &base_sha).await.unwrap();

        let discoveries = fabric.all_discoveries().unwrap();
        assert!(discoveries.iter().any(|d| d.kind == DiscoveryKind::RiskEscalation));
        let pulses = fabric.pulses_for("T1").unwrap();
        assert!(pulses.iter().any(|p| p.kind == PulseKind::ReviewerFeedback));
    }

    #[test]
    fn parses_issue_and_report_lines() {
        let parsed = parse_reviewer_output("ISSUE: [critical] broken auth\nREPORT: satisfaction=medium;risk=high;needs_human=true;summary=needs eyes");
        pretty_assert_eq!(parsed.findings.len(), 1);
        assert_eq!(parsed.findings[0].severity, Severity::Critical);
        let report = parsed.report.unwrap();
        assert!(report.needs_human_review);
        assert_eq!(report.risk, Level::High);
    }

    #[test]
    fn parses_verification_line() {
        let parsed = parse_reviewer_output("VERIFICATION: f1|fixed|patched the query");
        assert_eq!(parsed.verifications.len(), 1);
        assert_eq!(parsed.verifications[0].status, VerificationStatus::Fixed);
    }

    #[test]
    fn parses_entanglement_line() {
        let entanglements = parse_entanglements("ENTANGLEMENT: type|Store|pkg|struct Store;", "01");
        assert_eq!(entanglements.len(), 1);
        assert_eq!(entanglements[0].name, "Store");
        assert_eq!(entanglements[0].producer, "01");
    }

    #[rstest::rstest]
    #[case(1, 6, ReviewStrictness::Lenient)]
    #[case(4, 6, ReviewStrictness::Standard)]
    #[case(6, 6, ReviewStrictness::Strict)]
    fn strictness_escalates_from_lenient_to_strict(#[case] cycle: u32, #[case] max_cycles: u32, #[case] expected: ReviewStrictness) {
        assert_eq!(strictness_for_cycle(cycle, max_cycles), expected);
    }
}
