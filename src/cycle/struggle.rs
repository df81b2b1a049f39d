//! Struggle detection: a composite signal of non-progress across cycles
//! that triggers decomposition, combining three named signals — filter
//! repeat, finding overlap, and burn rate — into a threshold-driven score.

use super::state::CycleState;
use crate::metrics::FileChangeSummary;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy)]
pub struct StruggleConfig {
    pub min_cycles_before_check: u32,
    pub filter_repeat_threshold: u32,
    pub overlap_threshold: f64,
    pub burn_rate_threshold: f64,
    pub composite_threshold: f64,
    /// Consecutive cycles with no new/modified files and no rising
    /// progress percentage before the loop forces decomposition, even if
    /// the weighted composite score hasn't crossed its threshold.
    pub stale_iteration_threshold: u32,
}

impl Default for StruggleConfig {
    fn default() -> Self {
        Self {
            min_cycles_before_check: 2,
            filter_repeat_threshold: 2,
            overlap_threshold: 0.8,
            burn_rate_threshold: 1.0,
            composite_threshold: 0.6,
            stale_iteration_threshold: 3,
        }
    }
}

/// Tracks whether successive cycles are producing file changes or
/// reported progress, independent of the weighted composite score.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressTracker {
    pub stale_iterations: u32,
    pub last_file_count: usize,
    pub has_progress_signal: bool,
    pub last_progress_pct: Option<u8>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update with the latest cycle's file changes and optional
    /// self-reported progress percentage; returns whether progress was made.
    pub fn update(&mut self, changes: &FileChangeSummary, progress_pct: Option<u8>) -> bool {
        let current_count = changes.total_files();
        let made_progress = current_count > self.last_file_count || progress_pct > self.last_progress_pct;

        if made_progress {
            self.stale_iterations = 0;
        } else {
            self.stale_iterations += 1;
        }

        self.last_file_count = current_count;
        if let Some(pct) = progress_pct {
            self.has_progress_signal = true;
            self.last_progress_pct = Some(pct);
        }
        made_progress
    }

    pub fn is_making_progress(&self, stale_threshold: u32) -> bool {
        self.stale_iterations < stale_threshold
    }
}

#[derive(Debug, Clone)]
pub struct StruggleEvaluation {
    pub filter_repeat: u32,
    pub finding_overlap: f64,
    pub burn_rate: f64,
    pub composite_score: f64,
    pub should_decompose: bool,
    /// Set when decomposition was forced by stale iterations rather than
    /// by the weighted composite score crossing its threshold.
    pub stale_forced: bool,
}

fn norm(value: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return 0.0;
    }
    (value / threshold).clamp(0.0, 1.0)
}

/// Trailing count of identical entries at the end of `filter_history`.
fn trailing_repeat_count(filter_history: &[String]) -> u32 {
    let mut it = filter_history.iter().rev();
    let Some(last) = it.next() else { return 0 };
    let mut count = 1u32;
    for entry in it {
        if entry == last {
            count += 1;
        } else {
            break;
        }
    }
    count
}

fn tokenize(text: &str) -> std::collections::BTreeSet<String> {
    text.split_whitespace().map(|w| w.to_lowercase()).collect()
}

fn jaccard(a: &str, b: &str) -> f64 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    if union == 0.0 { 0.0 } else { intersection / union }
}

/// Fraction of current-cycle findings whose description overlaps (Jaccard
/// similarity >= threshold) with any prior finding.
fn finding_overlap_fraction(current: &[super::state::Finding], prior: &[super::state::Finding], threshold: f64) -> f64 {
    if current.is_empty() {
        return 0.0;
    }
    let overlapping = current
        .iter()
        .filter(|f| prior.iter().any(|p| jaccard(&f.description, &p.description) >= threshold))
        .count();
    overlapping as f64 / current.len() as f64
}

/// Evaluate struggle for cycle `n` (of `m`). `prior_findings` are findings
/// accumulated strictly before the current cycle. `progress` is the
/// running stale-iteration tracker for this phase; when it has gone
/// `stale_iteration_threshold` cycles with no file-change or reported
/// progress, decomposition is forced regardless of the composite score.
pub fn evaluate(
    state: &CycleState,
    prior_findings: &[super::state::Finding],
    config: &StruggleConfig,
    progress: Option<&ProgressTracker>,
) -> Option<StruggleEvaluation> {
    if state.cycle < config.min_cycles_before_check {
        return None;
    }

    let filter_repeat = trailing_repeat_count(&state.filter_history);
    let finding_overlap = finding_overlap_fraction(&state.findings, prior_findings, config.overlap_threshold);
    let burn_rate = if state.cycle == 0 {
        0.0
    } else {
        let per_cycle_spend = state.total_cost_usd / state.cycle as f64;
        let per_cycle_budget = state.max_budget_usd / state.max_cycles.max(1) as f64;
        if per_cycle_budget <= 0.0 { 0.0 } else { per_cycle_spend / per_cycle_budget }
    };

    let composite_score = 0.35 * norm(filter_repeat as f64, config.filter_repeat_threshold as f64)
        + 0.40 * norm(finding_overlap, 1.0)
        + 0.25 * norm(burn_rate, config.burn_rate_threshold);

    let stale_forced = progress
        .map(|p| !p.is_making_progress(config.stale_iteration_threshold))
        .unwrap_or(false);

    Some(StruggleEvaluation {
        filter_repeat,
        finding_overlap,
        burn_rate,
        composite_score,
        should_decompose: composite_score >= config.composite_threshold || stale_forced,
        stale_forced,
    })
}
