//! Metrics & the AIMD adaptive concurrency controller.

pub mod aimd;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Files touched by a cycle or phase, as seen by a git diff against the
/// commit the work started from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileChangeSummary {
    pub files_added: Vec<PathBuf>,
    pub files_modified: Vec<PathBuf>,
    pub files_deleted: Vec<PathBuf>,
    pub total_lines_added: usize,
    pub total_lines_removed: usize,
}

impl FileChangeSummary {
    pub fn total_files(&self) -> usize {
        self.files_added.len() + self.files_modified.len() + self.files_deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_files() == 0
    }
}

/// The outcome of one completed phase, carrying its metrics and the files
/// it touched, for the run summary and for progress tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase_id: String,
    pub outcome: String,
    pub cycles_used: u32,
    pub cost_usd: f64,
    pub changes: FileChangeSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub phase_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<std::time::Duration>,
    pub cycles_used: u32,
    pub cost_usd: f64,
    pub restarts: u32,
    pub lock_wait_time: std::time::Duration,
    pub satisfaction: Option<Satisfaction>,
    pub conflict: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Satisfaction {
    Low,
    Medium,
    High,
}

impl Satisfaction {
    pub fn is_low(&self) -> bool {
        matches!(self, Satisfaction::Low)
    }

    pub fn score(&self) -> f64 {
        match self {
            Satisfaction::Low => 0.0,
            Satisfaction::Medium => 0.5,
            Satisfaction::High => 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaveMetrics {
    pub number: usize,
    pub effective_parallelism: usize,
    pub actual_parallelism: usize,
    pub phase_count: usize,
    pub total_duration: std::time::Duration,
    pub conflicts: usize,
    pub avg_satisfaction: Option<f64>,
}

/// Aggregate totals tracked on the nebula across its whole run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NebulaTotals {
    pub total_cost_usd: f64,
    pub total_cycles: u32,
    pub total_restarts: u32,
    pub total_conflicts: usize,
}
