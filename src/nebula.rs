//! `Nebula`: the top-level run directory owner — the manifest, phase set,
//! and the on-disk layout (`nebula.toml`, `<phase-id>.md`, `state.toml`,
//! `metrics.toml`, `checkpoint.<phase-id>.toml`, `fabric.db`) that a single
//! orchestration run lives inside.

use crate::manifest::Manifest;
use crate::metrics::{NebulaTotals, PhaseMetrics};
use crate::phase::Phase;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub struct Nebula {
    pub manifest: Manifest,
    pub phases: BTreeMap<String, Phase>,
    pub root: PathBuf,
}

impl Nebula {
    pub fn nebula_toml_path(root: &Path) -> PathBuf {
        root.join("nebula.toml")
    }

    pub fn phase_file_path(root: &Path, phase_id: &str) -> PathBuf {
        root.join(format!("{phase_id}.md"))
    }

    pub fn state_toml_path(root: &Path) -> PathBuf {
        root.join("state.toml")
    }

    pub fn metrics_toml_path(root: &Path) -> PathBuf {
        root.join("metrics.toml")
    }

    pub fn fabric_db_path(root: &Path) -> PathBuf {
        root.join("fabric.db")
    }

    /// Load a nebula from `root`: `nebula.toml` plus every `*.md` phase
    /// file directly under it.
    pub fn load(root: &Path) -> Result<Self> {
        let manifest_path = Self::nebula_toml_path(root);
        let manifest = Manifest::load(&manifest_path).with_context(|| format!("loading manifest from {}", manifest_path.display()))?;
        let mut phases = BTreeMap::new();
        for entry in std::fs::read_dir(root).with_context(|| format!("reading nebula directory {}", root.display()))? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let phase = Phase::load(&path)?;
            phases.insert(phase.id.clone(), phase);
        }
        Ok(Self { manifest, phases, root: root.to_path_buf() })
    }

    pub fn phase_ids(&self) -> Vec<String> {
        self.phases.keys().cloned().collect()
    }

    /// Aggregate totals across every phase's recorded metrics.
    pub fn totals(per_phase: &[PhaseMetrics]) -> NebulaTotals {
        let mut totals = NebulaTotals::default();
        for m in per_phase {
            totals.total_cost_usd += m.cost_usd;
            totals.total_cycles += m.cycles_used;
            totals.total_restarts += m.restarts;
            if m.conflict {
                totals.total_conflicts += 1;
            }
        }
        totals
    }
}
