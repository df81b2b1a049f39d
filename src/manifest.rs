//! Nebula manifest (`nebula.toml`): the `[execution]` section and the typed
//! `ExecutionConfig` it resolves to.
//!
//! Loading is layered file -> environment -> explicit override, letting
//! environment variables punch through an authored file for CI/automation
//! use. Unknown keys in the `[execution]` table are rejected so typos fail
//! fast at load rather than silently no-op.

use crate::metrics::aimd::Strategy;
use crate::phase::GateMode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The `[execution]` section of `nebula.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub gate: GateMode,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub auto_decompose: bool,
    #[serde(default = "default_true")]
    pub context_caching: bool,
    #[serde(default = "default_max_cycles")]
    pub max_cycles_per_phase: u32,
    #[serde(default = "default_max_budget")]
    pub max_budget_usd: f64,
}

fn default_max_workers() -> usize {
    4
}
fn default_true() -> bool {
    true
}
fn default_max_cycles() -> u32 {
    5
}
fn default_max_budget() -> f64 {
    10.0
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            gate: GateMode::Inherit,
            strategy: Strategy::default(),
            auto_decompose: false,
            context_caching: true,
            max_cycles_per_phase: default_max_cycles(),
            max_budget_usd: default_max_budget(),
        }
    }
}

/// Top-level `nebula.toml` manifest.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

impl Manifest {
    /// Load the manifest from a `nebula.toml` file, then apply `QUASAR_*`
    /// environment overrides for a fixed set of recognized knobs.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest: {}", path.display()))?;
        let mut manifest: Manifest =
            toml::from_str(&content).with_context(|| format!("failed to parse manifest: {}", path.display()))?;
        manifest.apply_env_overrides();
        Ok(manifest)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("QUASAR_MAX_WORKERS") {
            if let Ok(n) = v.parse() {
                self.execution.max_workers = n;
            }
        }
        if let Ok(v) = std::env::var("QUASAR_STRATEGY") {
            if let Ok(s) = v.parse() {
                self.execution.strategy = s;
            }
        }
        if let Ok(v) = std::env::var("QUASAR_MAX_BUDGET_USD") {
            if let Ok(n) = v.parse() {
                self.execution.max_budget_usd = n;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_execution_config_matches_documented_defaults() {
        let cfg = ExecutionConfig::default();
        assert_eq!(cfg.max_workers, 4);
        assert_eq!(cfg.max_cycles_per_phase, 5);
        assert!(cfg.context_caching);
        assert!(!cfg.auto_decompose);
    }

    #[test]
    fn unknown_execution_key_is_rejected() {
        let toml_str = "max_workers = 2\nbogus_key = true\n";
        let result: Result<ExecutionConfig, _> = toml::from_str(toml_str);
        assert!(result.is_err());
    }

    #[test]
    fn manifest_loads_and_defaults_execution_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nebula.toml");
        std::fs::write(&path, "name = \"demo\"\n").unwrap();
        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.name, "demo");
        assert_eq!(manifest.execution.max_workers, 4);
    }

    #[test]
    fn env_override_wins_over_file_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nebula.toml");
        std::fs::write(&path, "name = \"demo\"\n[execution]\nmax_workers = 2\n").unwrap();
        // SAFETY: test is single-threaded with respect to this env var.
        unsafe { std::env::set_var("QUASAR_MAX_WORKERS", "9") };
        let manifest = Manifest::load(&path).unwrap();
        unsafe { std::env::remove_var("QUASAR_MAX_WORKERS") };
        assert_eq!(manifest.execution.max_workers, 9);
    }
}
