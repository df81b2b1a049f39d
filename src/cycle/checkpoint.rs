//! Checkpoint persistence: atomically serialize `CycleState` to
//! `checkpoint.<phase-id>.toml` via write-temp-then-rename.

use super::state::CycleState;
use crate::errors::LoopError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointDocument {
    version: u32,
    git_sha: String,
    #[serde(flatten)]
    state: CycleState,
}

pub fn checkpoint_path(nebula_dir: &Path, phase_id: &str) -> PathBuf {
    nebula_dir.join(format!("checkpoint.{phase_id}.toml"))
}

/// Serialize atomically: write to a temp file in the same directory, then
/// rename over the target (atomic on POSIX filesystems).
pub fn save(nebula_dir: &Path, phase_id: &str, state: &CycleState, git_sha: &str) -> Result<()> {
    let doc = CheckpointDocument {
        version: CHECKPOINT_VERSION,
        git_sha: git_sha.to_string(),
        state: state.clone(),
    };
    let content = toml::to_string_pretty(&doc).context("serializing checkpoint")?;
    let target = checkpoint_path(nebula_dir, phase_id);
    let tmp = target.with_extension("toml.tmp");
    std::fs::write(&tmp, content).with_context(|| format!("writing checkpoint temp file: {}", tmp.display()))?;
    std::fs::rename(&tmp, &target).with_context(|| format!("renaming checkpoint into place: {}", target.display()))?;
    Ok(())
}

/// Returns `Ok(None)` if no checkpoint exists for this phase.
pub fn load(nebula_dir: &Path, phase_id: &str) -> Result<Option<CycleState>> {
    let path = checkpoint_path(nebula_dir, phase_id);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).with_context(|| format!("reading checkpoint: {}", path.display()))?;
    let doc: CheckpointDocument = toml::from_str(&content).context("parsing checkpoint")?;
    Ok(Some(doc.state))
}

/// Validate a loaded checkpoint against the current git HEAD. `version`
/// must equal 1, `cycle` must be >= 1, and `git_sha` must match `head_sha`
/// unless overridden.
pub fn validate(nebula_dir: &Path, phase_id: &str, head_sha: &str, allow_sha_mismatch: bool) -> Result<CycleState, LoopError> {
    let path = checkpoint_path(nebula_dir, phase_id);
    let content = std::fs::read_to_string(&path).map_err(|e| LoopError::Other(e.into()))?;
    let doc: CheckpointDocument = toml::from_str(&content).map_err(|e| LoopError::Other(e.into()))?;

    if doc.version != CHECKPOINT_VERSION {
        return Err(LoopError::UnsupportedCheckpointVersion {
            found: doc.version,
            expected: CHECKPOINT_VERSION,
        });
    }
    if !allow_sha_mismatch && doc.git_sha != head_sha {
        return Err(LoopError::GitShaMismatch {
            checkpoint_sha: doc.git_sha,
            head_sha: head_sha.to_string(),
        });
    }
    if doc.state.cycle < 1 {
        return Err(LoopError::Other(anyhow::anyhow!("checkpoint cycle must be >= 1")));
    }

    Ok(doc.state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> CycleState {
        let mut s = CycleState::new("T1", "Build core", 5, 10.0, "abc123");
        s.cycle = 3;
        s.total_cost_usd = 2.5;
        s
    }

    #[test]
    fn round_trip_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = sample_state();
        save(dir.path(), "02", &state, "sha-1").unwrap();
        let loaded = load(dir.path(), "02").unwrap().unwrap();
        assert_eq!(loaded.cycle, state.cycle);
        assert_eq!(loaded.total_cost_usd, state.total_cost_usd);
        assert_eq!(loaded.task_id, state.task_id);
    }

    #[test]
    fn load_returns_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path(), "missing").unwrap().is_none());
    }

    #[test]
    fn validate_succeeds_when_git_sha_matches() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), "02", &sample_state(), "sha-1").unwrap();
        let state = validate(dir.path(), "02", "sha-1", false).unwrap();
        assert_eq!(state.cycle, 3);
    }

    #[test]
    fn validate_fails_on_sha_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), "02", &sample_state(), "sha-1").unwrap();
        let err = validate(dir.path(), "02", "sha-2", false).unwrap_err();
        assert!(matches!(err, LoopError::GitShaMismatch { .. }));
    }

    #[test]
    fn validate_allows_sha_mismatch_override() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), "02", &sample_state(), "sha-1").unwrap();
        let state = validate(dir.path(), "02", "sha-2", true).unwrap();
        assert_eq!(state.cycle, 3);
    }
}
