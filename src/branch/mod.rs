//! Branch & commit manager: per-nebula git branch lifecycle, per-cycle and
//! per-phase commits with an enforced branch name (`nebula/<name>`).

use crate::metrics::FileChangeSummary;
use anyhow::{Context, Result, bail};
use git2::{Delta, DiffOptions, Repository, Signature};

pub struct BranchManager {
    repo: Repository,
    expected_branch: String,
}

fn truncate_summary(summary: &str, max: usize) -> String {
    if summary.chars().count() <= max {
        return summary.to_string();
    }
    let truncated: String = summary.chars().take(max.saturating_sub(1)).collect();
    format!("{truncated}\u{2026}")
}

impl BranchManager {
    pub fn open(repo_path: &std::path::Path, nebula_name: &str) -> Result<Self> {
        let repo = Repository::open(repo_path).context("opening git repository")?;
        let expected_branch = format!("nebula/{nebula_name}");
        Ok(Self { repo, expected_branch })
    }

    /// Ensure `nebula/<name>` exists and is checked out before workers start.
    pub fn ensure_branch(&self) -> Result<()> {
        let already_exists = self.repo.find_branch(&self.expected_branch, git2::BranchType::Local).is_ok();
        if !already_exists {
            let head_commit = self.repo.head()?.peel_to_commit()?;
            self.repo.branch(&self.expected_branch, &head_commit, false)?;
        }
        let refname = format!("refs/heads/{}", self.expected_branch);
        self.repo.set_head(&refname)?;
        self.repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
        Ok(())
    }

    pub fn nebula_name(&self) -> &str {
        self.expected_branch.strip_prefix("nebula/").unwrap_or(&self.expected_branch)
    }

    pub fn current_branch(&self) -> Result<String> {
        let head = self.repo.head().context("reading HEAD")?;
        Ok(head.shorthand().unwrap_or("").to_string())
    }

    pub fn head_sha(&self) -> Result<String> {
        Ok(self.repo.head()?.peel_to_commit()?.id().to_string())
    }

    fn verify_branch(&self) -> Result<()> {
        let current = self.current_branch()?;
        if current != self.expected_branch {
            bail!("commit rejected: expected branch {}, current branch {}", self.expected_branch, current);
        }
        Ok(())
    }

    /// `commit_cycle(task_id, N, summary)` -> `<task_id>/cycle-<N>: <summary>`
    pub fn commit_cycle(&self, task_id: &str, cycle: u32, summary: &str) -> Result<String> {
        self.verify_branch()?;
        let message = format!("{task_id}/cycle-{cycle}: {}", truncate_summary(summary, 72));
        self.commit_all(&message)
    }

    /// `<nebula>/<phase_id>: <title>`
    pub fn commit_phase(&self, nebula_name: &str, phase_id: &str, title: &str) -> Result<String> {
        self.verify_branch()?;
        let message = format!("{nebula_name}/{phase_id}: {}", truncate_summary(title, 72));
        self.commit_all(&message)
    }

    /// Files touched in the working tree relative to `since_sha`, including
    /// untracked files. Used to feed the struggle loop's progress tracker.
    pub fn diff_summary(&self, since_sha: &str) -> Result<FileChangeSummary> {
        let since_oid = git2::Oid::from_str(since_sha).context("parsing diff base sha")?;
        let since_tree = self.repo.find_commit(since_oid)?.tree()?;

        let mut opts = DiffOptions::new();
        opts.include_untracked(true);
        let diff = self.repo.diff_tree_to_workdir_with_index(Some(&since_tree), Some(&mut opts))?;

        let mut summary = FileChangeSummary::default();
        diff.foreach(
            &mut |delta, _progress| {
                if let Some(path) = delta.new_file().path() {
                    let path_buf = path.to_path_buf();
                    match delta.status() {
                        Delta::Added | Delta::Untracked => summary.files_added.push(path_buf),
                        Delta::Modified => summary.files_modified.push(path_buf),
                        Delta::Deleted => summary.files_deleted.push(path_buf),
                        _ => {}
                    }
                }
                true
            },
            None,
            None,
            Some(&mut |_delta, _hunk, line| {
                match line.origin() {
                    '+' => summary.total_lines_added += 1,
                    '-' => summary.total_lines_removed += 1,
                    _ => {}
                }
                true
            }),
        )?;

        Ok(summary)
    }

    fn commit_all(&self, message: &str) -> Result<String> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let parent = self.repo.head()?.peel_to_commit()?;
        let sig = Signature::now("quasar", "quasar@localhost")?;
        let oid = self.repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?;
        Ok(oid.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        {
            let sig = Signature::now("test", "test@localhost").unwrap();
            let mut index = repo.index().unwrap();
            let tree_id = index.write_tree().unwrap();
            let tree = repo.find_tree(tree_id).unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
        }
        (dir, repo)
    }

    #[test]
    fn ensure_branch_creates_and_checks_out_nebula_branch() {
        let (dir, _repo) = init_repo();
        let manager = BranchManager::open(dir.path(), "demo").unwrap();
        manager.ensure_branch().unwrap();
        assert_eq!(manager.current_branch().unwrap(), "nebula/demo");
    }

    #[test]
    fn commit_cycle_formats_expected_message() {
        let (dir, _repo) = init_repo();
        let manager = BranchManager::open(dir.path(), "demo").unwrap();
        manager.ensure_branch().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let sha = manager.commit_cycle("T1", 1, "initial implementation").unwrap();
        assert!(!sha.is_empty());
    }

    #[test]
    fn truncate_summary_caps_at_72_chars() {
        let long = "x".repeat(100);
        let truncated = truncate_summary(&long, 72);
        assert_eq!(truncated.chars().count(), 72);
    }

    #[test]
    fn short_summary_is_unchanged() {
        assert_eq!(truncate_summary("short", 72), "short");
    }

    #[test]
    fn diff_summary_detects_new_and_modified_files() {
        let (dir, _repo) = init_repo();
        let manager = BranchManager::open(dir.path(), "demo").unwrap();
        manager.ensure_branch().unwrap();
        let base_sha = manager.head_sha().unwrap();

        std::fs::write(dir.path().join("new.rs"), "fn main() {}\n").unwrap();
        let summary = manager.diff_summary(&base_sha).unwrap();
        assert!(summary.files_added.iter().any(|p| p.ends_with("new.rs")));
        assert!(!summary.is_empty());
    }
}
