//! Filter: an ordered list of deterministic pre-reviewer checks.
//! Each check is a labeled command producing pass/fail plus captured
//! output. On the first failure, the remaining checks are skipped.

use std::process::Command;

#[derive(Debug, Clone)]
pub struct FilterCheck {
    pub name: String,
    pub command: Vec<String>,
}

impl FilterCheck {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self { name: name.into(), command }
    }
}

#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub name: String,
    pub passed: bool,
    pub output: String,
}

#[derive(Debug, Clone, Default)]
pub struct FilterResult {
    pub outcomes: Vec<CheckOutcome>,
    pub first_failed_check_name: Option<String>,
}

impl FilterResult {
    pub fn passed(&self) -> bool {
        self.first_failed_check_name.is_none()
    }

    /// Embeddable "the following checks failed" context for the next coder
    /// prompt.
    pub fn prompt_context(&self) -> String {
        if self.passed() {
            return String::new();
        }
        let mut out = String::from("The following checks failed:\n");
        for outcome in &self.outcomes {
            if !outcome.passed {
                out.push_str(&format!("- {}:\n{}\n", outcome.name, outcome.output));
            }
        }
        out
    }
}

pub struct Filter {
    checks: Vec<FilterCheck>,
}

impl Filter {
    pub fn new(checks: Vec<FilterCheck>) -> Self {
        Self { checks }
    }

    /// Run checks in order in `work_dir`, stopping at the first failure.
    pub fn run(&self, work_dir: &std::path::Path) -> FilterResult {
        let mut outcomes = Vec::new();
        let mut first_failed = None;

        for check in &self.checks {
            let outcome = Self::run_one(check, work_dir);
            let failed = !outcome.passed;
            outcomes.push(outcome);
            if failed {
                first_failed = Some(check.name.clone());
                break;
            }
        }

        FilterResult {
            outcomes,
            first_failed_check_name: first_failed,
        }
    }

    fn run_one(check: &FilterCheck, work_dir: &std::path::Path) -> CheckOutcome {
        let Some((program, args)) = check.command.split_first() else {
            return CheckOutcome {
                name: check.name.clone(),
                passed: true,
                output: String::new(),
            };
        };
        match Command::new(program).args(args).current_dir(work_dir).output() {
            Ok(output) => CheckOutcome {
                name: check.name.clone(),
                passed: output.status.success(),
                output: format!(
                    "{}{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                ),
            },
            Err(e) => CheckOutcome {
                name: check.name.clone(),
                passed: false,
                output: format!("failed to spawn check: {e}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_checks_pass_when_commands_succeed() {
        let filter = Filter::new(vec![
            FilterCheck::new("build", vec!["true".into()]),
            FilterCheck::new("test", vec!["true".into()]),
        ]);
        let result = filter.run(std::path::Path::new("."));
        assert!(result.passed());
        assert_eq!(result.outcomes.len(), 2);
    }

    #[test]
    fn stops_at_first_failure_and_records_its_name() {
        let filter = Filter::new(vec![
            FilterCheck::new("build", vec!["false".into()]),
            FilterCheck::new("test", vec!["true".into()]),
        ]);
        let result = filter.run(std::path::Path::new("."));
        assert!(!result.passed());
        assert_eq!(result.first_failed_check_name, Some("build".to_string()));
        assert_eq!(result.outcomes.len(), 1);
    }

    #[test]
    fn prompt_context_embeds_failed_output() {
        let filter = Filter::new(vec![FilterCheck::new("lint", vec!["sh".into(), "-c".into(), "echo bad; false".into()])]);
        let result = filter.run(std::path::Path::new("."));
        let ctx = result.prompt_context();
        assert!(ctx.contains("lint"));
        assert!(ctx.contains("bad"));
    }

    #[test]
    fn empty_checklist_passes_trivially() {
        let filter = Filter::new(vec![]);
        let result = filter.run(std::path::Path::new("."));
        assert!(result.passed());
    }
}
