//! Phase specification: the authored, persistent unit of work.
//!
//! A phase is loaded from a `<phase-id>.md` file: TOML frontmatter between
//! `+++` fences followed by a free-text body.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Gate mode controlling how much human approval a phase requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    /// No pause; fully autonomous.
    Trust,
    /// Pause after the phase completes, await approval.
    Review,
    /// Gate the plan and each phase.
    Approve,
    /// Stream only, no gating at all.
    Watch,
    /// Inherit from the manifest's default gate.
    #[default]
    #[serde(rename = "")]
    Inherit,
}

impl std::fmt::Display for GateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GateMode::Trust => "trust",
            GateMode::Review => "review",
            GateMode::Approve => "approve",
            GateMode::Watch => "watch",
            GateMode::Inherit => "",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for GateMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "trust" => Ok(GateMode::Trust),
            "review" => Ok(GateMode::Review),
            "approve" => Ok(GateMode::Approve),
            "watch" => Ok(GateMode::Watch),
            "" => Ok(GateMode::Inherit),
            other => bail!("unknown gate mode: {other}"),
        }
    }
}

/// A phase specification as authored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Phase {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    /// Reverse dependencies: this phase injects `depends_on` edges onto the
    /// named phases.
    #[serde(default)]
    pub blocks: BTreeSet<String>,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub allow_scope_overlap: bool,
    #[serde(default)]
    pub gate: GateMode,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub decomposed: bool,
    #[serde(default)]
    pub auto_decompose: Option<bool>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Phase {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            body: String::new(),
            depends_on: BTreeSet::new(),
            blocks: BTreeSet::new(),
            scope: Vec::new(),
            allow_scope_overlap: false,
            gate: GateMode::Inherit,
            priority: 0,
            decomposed: false,
            auto_decompose: None,
            labels: Vec::new(),
        }
    }

    pub fn with_depends_on(mut self, deps: impl IntoIterator<Item = String>) -> Self {
        self.depends_on = deps.into_iter().collect();
        self
    }

    pub fn with_scope(mut self, scope: impl IntoIterator<Item = String>) -> Self {
        self.scope = scope.into_iter().collect();
        self
    }

    /// Resolve the effective gate mode against a manifest default.
    pub fn effective_gate(&self, manifest_default: GateMode) -> GateMode {
        match self.gate {
            GateMode::Inherit => {
                if manifest_default == GateMode::Inherit {
                    GateMode::Trust
                } else {
                    manifest_default
                }
            }
            other => other,
        }
    }

    /// Parse a phase file: TOML frontmatter fenced by `+++` lines, followed
    /// by the free-text body.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
        let trimmed = raw.trim_start();
        let rest = trimmed
            .strip_prefix("+++\n")
            .or_else(|| trimmed.strip_prefix("+++\r\n"))
            .with_context(|| "phase file missing opening +++ frontmatter fence")?;
        let end = rest
            .find("\n+++")
            .with_context(|| "phase file missing closing +++ frontmatter fence")?;
        let frontmatter = &rest[..end];
        let body = rest[end + "\n+++".len()..]
            .trim_start_matches('\n')
            .to_string();

        #[derive(Deserialize)]
        struct Frontmatter {
            id: String,
            title: String,
            #[serde(default)]
            depends_on: BTreeSet<String>,
            #[serde(default)]
            blocks: BTreeSet<String>,
            #[serde(default)]
            scope: Vec<String>,
            #[serde(default)]
            allow_scope_overlap: bool,
            #[serde(default)]
            gate: GateMode,
            #[serde(default)]
            priority: i32,
            #[serde(default)]
            decomposed: bool,
            #[serde(default)]
            auto_decompose: Option<bool>,
            #[serde(default)]
            labels: Vec<String>,
        }

        let fm: Frontmatter =
            toml::from_str(frontmatter).context("failed to parse phase frontmatter")?;

        Ok(Phase {
            id: fm.id,
            title: fm.title,
            body,
            depends_on: fm.depends_on,
            blocks: fm.blocks,
            scope: fm.scope,
            allow_scope_overlap: fm.allow_scope_overlap,
            gate: fm.gate,
            priority: fm.priority,
            decomposed: fm.decomposed,
            auto_decompose: fm.auto_decompose,
            labels: fm.labels,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read phase file: {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("in phase file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        "+++\nid = \"02\"\ntitle = \"Core\"\ndepends_on = [\"01\"]\nscope = [\"src/core/\"]\n+++\nBuild the core module.\n"
    }

    #[test]
    fn parses_frontmatter_and_body() {
        let phase = Phase::parse(sample()).unwrap();
        assert_eq!(phase.id, "02");
        assert_eq!(phase.title, "Core");
        assert!(phase.depends_on.contains("01"));
        assert_eq!(phase.scope, vec!["src/core/".to_string()]);
        assert_eq!(phase.body.trim(), "Build the core module.");
    }

    #[test]
    fn missing_fence_is_an_error() {
        let err = Phase::parse("id = \"02\"\n").unwrap_err();
        assert!(err.to_string().contains("frontmatter"));
    }

    #[test]
    fn effective_gate_falls_back_to_manifest_then_trust() {
        let mut phase = Phase::new("01", "A");
        assert_eq!(phase.effective_gate(GateMode::Review), GateMode::Review);
        assert_eq!(phase.effective_gate(GateMode::Inherit), GateMode::Trust);
        phase.gate = GateMode::Approve;
        assert_eq!(phase.effective_gate(GateMode::Review), GateMode::Approve);
    }

    #[test]
    fn gate_mode_round_trips_through_display_and_fromstr() {
        use std::str::FromStr;
        for mode in [GateMode::Trust, GateMode::Review, GateMode::Approve, GateMode::Watch] {
            let s = mode.to_string();
            assert_eq!(GateMode::from_str(&s).unwrap(), mode);
        }
    }
}
