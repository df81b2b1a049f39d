//! `ContractPoller`: deterministic set-intersection over entanglements and
//! claims. Zero LLM calls; identical snapshot + contract yields identical
//! decision.

use super::{Decision, PollResult, Poller};
use crate::fabric::{EntanglementSpec, Snapshot};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// What a phase is registered to consume and where it writes.
#[derive(Debug, Clone, Default)]
pub struct PhaseContract {
    pub consumes: Vec<EntanglementSpec>,
    pub scope: Vec<String>,
}

/// Whether entanglement matching requires an exact package match or just
/// the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    #[default]
    MatchExact,
    MatchName,
}

pub struct ContractPoller {
    contracts: BTreeMap<String, PhaseContract>,
    match_mode: MatchMode,
}

impl ContractPoller {
    pub fn new(match_mode: MatchMode) -> Self {
        Self {
            contracts: BTreeMap::new(),
            match_mode,
        }
    }

    pub fn register(&mut self, phase_id: impl Into<String>, contract: PhaseContract) {
        self.contracts.insert(phase_id.into(), contract);
    }

    fn index_key(&self, spec: &EntanglementSpec) -> String {
        let kind = format!("{:?}", spec.kind).to_lowercase();
        match self.match_mode {
            MatchMode::MatchExact => format!("{kind}|{}|{}", spec.name, spec.package.clone().unwrap_or_default()),
            MatchMode::MatchName => format!("{kind}|{}", spec.name),
        }
    }

    fn entanglement_key(&self, e: &crate::fabric::Entanglement) -> String {
        let kind = format!("{:?}", e.kind).to_lowercase();
        match self.match_mode {
            MatchMode::MatchExact => format!("{kind}|{}|{}", e.name, e.package),
            MatchMode::MatchName => format!("{kind}|{}", e.name),
        }
    }

    fn poll_sync(&self, phase_id: &str, snapshot: &Snapshot) -> PollResult {
        let contract = match self.contracts.get(phase_id) {
            Some(c) => c,
            None => return PollResult::proceed("no contract registered"),
        };
        if contract.consumes.is_empty() {
            // fall through to the scope check below
        }

        for path in &contract.scope {
            if let Some(owner) = snapshot.file_claims.get(path) {
                if owner != phase_id {
                    return PollResult::conflict(format!("{path} claimed by {owner}"), owner.clone());
                }
            }
        }

        let index: std::collections::HashSet<String> =
            snapshot.entanglements.iter().map(|e| self.entanglement_key(e)).collect();

        let missing: Vec<String> = contract
            .consumes
            .iter()
            .filter(|spec| !index.contains(&self.index_key(spec)))
            .map(|spec| format!("{:?} {} ({})", spec.kind, spec.name, spec.package.clone().unwrap_or_default()))
            .collect();

        if !missing.is_empty() {
            return PollResult::need_info("missing consumed entanglements", missing);
        }

        PollResult::proceed("all consumed entanglements published, no claim conflicts")
    }
}

#[async_trait]
impl Poller for ContractPoller {
    async fn poll(&self, phase_id: &str, snapshot: &Snapshot) -> PollResult {
        self.poll_sync(phase_id, snapshot)
    }
}
