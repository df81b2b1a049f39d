//! The dispatch loop: wave-by-wave scan, AIMD-gated concurrent dispatch of
//! the coder-reviewer cycle per phase, decomposition of struggling phases,
//! and conflict-triggered restarts.

pub mod eligibility;

use crate::architect::{self, SubPhaseSpec};
use crate::cycle::{CycleOutcome, CycleRunner, CycleState};
use crate::dag::Dag;
use crate::errors::SchedulerError;
use crate::events::{EventBus, OrchestratorEvent};
use crate::fabric::{FabricStore, PhaseState};
use crate::metrics::aimd::{AimdController, Strategy, WaveOutcome};
use crate::phase::Phase;
use crate::poll::Poller;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};

pub struct SchedulerConfig {
    pub max_workers: usize,
    pub strategy: Strategy,
    pub work_dir: PathBuf,
    pub nebula_dir: PathBuf,
}

pub struct Scheduler {
    dag: Dag,
    phases: BTreeMap<String, Phase>,
    fabric: Arc<FabricStore>,
    poller: Arc<dyn Poller>,
    events: EventBus,
    config: SchedulerConfig,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub decomposed: Vec<String>,
}

impl Scheduler {
    pub fn new(dag: Dag, phases: BTreeMap<String, Phase>, fabric: Arc<FabricStore>, poller: Arc<dyn Poller>, events: EventBus, config: SchedulerConfig) -> Self {
        Self { dag, phases, fabric, poller, events, config }
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// Phases that have reached any terminal `PhaseState`, per the fabric.
    fn done_set(&self) -> Result<BTreeSet<String>, SchedulerError> {
        let states = self.fabric.all_phase_states().map_err(|e| SchedulerError::Other(e.into()))?;
        Ok(states
            .into_iter()
            .filter(|(_, s)| s.is_terminal())
            .map(|(id, _)| id)
            .collect())
    }

    /// Run one wave: poll every eligible phase, admit a conflict-free
    /// subset bounded by the AIMD-chosen concurrency, claim each admitted
    /// phase's declared scope, then spawn each as an independent task
    /// bounded by a semaphore sized to the AIMD decision. Phases that lose
    /// a scope claim are skipped for this wave and retried next wave.
    /// Returns the set of phase IDs this wave attempted.
    pub async fn run_wave(&mut self, runner: Arc<CycleRunner>, aimd: &mut AimdController, git_sha: &str) -> Result<RunSummary, SchedulerError> {
        let mut summary = RunSummary::default();
        let done = self.done_set()?;
        let waves = self.dag.compute_waves()?;
        let eligible: BTreeSet<String> = eligibility::eligible_phases(&self.dag, &self.phases, &done).into_iter().collect();
        if eligible.is_empty() {
            return Ok(summary);
        }

        let snapshot = self.fabric.build_snapshot().map_err(|e| SchedulerError::Other(e.into()))?;
        let scan = crate::wave::scan_waves(&self.dag, &waves, &eligible, &snapshot, self.poller.as_ref()).await;

        for (phase_id, reason) in &scan.pruned {
            self.fabric.set_phase_state(phase_id, PhaseState::Blocked).map_err(|e| SchedulerError::Other(e.into()))?;
            let _ = reason;
        }

        let ordered: Vec<String> = eligibility::eligible_phases(&self.dag, &self.phases, &done)
            .into_iter()
            .filter(|id| scan.proceed.contains(id))
            .collect();
        let admitted = eligibility::effective_parallelism(&self.dag, &self.phases, &ordered);

        let ceiling = admitted.len().max(1);
        let decision = aimd.decide(ceiling, &WaveOutcome { conflicts: scan.pruned.len(), avg_satisfaction: None, wave_cost_usd: 0.0 });
        let dispatched = eligibility::cap_to_worker_slots(admitted, decision.chosen);
        let wave_number = waves.first().map(|w| w.number).unwrap_or(0);

        self.events.publish(OrchestratorEvent::WaveCompleted { wave: wave_number, concurrency: decision.chosen });

        let claimed = self.claim_scopes(dispatched)?;
        if claimed.is_empty() {
            return Ok(summary);
        }

        for (phase_id, _) in &claimed {
            self.fabric.set_phase_state(phase_id, PhaseState::Running).map_err(|e| SchedulerError::Other(e.into()))?;
            self.events.publish(OrchestratorEvent::PhaseStarted { phase_id: phase_id.clone(), wave: wave_number });
        }

        let semaphore = Arc::new(Semaphore::new(decision.chosen.max(1)));
        let (tx, mut rx) = mpsc::channel(claimed.len());

        for (phase_id, phase) in claimed {
            let runner = runner.clone();
            let semaphore = semaphore.clone();
            let tx = tx.clone();
            let work_dir = self.config.work_dir.clone();
            let nebula_dir = self.config.nebula_dir.clone();
            let git_sha = git_sha.to_string();

            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed while wave is running");
                tracing::info!(phase = %phase_id, "dispatching phase");
                let state = match load_resumable_state(&nebula_dir, &phase_id, &phase, &git_sha) {
                    Ok(state) => state,
                    Err(e) => {
                        let _ = tx.send((phase_id, phase, Err(anyhow::Error::from(e)))).await;
                        return;
                    }
                };
                let result = runner
                    .run(state, &phase.body, &work_dir, &nebula_dir, &git_sha)
                    .await
                    .map_err(anyhow::Error::from);
                let _ = tx.send((phase_id, phase, result)).await;
            });
        }
        drop(tx);

        let mut results = Vec::new();
        while let Some(item) = rx.recv().await {
            results.push(item);
        }

        for (phase_id, phase, result) in results {
            self.fabric.release_all_for(&phase_id).map_err(|e| SchedulerError::Other(e.into()))?;
            let (final_state, outcome) = result.map_err(SchedulerError::Other)?;

            match outcome {
                CycleOutcome::Approved => {
                    self.fabric.set_phase_state(&phase_id, PhaseState::Done).map_err(|e| SchedulerError::Other(e.into()))?;
                    self.events.publish(OrchestratorEvent::PhaseTerminal { phase_id: phase_id.clone(), state: "done".into() });
                    summary.completed.push(phase_id.clone());
                }
                CycleOutcome::BudgetExceeded | CycleOutcome::MaxCyclesReached => {
                    self.fabric.set_phase_state(&phase_id, PhaseState::Failed).map_err(|e| SchedulerError::Other(e.into()))?;
                    self.events.publish(OrchestratorEvent::PhaseTerminal { phase_id: phase_id.clone(), state: "failed".into() });
                    summary.failed.push(phase_id.clone());
                }
                CycleOutcome::NeedsHumanReview(_) => {
                    self.fabric.set_phase_state(&phase_id, PhaseState::HumanDecision).map_err(|e| SchedulerError::Other(e.into()))?;
                }
                CycleOutcome::StruggleDetected(eval) => {
                    tracing::warn!(phase = %phase_id, composite_score = eval.composite_score, "struggle detected, decomposing");
                    self.fabric.set_phase_state(&phase_id, PhaseState::Decomposed).map_err(|e| SchedulerError::Other(e.into()))?;
                    let sub_specs = default_decomposition(&phase, &final_state);
                    let result = architect::apply_decomposition(&mut self.dag, &mut self.phases, &phase_id, sub_specs)?;
                    self.events.publish(OrchestratorEvent::Decomposed { parent_id: phase_id.clone(), sub_phase_ids: result.sub_phase_ids });
                    summary.decomposed.push(phase_id.clone());
                }
            }
        }

        Ok(summary)
    }

    /// Acquire file claims for each dispatched phase's declared scope. A
    /// phase that loses any claim releases what it already acquired and is
    /// excluded from this wave's dispatch set, to be retried next wave.
    fn claim_scopes(&self, dispatched: Vec<String>) -> Result<Vec<(String, Phase)>, SchedulerError> {
        let mut claimed = Vec::new();
        for phase_id in dispatched {
            let phase = self.phases.get(&phase_id).cloned().ok_or_else(|| SchedulerError::UnknownNode(phase_id.clone()))?;
            let mut acquired = Vec::new();
            let mut conflict = None;
            for path in &phase.scope {
                match self.fabric.claim(path, &phase_id).map_err(|e| SchedulerError::Other(e.into()))? {
                    (true, _) => acquired.push(path.clone()),
                    (false, held_by) => {
                        conflict = Some((path.clone(), held_by.unwrap_or_default()));
                        break;
                    }
                }
            }
            match conflict {
                Some((path, held_by)) => {
                    for acquired_path in &acquired {
                        self.fabric.release(acquired_path, &phase_id).map_err(|e| SchedulerError::Other(e.into()))?;
                    }
                    tracing::warn!(phase = %phase_id, path = %path, held_by = %held_by, "scope conflict, restarting next wave");
                    self.events.publish(OrchestratorEvent::ConflictRestart { phase_id: phase_id.clone(), path, held_by });
                }
                None => claimed.push((phase_id, phase)),
            }
        }
        Ok(claimed)
    }

    /// Add a phase to the live graph mid-run.
    pub fn hot_add(&mut self, phase: Phase) -> Result<(), SchedulerError> {
        self.dag.add_node(&phase.id, phase.priority);
        for dep in &phase.depends_on {
            self.dag.add_edge(dep, &phase.id)?;
        }
        for blocked in &phase.blocks {
            self.dag.add_edge(&phase.id, blocked)?;
        }
        self.events.publish(OrchestratorEvent::HotAdd { phase_id: phase.id.clone() });
        self.phases.insert(phase.id.clone(), phase);
        Ok(())
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    pub fn phases(&self) -> &BTreeMap<String, Phase> {
        &self.phases
    }
}

/// Resume a phase's checkpoint if one exists, validating its recorded git
/// SHA against the current HEAD; a mismatch is a hard error (the working
/// tree has moved since the checkpoint was written, per crash-recovery
/// scenario 7). Phases with no checkpoint start fresh at cycle 1.
fn load_resumable_state(nebula_dir: &Path, phase_id: &str, phase: &Phase, git_sha: &str) -> Result<CycleState, SchedulerError> {
    let path = crate::cycle::checkpoint_path(nebula_dir, phase_id);
    if !path.exists() {
        return Ok(CycleState::new(phase_id, &phase.title, 5, 10.0, git_sha));
    }
    crate::cycle::validate_checkpoint(nebula_dir, phase_id, git_sha, false).map_err(|e| SchedulerError::Other(e.into()))
}

/// A minimal, rule-based fallback split used when no LLM-authored
/// decomposition plan is supplied: two sub-phases inheriting the parent's
/// scope, chained sequentially. Real decomposition plans come from an
/// agent invocation upstream of the scheduler; this exists so the dispatch
/// loop always has something to apply.
fn default_decomposition(phase: &Phase, _state: &CycleState) -> Vec<SubPhaseSpec> {
    vec![
        SubPhaseSpec {
            id: format!("{}-a", phase.id),
            title: format!("{} (part 1)", phase.title),
            body: phase.body.clone(),
            depends_on: phase.depends_on.clone(),
            scope: phase.scope.clone(),
            gate: Some(phase.gate),
        },
        SubPhaseSpec {
            id: format!("{}-b", phase.id),
            title: format!("{} (part 2)", phase.title),
            body: phase.body.clone(),
            depends_on: std::collections::BTreeSet::from([format!("{}-a", phase.id)]),
            scope: phase.scope.clone(),
            gate: Some(phase.gate),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::BranchManager;
    use crate::filter::Filter;
    use crate::invoker::{AgentSpec, Invoker, InvocationResult, InvokerError};
    use crate::poll::{ContractPoller, MatchMode};
    use async_trait::async_trait;
    use git2::{Repository, Signature};

    struct AlwaysApprove;

    /// A throwaway git repo with one initial commit, checked out onto
    /// `nebula/<nebula>` via a `BranchManager`.
    fn init_branch(dir: &std::path::Path, nebula: &str) -> (Arc<BranchManager>, String) {
        let repo = Repository::init(dir).unwrap();
        let sig = Signature::now("test", "test@localhost").unwrap();
        let mut index = repo.index().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
        drop(repo);

        let manager = BranchManager::open(dir, nebula).unwrap();
        manager.ensure_branch().unwrap();
        let sha = manager.head_sha().unwrap();
        (Arc::new(manager), sha)
    }

    #[async_trait]
    impl Invoker for AlwaysApprove {
        async fn invoke(&self, spec: &AgentSpec, _prompt: &str, _work_dir: &std::path::Path) -> Result<InvocationResult, InvokerError> {
            let text = if spec.name == "reviewer" {
                "REPORT: satisfaction=high;risk=low;needs_human=false;summary=ok".to_string()
            } else {
                "done".to_string()
            };
            Ok(InvocationResult { result_text: text, cost_usd: 0.1, duration: std::time::Duration::from_millis(1), session_id: "s".into() })
        }
    }

    fn linear_dag() -> (Dag, BTreeMap<String, Phase>) {
        let mut dag = Dag::new();
        dag.add_node("01", 0);
        dag.add_node("02", 0);
        dag.add_edge("01", "02").unwrap();
        let mut phases = BTreeMap::new();
        phases.insert("01".to_string(), Phase::new("01", "First"));
        phases.insert("02".to_string(), Phase::new("02", "Second").with_depends_on(["01".to_string()]));
        (dag, phases)
    }

    #[tokio::test]
    async fn run_wave_advances_root_phase_to_done() {
        let (dag, phases) = linear_dag();
        let fabric = Arc::new(crate::fabric::FabricStore::open_in_memory().unwrap());
        let poller: Arc<dyn Poller> = Arc::new(ContractPoller::new(MatchMode::MatchExact));
        let events = EventBus::new();
        let dir = tempfile::tempdir().unwrap();
        let (branch, head_sha) = init_branch(dir.path(), "demo");
        let config = SchedulerConfig {
            max_workers: 4,
            strategy: Strategy::Balanced,
            work_dir: dir.path().to_path_buf(),
            nebula_dir: dir.path().to_path_buf(),
        };
        let mut scheduler = Scheduler::new(dag, phases, fabric.clone(), poller, events, config);
        let runner = Arc::new(CycleRunner::new(
            AgentSpec { name: "coder".into(), model: None },
            AgentSpec { name: "reviewer".into(), model: None },
            Arc::new(AlwaysApprove),
            Filter::new(vec![]),
            crate::cycle::StruggleConfig::default(),
            fabric,
            branch,
        ));
        let mut aimd = AimdController::new(Strategy::Balanced, 4);

        let summary = scheduler.run_wave(runner, &mut aimd, &head_sha).await.unwrap();
        assert_eq!(summary.completed, vec!["01".to_string()]);
    }

    #[test]
    fn hot_add_wires_dependencies_into_live_dag() {
        let (dag, phases) = linear_dag();
        let fabric = Arc::new(crate::fabric::FabricStore::open_in_memory().unwrap());
        let poller: Arc<dyn Poller> = Arc::new(ContractPoller::new(MatchMode::MatchExact));
        let events = EventBus::new();
        let dir = tempfile::tempdir().unwrap();
        let config = SchedulerConfig { max_workers: 4, strategy: Strategy::Balanced, work_dir: dir.path().to_path_buf(), nebula_dir: dir.path().to_path_buf() };
        let mut scheduler = Scheduler::new(dag, phases, fabric, poller, events, config);
        scheduler.hot_add(Phase::new("03", "Third").with_depends_on(["02".to_string()])).unwrap();
        assert!(scheduler.dag().contains("03"));
        assert!(scheduler.dag().connected("02", "03"));
    }
}
