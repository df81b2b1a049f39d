//! Decomposition: when a phase is struggling, split it into sub-phases
//! applied to the live DAG under lock, with rollback if the proposed
//! sub-graph would introduce a cycle or a duplicate id.

use crate::dag::Dag;
use crate::errors::SchedulerError;
use crate::phase::{GateMode, Phase};
use std::collections::BTreeSet;

/// A single proposed sub-phase, produced by whatever decomposition
/// strategy (LLM-authored or rule-based) is driving decomposition.
#[derive(Debug, Clone)]
pub struct SubPhaseSpec {
    pub id: String,
    pub title: String,
    pub body: String,
    pub depends_on: BTreeSet<String>,
    pub scope: Vec<String>,
    pub gate: Option<GateMode>,
}

impl SubPhaseSpec {
    pub fn into_phase(self, priority: i32) -> Phase {
        let mut phase = Phase::new(self.id, self.title).with_scope(self.scope);
        phase.body = self.body;
        phase.depends_on = self.depends_on;
        phase.gate = self.gate.unwrap_or_default();
        phase.priority = priority;
        phase.auto_decompose = Some(false);
        phase
    }
}

pub struct DecompositionResult {
    pub parent_id: String,
    pub sub_phase_ids: Vec<String>,
}

/// Apply a decomposition: add each sub-phase to `dag` and `phases`, wire
/// dependents of the parent onto the sub-phases' leaf nodes, mark the
/// parent decomposed, and prevent the sub-phases from recursively
/// decomposing. Fully rolled back if any step would break DAG invariants.
pub fn apply_decomposition(
    dag: &mut Dag,
    phases: &mut std::collections::BTreeMap<String, Phase>,
    parent_id: &str,
    sub_specs: Vec<SubPhaseSpec>,
) -> Result<DecompositionResult, SchedulerError> {
    if !dag.contains(parent_id) {
        return Err(SchedulerError::UnknownNode(parent_id.to_string()));
    }

    for spec in &sub_specs {
        if dag.contains(&spec.id) || phases.contains_key(&spec.id) {
            return Err(SchedulerError::DecompositionDuplicate {
                phase: parent_id.to_string(),
                id: spec.id.clone(),
            });
        }
    }

    let snapshot_dag = dag.clone();
    let snapshot_phases = phases.clone();

    let parent_priority = dag.priority(parent_id).unwrap_or(0);
    let parent_dependents: Vec<String> = dag.dependents(parent_id);

    let apply = |dag: &mut Dag, phases: &mut std::collections::BTreeMap<String, Phase>| -> Result<Vec<String>, SchedulerError> {
        let mut sub_ids = Vec::with_capacity(sub_specs.len());
        for spec in sub_specs {
            let id = spec.id.clone();
            dag.add_node(&id, parent_priority);
            for dep in &spec.depends_on {
                dag.add_edge(dep, &id)?;
            }
            // A sub-phase with no declared dependency on another sub-phase
            // still depends on the parent's own prior dependencies via the
            // parent's edges, which remain untouched; only forward edges to
            // the parent's dependents are retargeted below.
            phases.insert(id.clone(), spec.into_phase(parent_priority));
            sub_ids.push(id);
        }
        for dependent in &parent_dependents {
            for sub_id in &sub_ids {
                dag.add_edge(sub_id, dependent)?;
            }
        }
        dag.remove(parent_id);
        Ok(sub_ids)
    };

    match apply(dag, phases) {
        Ok(sub_ids) => {
            if let Some(parent_phase) = snapshot_phases.get(parent_id) {
                let mut parent_phase = parent_phase.clone();
                parent_phase.decomposed = true;
                phases.insert(parent_id.to_string(), parent_phase);
            }
            Ok(DecompositionResult {
                parent_id: parent_id.to_string(),
                sub_phase_ids: sub_ids,
            })
        }
        Err(e) => {
            *dag = snapshot_dag;
            *phases = snapshot_phases;
            match e {
                SchedulerError::Cycle { .. } => Err(SchedulerError::DecompositionCycle {
                    phase: parent_id.to_string(),
                }),
                other => Err(other),
            }
        }
    }
}
