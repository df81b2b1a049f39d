//! Eligibility and effective-parallelism resolution: which ready phases can
//! actually be dispatched this wave, and how many of them can run
//! concurrently without a scope conflict, approximated by a greedy
//! independent-set pass over the scope-conflict graph.

use crate::dag::Dag;
use crate::phase::Phase;
use crate::scope::phases_conflict;
use std::collections::BTreeMap;

fn conflicts(dag: &Dag, a: &Phase, b: &Phase) -> bool {
    phases_conflict(&a.scope, a.allow_scope_overlap, &b.scope, b.allow_scope_overlap, dag.connected(&a.id, &b.id))
}

/// Phases whose DAG dependencies are satisfied and which have not already
/// reached a terminal state, sorted by (priority desc, id asc).
pub fn eligible_phases(dag: &Dag, phases: &BTreeMap<String, Phase>, done: &std::collections::BTreeSet<String>) -> Vec<String> {
    let mut ready = dag.ready(done);
    ready.retain(|id| phases.get(id).map(|p| !p.decomposed).unwrap_or(false));
    ready.sort_by(|a, b| {
        let pa = phases.get(a).map(|p| p.priority).unwrap_or(0);
        let pb = phases.get(b).map(|p| p.priority).unwrap_or(0);
        pb.cmp(&pa).then_with(|| a.cmp(b))
    });
    ready
}

/// Greedy independent set: walk candidates in priority order, admitting
/// each unless it conflicts (overlapping scope, not DAG-connected, neither
/// side opted in) with an already-admitted phase.
pub fn effective_parallelism(dag: &Dag, phases: &BTreeMap<String, Phase>, candidates: &[String]) -> Vec<String> {
    let mut admitted: Vec<String> = Vec::new();
    'candidate: for id in candidates {
        let Some(phase) = phases.get(id) else { continue };
        for other_id in &admitted {
            let Some(other) = phases.get(other_id) else { continue };
            if conflicts(dag, phase, other) {
                continue 'candidate;
            }
        }
        admitted.push(id.clone());
    }
    admitted
}

/// Apply a hard worker-count cap on top of the conflict-free admitted set,
/// preserving priority order.
pub fn cap_to_worker_slots(admitted: Vec<String>, max_workers: usize) -> Vec<String> {
    admitted.into_iter().take(max_workers.max(1)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn phase(id: &str, priority: i32, scope: &[&str]) -> Phase {
        let mut p = Phase::new(id, id).with_scope(scope.iter().map(|s| s.to_string()));
        p.priority = priority;
        p
    }

    #[test]
    fn eligible_phases_orders_by_priority_then_id() {
        let mut dag = Dag::new();
        dag.add_node("a", 0);
        dag.add_node("b", 0);
        let mut phases = BTreeMap::new();
        phases.insert("a".to_string(), phase("a", 1, &[]));
        phases.insert("b".to_string(), phase("b", 5, &[]));
        let done = BTreeSet::new();
        let ready = eligible_phases(&dag, &phases, &done);
        assert_eq!(ready, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn decomposed_phases_are_never_eligible() {
        let mut dag = Dag::new();
        dag.add_node("a", 0);
        let mut phases = BTreeMap::new();
        let mut p = phase("a", 0, &[]);
        p.decomposed = true;
        phases.insert("a".to_string(), p);
        let done = BTreeSet::new();
        assert!(eligible_phases(&dag, &phases, &done).is_empty());
    }

    #[test]
    fn effective_parallelism_excludes_scope_conflicting_pairs() {
        let mut dag = Dag::new();
        dag.add_node("a", 0);
        dag.add_node("b", 0);
        let mut phases = BTreeMap::new();
        phases.insert("a".to_string(), phase("a", 1, &["src/x/"]));
        phases.insert("b".to_string(), phase("b", 0, &["src/x/file.rs"]));
        let candidates = vec!["a".to_string(), "b".to_string()];
        let admitted = effective_parallelism(&dag, &phases, &candidates);
        assert_eq!(admitted, vec!["a".to_string()]);
    }

    #[test]
    fn effective_parallelism_admits_disjoint_scopes() {
        let mut dag = Dag::new();
        dag.add_node("a", 0);
        dag.add_node("b", 0);
        let mut phases = BTreeMap::new();
        phases.insert("a".to_string(), phase("a", 1, &["src/x/"]));
        phases.insert("b".to_string(), phase("b", 0, &["src/y/"]));
        let candidates = vec!["a".to_string(), "b".to_string()];
        let admitted = effective_parallelism(&dag, &phases, &candidates);
        assert_eq!(admitted.len(), 2);
    }

    #[test]
    fn cap_to_worker_slots_truncates_preserving_order() {
        let admitted = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(cap_to_worker_slots(admitted, 2), vec!["a".to_string(), "b".to_string()]);
    }
}
