//! Wave scanner: walks the DAG wave-by-wave, polling eligible phases and
//! pruning descendants of any phase that cannot proceed.

use crate::dag::Dag;
use crate::fabric::Snapshot;
use crate::poll::{Decision, Poller};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Phases cleared to start, in the order they were polled.
    pub proceed: Vec<String>,
    /// Phases that could not proceed this scan, with a human reason.
    pub pruned: BTreeMap<String, String>,
}

/// Walk `waves` in order, polling every eligible (not done/failed/running,
/// not already pruned) phase in each wave exactly once. On NEED_INFO or
/// CONFLICT the phase and all of its `Descendants` are pruned for this scan.
pub async fn scan_waves<P: Poller + ?Sized>(
    dag: &Dag,
    waves: &[crate::dag::Wave],
    eligible: &std::collections::BTreeSet<String>,
    snapshot: &Snapshot,
    poller: &P,
) -> ScanResult {
    let mut result = ScanResult::default();

    for wave in waves {
        for phase_id in &wave.node_ids {
            if !eligible.contains(phase_id) {
                continue;
            }
            if result.pruned.contains_key(phase_id) {
                continue;
            }

            let poll = poller.poll(phase_id, snapshot).await;
            match poll.decision() {
                Decision::Proceed => result.proceed.push(phase_id.clone()),
                Decision::NeedInfo | Decision::Conflict => {
                    let reason = if poll.decision() == Decision::Conflict {
                        format!("conflict: {}", poll.reason)
                    } else {
                        format!("blocked: {}", poll.reason)
                    };
                    result.pruned.insert(phase_id.clone(), "upstream blocked".to_string());
                    for descendant in dag.descendants(phase_id) {
                        result.pruned.entry(descendant).or_insert_with(|| "upstream blocked".to_string());
                    }
                    let _ = reason;
                }
            }
        }
    }

    result
}
