//! Orchestrator event bus: a broadcast channel that logs and any future
//! observability consumer can subscribe to without coupling to the
//! scheduler's internals.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrchestratorEvent {
    PhaseStarted { phase_id: String, wave: usize },
    CycleCompleted { phase_id: String, cycle: u32, outcome: String },
    WaveCompleted { wave: usize, concurrency: usize },
    PhaseTerminal { phase_id: String, state: String },
    HotAdd { phase_id: String },
    Decomposed { parent_id: String, sub_phase_ids: Vec<String> },
    /// A phase was skipped this wave because one or more of its scope paths
    /// are claimed by another in-flight phase; it will be retried next wave.
    ConflictRestart { phase_id: String, path: String, held_by: String },
}

const CHANNEL_CAPACITY: usize = 1024;

/// Thin wrapper around a broadcast sender; cloning shares the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: tokio::sync::broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _receiver) = tokio::sync::broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<OrchestratorEvent> {
        self.sender.subscribe()
    }

    /// Publishing is best-effort: no subscribers is not an error.
    pub fn publish(&self, event: OrchestratorEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(OrchestratorEvent::PhaseStarted { phase_id: "01".into(), wave: 1 });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, OrchestratorEvent::PhaseStarted { .. }));
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(OrchestratorEvent::HotAdd { phase_id: "02".into() });
    }
}
