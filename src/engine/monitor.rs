//! Run lifecycle events.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Maximum number of events to buffer in broadcast channel.
const BROADCAST_CAPACITY: usize = 1024;

/// Observable run and node transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        workflow_id: String,
        mode: String,
    },
    RunSucceeded {
        run_id: String,
        workflow_id: String,
        duration_ms: i64,
    },
    RunFailed {
        run_id: String,
        workflow_id: String,
        error: String,
    },
    /// Run suspended at a wait node
    RunWaiting {
        run_id: String,
        node_id: String,
        wait_kind: String,
    },
    RunResumed {
        run_id: String,
        node_id: String,
    },
    NodeStarted {
        run_id: String,
        node_id: String,
        node_type: String,
    },
    NodeSucceeded {
        run_id: String,
        node_id: String,
        duration_ms: i64,
    },
    NodeFailed {
        run_id: String,
        node_id: String,
        error: String,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::RunSucceeded { run_id, .. }
            | Self::RunFailed { run_id, .. }
            | Self::RunWaiting { run_id, .. }
            | Self::RunResumed { run_id, .. }
            | Self::NodeStarted { run_id, .. }
            | Self::NodeSucceeded { run_id, .. }
            | Self::NodeFailed { run_id, .. } => run_id,
        }
    }
}

/// Broadcasts run events to any number of subscribers.
#[derive(Clone)]
pub struct Monitor {
    tx: broadcast::Sender<RunEvent>,
}

impl Monitor {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all subscribers.
    pub fn emit(&self, event: RunEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.tx.send(event);
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers() {
        let monitor = Monitor::new();
        monitor.emit(RunEvent::RunResumed {
            run_id: "r1".into(),
            node_id: "wait".into(),
        });
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let monitor = Monitor::new();
        let mut rx = monitor.subscribe();
        monitor.emit(RunEvent::NodeStarted {
            run_id: "r1".into(),
            node_id: "n1".into(),
            node_type: "set".into(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.run_id(), "r1");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "node_started");
    }
}
