//! Fleet event bus.
//!
//! Health flips and scaling lifecycle transitions are published over a
//! broadcast channel that any component can subscribe to. Publishing never
//! blocks; events sent with no subscribers are dropped.

use tokio::sync::broadcast;

use crate::types::{BackendId, BackendState, PolicyId};

/// Notifications emitted by the core.
#[derive(Debug, Clone, PartialEq)]
pub enum FleetEvent {
    BackendHealthChanged {
        backend_id: BackendId,
        previous: BackendState,
        state: BackendState,
        score: f64,
    },
    ScalingStarted {
        policy_id: PolicyId,
        event_id: String,
    },
    ScalingCompleted {
        policy_id: PolicyId,
        event_id: String,
        target_size: u32,
    },
    ScalingFailed {
        policy_id: PolicyId,
        event_id: String,
        error: String,
    },
}

/// Broadcast bus for [`FleetEvent`]s. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FleetEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. A send error only means there are no subscribers.
    pub fn publish(&self, event: FleetEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
