//! Backend registry — the live backend set and its mutation surface.
//!
//! Backends are keyed in a DashMap; a separate insertion-order index
//! keeps `list_healthy()` deterministic so round-robin cursors and
//! first-encountered tie-breaks behave predictably.

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use flowgrid_core::{Backend, BackendId, BackendState, EventBus, FleetEvent, RoutingError};

/// Aggregate capacity numbers exposed to external collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct CapacityMetrics {
    pub total_backends: usize,
    pub routable_backends: usize,
    pub total_connections: u64,
    pub total_capacity: u64,
}

/// Concurrency-safe backend registry.
pub struct BackendRegistry {
    backends: DashMap<BackendId, Backend>,
    /// Insertion order of backend ids; pruned on removal.
    order: RwLock<Vec<BackendId>>,
    /// Drain deadlines: backend id → unix seconds after which removal is allowed.
    drain_deadlines: DashMap<BackendId, u64>,
    drain_grace_secs: u64,
    events: EventBus,
}

impl BackendRegistry {
    pub fn new(events: EventBus, drain_grace_secs: u64) -> Self {
        Self {
            backends: DashMap::new(),
            order: RwLock::new(Vec::new()),
            drain_deadlines: DashMap::new(),
            drain_grace_secs,
            events,
        }
    }

    /// Register a backend. Replaces any existing entry with the same id.
    pub fn register(&self, mut backend: Backend) {
        backend.health_score = backend.health_score.clamp(0.0, 100.0);
        backend.current_connections = backend.current_connections.min(backend.max_connections);

        let id = backend.id.clone();
        let replaced = self.backends.insert(id.clone(), backend).is_some();
        if !replaced {
            self.order.write().push(id.clone());
        }
        info!(backend_id = %id, replaced, "backend registered");
    }

    /// Begin draining a backend. It stops receiving new traffic immediately
    /// and is removed once the grace period elapses.
    pub fn deregister(&self, id: &str, now: u64) -> Result<(), RoutingError> {
        let mut backend = self
            .backends
            .get_mut(id)
            .ok_or_else(|| RoutingError::BackendNotFound(id.to_string()))?;
        backend.state = BackendState::Draining;
        drop(backend);

        self.drain_deadlines
            .insert(id.to_string(), now + self.drain_grace_secs);
        info!(backend_id = %id, grace_secs = self.drain_grace_secs, "backend draining");
        Ok(())
    }

    /// Remove draining backends whose grace deadline has passed.
    pub fn sweep_drained(&self, now: u64) {
        let expired: Vec<BackendId> = self
            .drain_deadlines
            .iter()
            .filter(|entry| *entry.value() <= now)
            .map(|entry| entry.key().clone())
            .collect();

        for id in expired {
            self.drain_deadlines.remove(&id);
            if let Some((_, backend)) = self.backends.remove(&id) {
                self.order.write().retain(|o| o != &id);
                info!(
                    backend_id = %id,
                    open_connections = backend.current_connections,
                    "drained backend removed"
                );
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Backend> {
        self.backends.get(id).map(|b| b.clone())
    }

    /// All backends in insertion order.
    pub fn list_all(&self) -> Vec<Backend> {
        let order = self.order.read();
        order
            .iter()
            .filter_map(|id| self.backends.get(id).map(|b| b.clone()))
            .collect()
    }

    /// Routable backends (healthy or degraded) in insertion order.
    pub fn list_healthy(&self) -> Vec<Backend> {
        self.list_all().into_iter().filter(|b| b.is_routable()).collect()
    }

    /// Set a backend's health score and derive its state from the score
    /// thresholds (≥80 healthy, ≥50 degraded, else unhealthy).
    ///
    /// Maintenance and draining states are sticky: the score is recorded
    /// but the state is not overwritten. A state flip is published on the
    /// event bus.
    pub fn update_health(&self, id: &str, score: f64) -> Result<(), RoutingError> {
        let mut backend = self
            .backends
            .get_mut(id)
            .ok_or_else(|| RoutingError::BackendNotFound(id.to_string()))?;

        let score = score.clamp(0.0, 100.0);
        backend.health_score = score;

        if matches!(
            backend.state,
            BackendState::Maintenance | BackendState::Draining
        ) {
            return Ok(());
        }

        let new_state = state_for_score(score);
        if new_state != backend.state {
            let previous = backend.state;
            backend.state = new_state;
            debug!(
                backend_id = %id,
                ?previous,
                state = ?new_state,
                score,
                "backend health state changed"
            );
            self.events.publish(FleetEvent::BackendHealthChanged {
                backend_id: id.to_string(),
                previous,
                state: new_state,
                score,
            });
        }
        Ok(())
    }

    /// Put a backend into (or take it out of) an operator-controlled state.
    pub fn set_state(&self, id: &str, state: BackendState) -> Result<(), RoutingError> {
        let mut backend = self
            .backends
            .get_mut(id)
            .ok_or_else(|| RoutingError::BackendNotFound(id.to_string()))?;
        backend.state = state;
        Ok(())
    }

    /// Update mutable admin fields of a backend. Connection counters and
    /// health state are owned by the router and the health sweep.
    pub fn update_backend(
        &self,
        id: &str,
        address: Option<String>,
        weight: Option<u32>,
        max_connections: Option<u32>,
    ) -> Result<(), RoutingError> {
        let mut backend = self
            .backends
            .get_mut(id)
            .ok_or_else(|| RoutingError::BackendNotFound(id.to_string()))?;
        if let Some(address) = address {
            backend.address = address;
        }
        if let Some(weight) = weight {
            backend.weight = weight;
        }
        if let Some(max) = max_connections {
            backend.max_connections = max;
            backend.current_connections = backend.current_connections.min(max);
        }
        Ok(())
    }

    /// Increment a backend's connection count, capped at `max_connections`
    /// so `current ≤ max` always holds.
    pub fn acquire_connection(&self, id: &str) -> Result<(), RoutingError> {
        let mut backend = self
            .backends
            .get_mut(id)
            .ok_or_else(|| RoutingError::BackendNotFound(id.to_string()))?;
        if backend.current_connections >= backend.max_connections {
            warn!(backend_id = %id, max = backend.max_connections, "backend at connection capacity");
        } else {
            backend.current_connections += 1;
        }
        Ok(())
    }

    /// Decrement a backend's connection count, floored at zero.
    pub fn release_connection(&self, id: &str) -> Result<(), RoutingError> {
        let mut backend = self
            .backends
            .get_mut(id)
            .ok_or_else(|| RoutingError::BackendNotFound(id.to_string()))?;
        backend.current_connections = backend.current_connections.saturating_sub(1);
        Ok(())
    }

    /// Fold a response-time sample into the backend's rolling estimate
    /// (EWMA, α = 0.3; the first sample seeds the estimate).
    pub fn record_response_time(&self, id: &str, ms: f64) -> Result<(), RoutingError> {
        let mut backend = self
            .backends
            .get_mut(id)
            .ok_or_else(|| RoutingError::BackendNotFound(id.to_string()))?;
        backend.response_time_ms = if backend.response_time_ms == 0.0 {
            ms
        } else {
            0.3 * ms + 0.7 * backend.response_time_ms
        };
        Ok(())
    }

    /// Aggregate capacity numbers for external collaborators.
    pub fn capacity_metrics(&self) -> CapacityMetrics {
        let all = self.list_all();
        CapacityMetrics {
            total_backends: all.len(),
            routable_backends: all.iter().filter(|b| b.is_routable()).count(),
            total_connections: all.iter().map(|b| b.current_connections as u64).sum(),
            total_capacity: all.iter().map(|b| b.max_connections as u64).sum(),
        }
    }
}

/// Map a health score onto an operational state.
pub(crate) fn state_for_score(score: f64) -> BackendState {
    if score >= 80.0 {
        BackendState::Healthy
    } else if score >= 50.0 {
        BackendState::Degraded
    } else {
        BackendState::Unhealthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgrid_core::GeoPoint;

    fn make_backend(id: &str) -> Backend {
        Backend {
            id: id.to_string(),
            address: format!("10.0.0.{}:80", id.len()),
            weight: 1,
            geo: Some(GeoPoint {
                latitude: 52.5,
                longitude: 13.4,
                region: "eu-central".to_string(),
            }),
            state: BackendState::Healthy,
            current_connections: 0,
            max_connections: 100,
            response_time_ms: 0.0,
            health_score: 100.0,
        }
    }

    fn make_registry() -> BackendRegistry {
        BackendRegistry::new(EventBus::default(), 60)
    }

    #[test]
    fn register_and_list_in_insertion_order() {
        let reg = make_registry();
        reg.register(make_backend("a"));
        reg.register(make_backend("b"));
        reg.register(make_backend("c"));

        let ids: Vec<_> = reg.list_all().into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn list_healthy_excludes_non_routable() {
        let reg = make_registry();
        reg.register(make_backend("a"));
        reg.register(make_backend("b"));
        reg.register(make_backend("c"));

        reg.update_health("b", 10.0).unwrap();
        reg.set_state("c", BackendState::Maintenance).unwrap();

        let ids: Vec<_> = reg.list_healthy().into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn health_score_thresholds_drive_state() {
        let reg = make_registry();
        reg.register(make_backend("a"));

        reg.update_health("a", 85.0).unwrap();
        assert_eq!(reg.get("a").unwrap().state, BackendState::Healthy);

        reg.update_health("a", 60.0).unwrap();
        assert_eq!(reg.get("a").unwrap().state, BackendState::Degraded);

        reg.update_health("a", 20.0).unwrap();
        assert_eq!(reg.get("a").unwrap().state, BackendState::Unhealthy);
    }

    #[test]
    fn maintenance_state_is_sticky_under_health_updates() {
        let reg = make_registry();
        reg.register(make_backend("a"));
        reg.set_state("a", BackendState::Maintenance).unwrap();

        reg.update_health("a", 95.0).unwrap();
        let b = reg.get("a").unwrap();
        assert_eq!(b.state, BackendState::Maintenance);
        // The score itself is still recorded.
        assert_eq!(b.health_score, 95.0);
    }

    #[tokio::test]
    async fn health_flip_publishes_event() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let reg = BackendRegistry::new(events, 60);
        reg.register(make_backend("a"));

        reg.update_health("a", 30.0).unwrap();

        match rx.recv().await.unwrap() {
            FleetEvent::BackendHealthChanged {
                backend_id,
                previous,
                state,
                score,
            } => {
                assert_eq!(backend_id, "a");
                assert_eq!(previous, BackendState::Healthy);
                assert_eq!(state, BackendState::Unhealthy);
                assert_eq!(score, 30.0);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn connection_count_capped_and_floored() {
        let reg = make_registry();
        let mut b = make_backend("a");
        b.max_connections = 2;
        reg.register(b);

        reg.acquire_connection("a").unwrap();
        reg.acquire_connection("a").unwrap();
        // At capacity: count stays at max.
        reg.acquire_connection("a").unwrap();
        assert_eq!(reg.get("a").unwrap().current_connections, 2);

        reg.release_connection("a").unwrap();
        reg.release_connection("a").unwrap();
        // Floored at zero.
        reg.release_connection("a").unwrap();
        assert_eq!(reg.get("a").unwrap().current_connections, 0);
    }

    #[test]
    fn deregister_drains_then_sweep_removes() {
        let reg = make_registry();
        reg.register(make_backend("a"));

        reg.deregister("a", 1000).unwrap();
        assert_eq!(reg.get("a").unwrap().state, BackendState::Draining);
        assert!(reg.list_healthy().is_empty());

        // Grace (60s) not yet elapsed.
        reg.sweep_drained(1030);
        assert!(reg.get("a").is_some());

        reg.sweep_drained(1060);
        assert!(reg.get("a").is_none());
        assert!(reg.list_all().is_empty());
    }

    #[test]
    fn response_time_estimate_is_rolling() {
        let reg = make_registry();
        reg.register(make_backend("a"));

        reg.record_response_time("a", 100.0).unwrap();
        assert_eq!(reg.get("a").unwrap().response_time_ms, 100.0);

        reg.record_response_time("a", 200.0).unwrap();
        let rt = reg.get("a").unwrap().response_time_ms;
        assert!(rt > 100.0 && rt < 200.0);
    }

    #[test]
    fn capacity_metrics_aggregates() {
        let reg = make_registry();
        reg.register(make_backend("a"));
        reg.register(make_backend("b"));
        reg.update_health("b", 10.0).unwrap();
        reg.acquire_connection("a").unwrap();

        let m = reg.capacity_metrics();
        assert_eq!(m.total_backends, 2);
        assert_eq!(m.routable_backends, 1);
        assert_eq!(m.total_connections, 1);
        assert_eq!(m.total_capacity, 200);
    }

    #[test]
    fn missing_backend_is_an_error() {
        let reg = make_registry();
        assert_eq!(
            reg.acquire_connection("ghost"),
            Err(RoutingError::BackendNotFound("ghost".to_string()))
        );
    }
}
