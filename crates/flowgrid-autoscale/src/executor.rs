//! Scaling executor.
//!
//! Drives an accepted decision through pending → in-progress →
//! completed/failed, invoking the external capacity collaborator via a
//! callback. The cooldown timer and the policy's desired size move only
//! on success; the in-flight marker is cleared on every outcome so the
//! next evaluation pass can retry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tracing::{info, warn};

use flowgrid_core::{
    EventBus, FleetEvent, ScaleDirection, ScalingDecision, ScalingError, ScalingEvent,
    ScalingStatus,
};

use crate::store::PolicyStore;

/// Callback invoking the external capacity-change collaborator with
/// (resource_type, direction, amount, target_size).
pub type CapacityCallback =
    Box<dyn Fn(String, ScaleDirection, u32, u32) -> BoxFuture + Send + Sync>;

type BoxFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>;

/// Executes scaling decisions under a global concurrency cap.
pub struct ScalingExecutor {
    store: Arc<PolicyStore>,
    events: EventBus,
    capacity_fn: CapacityCallback,
    /// Global in-flight executions across all policies.
    in_flight_count: AtomicU32,
    max_concurrent: u32,
    event_seq: AtomicU64,
}

impl ScalingExecutor {
    pub fn new(
        store: Arc<PolicyStore>,
        events: EventBus,
        capacity_fn: CapacityCallback,
        max_concurrent: u32,
    ) -> Self {
        Self {
            store,
            events,
            capacity_fn,
            in_flight_count: AtomicU32::new(0),
            max_concurrent,
            event_seq: AtomicU64::new(0),
        }
    }

    /// Execute a decision to completion (or failure).
    ///
    /// Rejects with `ConcurrencyLimitExceeded` when the global cap is
    /// reached or the policy already has an execution in flight; the
    /// caller simply retries on the next evaluation pass.
    pub async fn execute(
        &self,
        decision: ScalingDecision,
        now: u64,
    ) -> Result<ScalingEvent, ScalingError> {
        let policy_id = decision.policy_id.clone();
        let resource_type = self
            .store
            .get_policy(&policy_id)
            .ok_or_else(|| ScalingError::PolicyNotFound(policy_id.clone()))?
            .resource_type;

        // Claim a global slot, then the per-policy slot.
        let claimed = self
            .in_flight_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_concurrent).then_some(n + 1)
            })
            .is_ok();
        if !claimed {
            return Err(ScalingError::ConcurrencyLimitExceeded);
        }
        if !self.store.try_mark_in_flight(&policy_id) {
            self.in_flight_count.fetch_sub(1, Ordering::SeqCst);
            return Err(ScalingError::ConcurrencyLimitExceeded);
        }

        let event_id = format!(
            "scale-{}-{}",
            policy_id,
            self.event_seq.fetch_add(1, Ordering::Relaxed)
        );
        let mut event = ScalingEvent {
            id: event_id.clone(),
            decision: decision.clone(),
            status: ScalingStatus::Pending,
            started_at: now,
            finished_at: None,
            error: None,
        };

        event.status = ScalingStatus::InProgress;
        self.events.publish(FleetEvent::ScalingStarted {
            policy_id: policy_id.clone(),
            event_id: event_id.clone(),
        });
        info!(
            %policy_id,
            %event_id,
            direction = ?decision.direction,
            from = decision.current_size,
            to = decision.target_size,
            "scaling started"
        );

        let outcome = (self.capacity_fn)(
            resource_type,
            decision.direction,
            decision.amount,
            decision.target_size,
        )
        .await;

        match outcome {
            Ok(()) => {
                // Desired size and cooldown advance only on success. The
                // policy can only be missing if an admin removed it while
                // the capacity call was in flight.
                if let Err(e) = self.store.set_desired_size(&policy_id, decision.target_size) {
                    warn!(%policy_id, error = %e, "policy vanished during execution");
                }
                self.store.mark_scaled(&policy_id, now);
                event.status = ScalingStatus::Completed;
                event.finished_at = Some(now);
                self.events.publish(FleetEvent::ScalingCompleted {
                    policy_id: policy_id.clone(),
                    event_id: event_id.clone(),
                    target_size: decision.target_size,
                });
                info!(%policy_id, %event_id, target = decision.target_size, "scaling completed");
            }
            Err(e) => {
                event.status = ScalingStatus::Failed;
                event.finished_at = Some(now);
                event.error = Some(e.to_string());
                self.events.publish(FleetEvent::ScalingFailed {
                    policy_id: policy_id.clone(),
                    event_id: event_id.clone(),
                    error: e.to_string(),
                });
                warn!(%policy_id, %event_id, error = %e, "scaling failed");
            }
        }

        self.store.clear_in_flight(&policy_id);
        self.in_flight_count.fetch_sub(1, Ordering::SeqCst);
        self.store.push_event(event.clone());
        Ok(event)
    }

    /// Current number of in-flight executions.
    pub fn in_flight(&self) -> u32 {
        self.in_flight_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgrid_core::ScalingPolicy;

    fn make_policy(id: &str) -> ScalingPolicy {
        ScalingPolicy {
            id: id.to_string(),
            resource_type: "web".to_string(),
            min_size: 2,
            max_size: 10,
            desired_size: 4,
            cooldown_secs: 300,
            triggers: vec![],
            enabled: true,
        }
    }

    fn make_decision(policy_id: &str, target: u32) -> ScalingDecision {
        ScalingDecision {
            policy_id: policy_id.to_string(),
            trigger_id: "t-1".to_string(),
            direction: ScaleDirection::Up,
            current_size: 4,
            target_size: target,
            amount: target.saturating_sub(4),
            reason: "test".to_string(),
            confidence: 1.0,
            timestamp: 1_000,
        }
    }

    fn ok_callback() -> CapacityCallback {
        Box::new(|_, _, _, _| Box::pin(async { Ok(()) }))
    }

    fn failing_callback(msg: &'static str) -> CapacityCallback {
        Box::new(move |_, _, _, _| Box::pin(async move { anyhow::bail!(msg) }))
    }

    #[tokio::test]
    async fn success_updates_desired_size_and_cooldown() {
        let store = Arc::new(PolicyStore::new());
        store.add_policy(make_policy("p-1"));
        let exec = ScalingExecutor::new(store.clone(), EventBus::default(), ok_callback(), 4);

        let event = exec.execute(make_decision("p-1", 6), 1_000).await.unwrap();
        assert_eq!(event.status, ScalingStatus::Completed);
        assert_eq!(event.finished_at, Some(1_000));
        assert!(event.error.is_none());

        assert_eq!(store.get_policy("p-1").unwrap().desired_size, 6);
        assert!(store.in_cooldown("p-1", 1_100));
        assert!(!store.is_in_flight("p-1"));
        assert_eq!(exec.in_flight(), 0);
    }

    #[tokio::test]
    async fn failure_leaves_policy_untouched() {
        let store = Arc::new(PolicyStore::new());
        store.add_policy(make_policy("p-1"));
        let exec = ScalingExecutor::new(
            store.clone(),
            EventBus::default(),
            failing_callback("capacity manager unavailable"),
            4,
        );

        let event = exec.execute(make_decision("p-1", 6), 1_000).await.unwrap();
        assert_eq!(event.status, ScalingStatus::Failed);
        assert!(
            event
                .error
                .as_deref()
                .unwrap()
                .contains("capacity manager unavailable")
        );

        // Neither desired size nor cooldown advanced; next pass retries.
        assert_eq!(store.get_policy("p-1").unwrap().desired_size, 4);
        assert!(!store.in_cooldown("p-1", 1_100));
        assert!(!store.is_in_flight("p-1"));
    }

    #[tokio::test]
    async fn unknown_policy_is_rejected() {
        let store = Arc::new(PolicyStore::new());
        let exec = ScalingExecutor::new(store, EventBus::default(), ok_callback(), 4);

        assert_eq!(
            exec.execute(make_decision("ghost", 6), 1_000).await,
            Err(ScalingError::PolicyNotFound("ghost".to_string()))
        );
    }

    #[tokio::test]
    async fn global_cap_rejects_excess_executions() {
        let store = Arc::new(PolicyStore::new());
        store.add_policy(make_policy("p-1"));
        store.add_policy(make_policy("p-2"));

        // Callback parks until released so executions overlap.
        let (release_tx, release_rx) = tokio::sync::watch::channel(false);
        let callback: CapacityCallback = Box::new(move |_, _, _, _| {
            let mut rx = release_rx.clone();
            Box::pin(async move {
                while !*rx.borrow() {
                    rx.changed().await?;
                }
                Ok(())
            })
        });

        let exec = Arc::new(ScalingExecutor::new(
            store,
            EventBus::default(),
            callback,
            1,
        ));

        let first = {
            let exec = exec.clone();
            tokio::spawn(async move { exec.execute(make_decision("p-1", 6), 1_000).await })
        };

        // Wait until the first execution holds the slot.
        while exec.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(
            exec.execute(make_decision("p-2", 6), 1_000).await,
            Err(ScalingError::ConcurrencyLimitExceeded)
        );

        release_tx.send(true).unwrap();
        let event = first.await.unwrap().unwrap();
        assert_eq!(event.status, ScalingStatus::Completed);
        assert_eq!(exec.in_flight(), 0);
    }

    #[tokio::test]
    async fn one_in_flight_execution_per_policy() {
        let store = Arc::new(PolicyStore::new());
        store.add_policy(make_policy("p-1"));

        let (release_tx, release_rx) = tokio::sync::watch::channel(false);
        let callback: CapacityCallback = Box::new(move |_, _, _, _| {
            let mut rx = release_rx.clone();
            Box::pin(async move {
                while !*rx.borrow() {
                    rx.changed().await?;
                }
                Ok(())
            })
        });

        let exec = Arc::new(ScalingExecutor::new(
            store.clone(),
            EventBus::default(),
            callback,
            4,
        ));

        let first = {
            let exec = exec.clone();
            tokio::spawn(async move { exec.execute(make_decision("p-1", 6), 1_000).await })
        };
        while !store.is_in_flight("p-1") {
            tokio::task::yield_now().await;
        }

        // Same policy, second execution: rejected even though the global
        // cap (4) has room.
        assert_eq!(
            exec.execute(make_decision("p-1", 7), 1_000).await,
            Err(ScalingError::ConcurrencyLimitExceeded)
        );

        release_tx.send(true).unwrap();
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn lifecycle_events_are_published() {
        let store = Arc::new(PolicyStore::new());
        store.add_policy(make_policy("p-1"));
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let exec = ScalingExecutor::new(store, bus, ok_callback(), 4);

        exec.execute(make_decision("p-1", 6), 1_000).await.unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            FleetEvent::ScalingStarted { .. }
        ));
        match rx.recv().await.unwrap() {
            FleetEvent::ScalingCompleted { target_size, .. } => assert_eq!(target_size, 6),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn history_records_every_outcome() {
        let store = Arc::new(PolicyStore::new());
        store.add_policy(make_policy("p-1"));
        let exec = ScalingExecutor::new(
            store.clone(),
            EventBus::default(),
            failing_callback("nope"),
            4,
        );

        exec.execute(make_decision("p-1", 6), 1_000).await.unwrap();
        exec.execute(make_decision("p-1", 6), 1_100).await.unwrap();

        let history = store.history_for("p-1");
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|e| e.status == ScalingStatus::Failed));
    }
}
