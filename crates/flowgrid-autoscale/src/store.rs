//! Policy store — policies, cooldown timestamps, in-flight markers, and
//! the scaling event history.
//!
//! Shared between the engine (reads) and the executor (writes). Each
//! concern is keyed per policy so evaluation of one policy never blocks
//! execution of another.

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;

use flowgrid_core::{PolicyId, ScalingError, ScalingEvent, ScalingPolicy};

/// Keyed state for all scaling policies.
pub struct PolicyStore {
    policies: DashMap<PolicyId, ScalingPolicy>,
    /// Unix seconds of the last *successful* scaling per policy.
    last_scaled: DashMap<PolicyId, u64>,
    /// Policies with an execution currently in flight.
    in_flight: DashSet<PolicyId>,
    history: Mutex<Vec<ScalingEvent>>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self {
            policies: DashMap::new(),
            last_scaled: DashMap::new(),
            in_flight: DashSet::new(),
            history: Mutex::new(Vec::new()),
        }
    }

    // ── Policy CRUD (admin surface) ───────────────────────────────

    pub fn add_policy(&self, policy: ScalingPolicy) {
        self.policies.insert(policy.id.clone(), policy);
    }

    pub fn remove_policy(&self, id: &str) -> Option<ScalingPolicy> {
        self.last_scaled.remove(id);
        self.policies.remove(id).map(|(_, p)| p)
    }

    pub fn update_policy(&self, policy: ScalingPolicy) -> Result<(), ScalingError> {
        if !self.policies.contains_key(&policy.id) {
            return Err(ScalingError::PolicyNotFound(policy.id));
        }
        self.policies.insert(policy.id.clone(), policy);
        Ok(())
    }

    pub fn get_policy(&self, id: &str) -> Option<ScalingPolicy> {
        self.policies.get(id).map(|p| p.clone())
    }

    pub fn list_policies(&self) -> Vec<ScalingPolicy> {
        self.policies.iter().map(|p| p.clone()).collect()
    }

    // ── Cooldown tracking ─────────────────────────────────────────

    /// True while the policy's cooldown window is still running.
    pub fn in_cooldown(&self, id: &str, now: u64) -> bool {
        match (self.last_scaled.get(id), self.policies.get(id)) {
            (Some(last), Some(policy)) => now.saturating_sub(*last) < policy.cooldown_secs,
            _ => false,
        }
    }

    /// Restart the cooldown window. Called only after a successful scale.
    pub fn mark_scaled(&self, id: &str, now: u64) {
        self.last_scaled.insert(id.to_string(), now);
    }

    // ── In-flight markers ─────────────────────────────────────────

    /// Try to claim the single in-flight slot for a policy.
    pub fn try_mark_in_flight(&self, id: &str) -> bool {
        self.in_flight.insert(id.to_string())
    }

    /// Release the in-flight slot. Called on every outcome.
    pub fn clear_in_flight(&self, id: &str) {
        self.in_flight.remove(id);
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.contains(id)
    }

    /// Set a policy's desired size (the only field the executor mutates).
    pub fn set_desired_size(&self, id: &str, size: u32) -> Result<(), ScalingError> {
        let mut policy = self
            .policies
            .get_mut(id)
            .ok_or_else(|| ScalingError::PolicyNotFound(id.to_string()))?;
        policy.desired_size = size.clamp(policy.min_size, policy.max_size);
        Ok(())
    }

    // ── Event history ─────────────────────────────────────────────

    pub fn push_event(&self, event: ScalingEvent) {
        self.history.lock().push(event);
    }

    pub fn history(&self) -> Vec<ScalingEvent> {
        self.history.lock().clone()
    }

    /// Events recorded for one policy, oldest first.
    pub fn history_for(&self, policy_id: &str) -> Vec<ScalingEvent> {
        self.history
            .lock()
            .iter()
            .filter(|e| e.decision.policy_id == policy_id)
            .cloned()
            .collect()
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn crud_roundtrip() {
        let store = PolicyStore::new();
        store.add_policy(make_policy("p-1"));
        assert!(store.get_policy("p-1").is_some());

        let mut updated = make_policy("p-1");
        updated.max_size = 20;
        store.update_policy(updated).unwrap();
        assert_eq!(store.get_policy("p-1").unwrap().max_size, 20);

        assert!(store.remove_policy("p-1").is_some());
        assert!(store.get_policy("p-1").is_none());
    }

    #[test]
    fn update_unknown_policy_fails() {
        let store = PolicyStore::new();
        assert_eq!(
            store.update_policy(make_policy("ghost")),
            Err(ScalingError::PolicyNotFound("ghost".to_string()))
        );
    }

    #[test]
    fn cooldown_window() {
        let store = PolicyStore::new();
        store.add_policy(make_policy("p-1"));

        assert!(!store.in_cooldown("p-1", 1_000));
        store.mark_scaled("p-1", 1_000);
        assert!(store.in_cooldown("p-1", 1_299));
        assert!(!store.in_cooldown("p-1", 1_300));
    }

    #[test]
    fn in_flight_slot_is_exclusive() {
        let store = PolicyStore::new();
        assert!(store.try_mark_in_flight("p-1"));
        assert!(!store.try_mark_in_flight("p-1"));
        store.clear_in_flight("p-1");
        assert!(store.try_mark_in_flight("p-1"));
    }

    #[test]
    fn desired_size_is_clamped() {
        let store = PolicyStore::new();
        store.add_policy(make_policy("p-1"));
        store.set_desired_size("p-1", 50).unwrap();
        assert_eq!(store.get_policy("p-1").unwrap().desired_size, 10);
        store.set_desired_size("p-1", 0).unwrap();
        assert_eq!(store.get_policy("p-1").unwrap().desired_size, 2);
    }
}
