//! Scaling policy engine.
//!
//! Each evaluation pass walks every enabled policy that is neither in its
//! cooldown window nor mid-execution, evaluates its triggers in
//! declaration order, and stops at the first trigger that produces a
//! decision — one decision per policy per pass.
//!
//! Schedule triggers always abstain (no calendar evaluator in this core)
//! and event triggers fire only from an external feed, never from this
//! periodic pass. Both are deliberate inert behavior.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use flowgrid_core::{
    ScaleDirection, ScalingDecision, ScalingPolicy, ScalingTrigger, TriggerOp,
};
use flowgrid_metrics::MetricStore;
use flowgrid_predict::Predictor;

use crate::executor::ScalingExecutor;
use crate::store::PolicyStore;

/// Utilization forecast above which a predictive trigger scales up.
const PREDICT_UP_THRESHOLD: f64 = 0.8;
/// Utilization forecast below which a predictive trigger scales down.
const PREDICT_DOWN_THRESHOLD: f64 = 0.2;

/// Evaluation function for a custom trigger: gets the latest value per
/// metric key and may return a decision.
pub type CustomEvaluator =
    Box<dyn Fn(&HashMap<String, f64>) -> Option<ScalingDecision> + Send + Sync>;

/// Evaluates scaling policies against observed and predicted load.
pub struct ScalingEngine {
    store: Arc<PolicyStore>,
    metrics: Arc<MetricStore>,
    predictor: Predictor,
    /// Custom trigger evaluators keyed by trigger id.
    custom: DashMap<String, CustomEvaluator>,
}

impl ScalingEngine {
    pub fn new(store: Arc<PolicyStore>, metrics: Arc<MetricStore>, predictor: Predictor) -> Self {
        Self {
            store,
            metrics,
            predictor,
            custom: DashMap::new(),
        }
    }

    /// Register the evaluation function for a custom trigger id.
    pub fn register_custom(&self, trigger_id: &str, evaluator: CustomEvaluator) {
        self.custom.insert(trigger_id.to_string(), evaluator);
    }

    /// Evaluate all policies once. Returns at most one decision per policy.
    pub fn evaluate_all(&self, now: u64) -> Vec<ScalingDecision> {
        let mut decisions = Vec::new();

        for policy in self.store.list_policies() {
            if !policy.enabled {
                continue;
            }
            if self.store.in_cooldown(&policy.id, now) {
                debug!(policy_id = %policy.id, "policy in cooldown, skipping");
                continue;
            }
            if self.store.is_in_flight(&policy.id) {
                debug!(policy_id = %policy.id, "policy mid-execution, skipping");
                continue;
            }

            if let Some(decision) = self.evaluate_policy(&policy, now) {
                decisions.push(decision);
            }
        }
        decisions
    }

    /// Evaluate one policy's triggers in declaration order; first decision
    /// wins.
    pub fn evaluate_policy(&self, policy: &ScalingPolicy, now: u64) -> Option<ScalingDecision> {
        for trigger in &policy.triggers {
            let decision = match trigger {
                ScalingTrigger::Metric {
                    id,
                    metric,
                    op,
                    threshold,
                    sustain_secs,
                    direction,
                    amount,
                } => self.evaluate_metric_trigger(
                    policy,
                    id,
                    metric,
                    *op,
                    *threshold,
                    *sustain_secs,
                    *direction,
                    *amount,
                    now,
                ),
                ScalingTrigger::Predictive {
                    id,
                    metric,
                    horizon_secs,
                    min_confidence,
                } => self.evaluate_predictive_trigger(
                    policy,
                    id,
                    metric,
                    *horizon_secs,
                    *min_confidence,
                    now,
                ),
                // Inert: needs a calendar evaluator this core does not carry.
                ScalingTrigger::Schedule { .. } => None,
                // Inert in the periodic pass: fires from an external feed.
                ScalingTrigger::Event { .. } => None,
                ScalingTrigger::Custom { id } => self
                    .custom
                    .get(id)
                    .and_then(|eval| (eval.value())(&self.metrics.latest_snapshot())),
            };
            if decision.is_some() {
                return decision;
            }
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_metric_trigger(
        &self,
        policy: &ScalingPolicy,
        trigger_id: &str,
        metric: &str,
        op: TriggerOp,
        threshold: f64,
        sustain_secs: u64,
        direction: ScaleDirection,
        amount: u32,
        now: u64,
    ) -> Option<ScalingDecision> {
        // No points in the sustain window: abstain rather than treat
        // missing data as zero.
        let mean = self
            .metrics
            .window_mean(&policy.resource_type, metric, sustain_secs, now)?;

        if !op.compare(mean, threshold) {
            return None;
        }

        let current = policy.desired_size;
        let target = match direction {
            ScaleDirection::Up => policy.clamp_target(current as i64 + amount as i64),
            ScaleDirection::Down => policy.clamp_target(current as i64 - amount as i64),
            ScaleDirection::None => return None,
        };
        if target == current {
            return None;
        }

        Some(ScalingDecision {
            policy_id: policy.id.clone(),
            trigger_id: trigger_id.to_string(),
            direction,
            current_size: current,
            target_size: target,
            amount,
            reason: format!(
                "metric {metric} mean {mean:.2} over {sustain_secs}s satisfies {op:?} {threshold}"
            ),
            confidence: 1.0,
            timestamp: now,
        })
    }

    fn evaluate_predictive_trigger(
        &self,
        policy: &ScalingPolicy,
        trigger_id: &str,
        metric: &str,
        horizon_secs: u64,
        min_confidence: f64,
        now: u64,
    ) -> Option<ScalingDecision> {
        let series = self.metrics.series(&policy.resource_type, metric);
        let forecast = self.predictor.forecast(&series, horizon_secs);

        if forecast.confidence < min_confidence {
            debug!(
                policy_id = %policy.id,
                confidence = forecast.confidence,
                min_confidence,
                "forecast below confidence gate"
            );
            return None;
        }

        let current = policy.desired_size;
        let (direction, step) = if forecast.value > PREDICT_UP_THRESHOLD {
            // Scale up by 50% of current capacity.
            (ScaleDirection::Up, ((current as f64) * 0.5).ceil().max(1.0) as u32)
        } else if forecast.value < PREDICT_DOWN_THRESHOLD {
            // Scale down by 30%.
            (ScaleDirection::Down, ((current as f64) * 0.3).ceil().max(1.0) as u32)
        } else {
            return None;
        };

        let target = match direction {
            ScaleDirection::Up => policy.clamp_target(current as i64 + step as i64),
            _ => policy.clamp_target(current as i64 - step as i64),
        };
        if target == current {
            return None;
        }

        Some(ScalingDecision {
            policy_id: policy.id.clone(),
            trigger_id: trigger_id.to_string(),
            direction,
            current_size: current,
            target_size: target,
            amount: step,
            reason: format!(
                "model {} forecasts {metric} at {:.2} over {horizon_secs}s",
                forecast.model, forecast.value
            ),
            confidence: forecast.confidence,
            timestamp: now,
        })
    }

    /// Run the evaluation loop: evaluate, then hand each decision to the
    /// executor. Executor rejections (caps, races) are logged and retried
    /// naturally on the next pass.
    pub async fn run(
        &self,
        executor: Arc<ScalingExecutor>,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(interval_secs = interval.as_secs(), "scaling engine started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let now = epoch_secs();
                    for decision in self.evaluate_all(now) {
                        let policy_id = decision.policy_id.clone();
                        if let Err(e) = executor.execute(decision, now).await {
                            warn!(%policy_id, error = %e, "scaling execution rejected");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("scaling engine shutting down");
                    break;
                }
            }
        }
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
