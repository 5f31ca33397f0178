//! Domain types for the Flowgrid core.
//!
//! These types flow between the backend registry, the router, and the
//! scaling engine. All are serializable to/from JSON for API and config
//! boundaries.

use serde::{Deserialize, Serialize};

/// Unique identifier for a backend.
pub type BackendId = String;

/// Unique identifier for a scaling policy.
pub type PolicyId = String;

/// Session identifier carried by sticky requests.
pub type SessionId = String;

/// Source address of a routed request (ip or ip:port).
pub type SourceAddr = String;

// ── Backend ───────────────────────────────────────────────────────

/// A geographic location used for region- and distance-aware routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Region identifier (e.g. "eu-west", "us-east").
    pub region: String,
}

/// Operational state of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendState {
    Healthy,
    Degraded,
    Unhealthy,
    /// Taken out of rotation by an operator; health sweeps skip it.
    Maintenance,
    /// Being removed; no new traffic, existing connections drain out.
    Draining,
}

/// A unit of serving capacity behind the balancer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backend {
    pub id: BackendId,
    /// Network address (ip:port).
    pub address: String,
    /// Fixed weight for weighted round-robin.
    pub weight: u32,
    pub geo: Option<GeoPoint>,
    pub state: BackendState,
    pub current_connections: u32,
    pub max_connections: u32,
    /// Rolling response-time estimate in milliseconds.
    pub response_time_ms: f64,
    /// Health score in [0, 100].
    pub health_score: f64,
}

impl Backend {
    /// A backend is routable while healthy or degraded.
    pub fn is_routable(&self) -> bool {
        matches!(self.state, BackendState::Healthy | BackendState::Degraded)
    }

    /// Fraction of connection capacity still free, in [0, 1].
    pub fn spare_ratio(&self) -> f64 {
        if self.max_connections == 0 {
            return 0.0;
        }
        self.max_connections.saturating_sub(self.current_connections) as f64
            / self.max_connections as f64
    }
}

// ── Routing ───────────────────────────────────────────────────────

/// An incoming request to be routed. Immutable and ephemeral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRequest {
    pub id: String,
    pub source: SourceAddr,
    pub geo: Option<GeoPoint>,
    pub session_id: Option<SessionId>,
    /// Unix timestamp (milliseconds) when the request arrived.
    pub timestamp: u64,
}

/// Backend selection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingAlgorithm {
    RoundRobin,
    LeastConnections,
    LeastResponseTime,
    IpHash,
    WeightedRoundRobin,
    Geographic,
    HealthBased,
    Adaptive,
}

/// Outcome of a routing decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingResult {
    pub backend_id: BackendId,
    pub algorithm: RoutingAlgorithm,
    /// True when an existing session affinity entry was honored.
    pub affinity_honored: bool,
    /// Time spent making the decision, in microseconds.
    pub decision_time_us: u64,
}

// ── Metrics ───────────────────────────────────────────────────────

/// A single observation in a metric time series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    pub value: f64,
}

// ── Scaling ───────────────────────────────────────────────────────

/// Direction of a scaling action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDirection {
    Up,
    Down,
    None,
}

/// Comparison operator for metric triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl TriggerOp {
    /// Apply the operator to (observed, threshold).
    pub fn compare(&self, observed: f64, threshold: f64) -> bool {
        match self {
            TriggerOp::Gt => observed > threshold,
            TriggerOp::Gte => observed >= threshold,
            TriggerOp::Lt => observed < threshold,
            TriggerOp::Lte => observed <= threshold,
            TriggerOp::Eq => observed == threshold,
        }
    }
}

/// A condition that can propose a scaling decision.
///
/// `Schedule` and `Event` variants are declared but inert in the periodic
/// evaluation pass: schedules need a calendar evaluator that is not part
/// of this core, and event triggers fire only from an external feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScalingTrigger {
    Metric {
        id: String,
        metric: String,
        op: TriggerOp,
        threshold: f64,
        /// Trailing window the metric mean must satisfy the condition over.
        sustain_secs: u64,
        direction: ScaleDirection,
        /// Step size applied to the current size.
        amount: u32,
    },
    Schedule {
        id: String,
        cron: String,
    },
    Event {
        id: String,
        event_type: String,
    },
    Predictive {
        id: String,
        metric: String,
        horizon_secs: u64,
        /// Forecasts below this confidence are ignored.
        min_confidence: f64,
    },
    /// Evaluation function is injected into the engine at registration,
    /// keyed by this id; only the id is serialized.
    Custom {
        id: String,
    },
}

impl ScalingTrigger {
    pub fn id(&self) -> &str {
        match self {
            ScalingTrigger::Metric { id, .. }
            | ScalingTrigger::Schedule { id, .. }
            | ScalingTrigger::Event { id, .. }
            | ScalingTrigger::Predictive { id, .. }
            | ScalingTrigger::Custom { id } => id,
        }
    }
}

/// A scaling policy for one resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub id: PolicyId,
    /// Resource this policy manages; doubles as the metric source key.
    pub resource_type: String,
    pub min_size: u32,
    pub max_size: u32,
    /// The only field the executor mutates, always within [min, max].
    pub desired_size: u32,
    /// Minimum seconds between successful scaling actions.
    pub cooldown_secs: u64,
    /// Evaluated in declaration order; first decision wins.
    pub triggers: Vec<ScalingTrigger>,
    pub enabled: bool,
}

impl ScalingPolicy {
    /// Clamp a computed target into this policy's [min, max] bounds.
    pub fn clamp_target(&self, target: i64) -> u32 {
        target.clamp(self.min_size as i64, self.max_size as i64) as u32
    }
}

/// A proposed change to a policy's size. Pure value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub policy_id: PolicyId,
    pub trigger_id: String,
    pub direction: ScaleDirection,
    pub current_size: u32,
    pub target_size: u32,
    pub amount: u32,
    pub reason: String,
    /// Confidence in [0, 1]; 1.0 for metric triggers, model-reported for
    /// predictive ones.
    pub confidence: f64,
    /// Unix timestamp (seconds) when the decision was produced.
    pub timestamp: u64,
}

/// Lifecycle state of a scaling execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A decision accepted for execution, with its lifecycle outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingEvent {
    pub id: String,
    pub decision: ScalingDecision,
    pub status: ScalingStatus,
    pub started_at: u64,
    pub finished_at: Option<u64>,
    pub error: Option<String>,
}

// ── Prediction ────────────────────────────────────────────────────

/// Kind of prediction model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Linear,
    Exponential,
    Seasonal,
    /// Seam for an external ML model; never forecasts in this core.
    ExternalMl,
}

/// A configured prediction model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionModel {
    pub name: String,
    pub kind: ModelKind,
    /// Self-reported accuracy in [0, 1]; selection prefers the highest
    /// model above 0.8.
    pub accuracy: f64,
    pub params: std::collections::HashMap<String, f64>,
}

/// A forecast produced by a prediction model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub value: f64,
    pub confidence: f64,
    /// Name of the model that produced the forecast.
    pub model: String,
}
