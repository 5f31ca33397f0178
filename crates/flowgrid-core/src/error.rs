//! Error taxonomy for the Flowgrid core.
//!
//! Routing errors surface to the caller immediately and are never retried
//! here. Scaling errors are recorded on the event and implicitly retried
//! by the next evaluation pass. Nothing in this taxonomy is fatal to the
//! process.

use thiserror::Error;

/// Errors on the request-routing path.
///
/// `Display` and `Error` are implemented by hand because thiserror would
/// treat the `source` field of `RateLimited` as the error source, and the
/// field name is part of the public API.
#[derive(Debug, PartialEq, Eq)]
pub enum RoutingError {
    /// Every backend is unhealthy, draining, or in maintenance.
    NoHealthyBackend,

    /// The source exceeded its rate-limit window or is blacklisted.
    RateLimited { source: String },

    BackendNotFound(String),
}

impl std::fmt::Display for RoutingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingError::NoHealthyBackend => write!(f, "no healthy backend available"),
            RoutingError::RateLimited { source } => {
                write!(f, "source {source} is rate limited")
            }
            RoutingError::BackendNotFound(name) => write!(f, "backend not found: {name}"),
        }
    }
}

impl std::error::Error for RoutingError {}

/// Errors on the scaling path.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScalingError {
    #[error("policy not found: {0}")]
    PolicyNotFound(String),

    /// The global in-flight cap is reached, or the policy already has an
    /// execution in flight.
    #[error("scaling concurrency limit exceeded")]
    ConcurrencyLimitExceeded,

    /// The external capacity collaborator reported failure. Policy state
    /// is left untouched so the next pass can retry from the same baseline.
    #[error("capacity change failed: {reason}")]
    CapacityChangeFailed { reason: String },
}
