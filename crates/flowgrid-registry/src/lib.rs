//! flowgrid-registry — backend registry and health monitor.
//!
//! Holds the live backend set mutated concurrently by the router
//! (connection counts, response times) and the health sweep (scores,
//! state flips). Per-backend entries live in a DashMap so routing and
//! health updates never serialize against each other globally.

pub mod health;
pub mod registry;

pub use health::{HealthMonitor, compute_health_score};
pub use registry::{BackendRegistry, CapacityMetrics};
