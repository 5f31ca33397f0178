//! flowgrid-core — shared domain model for the Flowgrid balancing/scaling core.
//!
//! Holds the types passed between the registry, router, metric store,
//! prediction models, and the scaling engine, plus the error taxonomy,
//! configuration structs, and the fleet event bus.
//!
//! All domain types are serde-serializable so they can cross an API or
//! config boundary unchanged.

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::{FleetConfig, RouterConfig};
pub use error::{RoutingError, ScalingError};
pub use events::{EventBus, FleetEvent};
pub use types::*;
