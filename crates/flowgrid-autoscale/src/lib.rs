//! flowgrid-autoscale — the scaling policy engine and executor.
//!
//! The engine evaluates each enabled policy's triggers in declaration
//! order against the metric store and the prediction models, producing at
//! most one decision per policy per pass. The executor drives an accepted
//! decision through its pending → in-progress → completed/failed
//! lifecycle, invoking the external capacity collaborator; cooldowns only
//! advance on success, so failures retry naturally on the next pass.

pub mod engine;
pub mod executor;
pub mod store;

pub use engine::ScalingEngine;
pub use executor::{CapacityCallback, ScalingExecutor};
pub use store::PolicyStore;
