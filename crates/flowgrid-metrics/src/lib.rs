//! flowgrid-metrics — append-only metric time series for the Flowgrid core.
//!
//! The store is the leaf dependency of both the scaling engine (trailing
//! window means for metric triggers) and the prediction models (full
//! series). `record()` is the only external write path.

pub mod store;

pub use store::MetricStore;
