//! flowgrid-predict — statistical estimators feeding predictive triggers.
//!
//! Deliberately simple models (ordinary least squares, exponential
//! smoothing, seasonal averaging) with fixed per-model confidences.
//! They trade rigor for predictability; a real ML model plugs in behind
//! the `ExternalMl` kind.

pub mod models;

pub use models::Predictor;
