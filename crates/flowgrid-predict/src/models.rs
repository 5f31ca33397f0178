//! Prediction models and model selection.
//!
//! The predictor holds the configured models and picks the most accurate
//! one above the 0.8 accuracy bar; when none qualifies it falls back to a
//! fixed linear model at 0.7 accuracy. Series shorter than ten points
//! yield a zero forecast with zero confidence.

use std::collections::HashMap;

use tracing::debug;

use flowgrid_core::{Forecast, MetricPoint, ModelKind, PredictionModel};

/// Minimum series length for any model to forecast.
const MIN_POINTS: usize = 10;

/// Smoothing constant for the exponential model.
const SMOOTHING_ALPHA: f64 = 0.3;

/// Samples per season for the seasonal model.
const SEASONAL_PERIOD: usize = 24;

/// Holds configured models and produces forecasts.
pub struct Predictor {
    models: Vec<PredictionModel>,
    fallback: PredictionModel,
}

impl Predictor {
    pub fn new(models: Vec<PredictionModel>) -> Self {
        Self {
            models,
            fallback: PredictionModel {
                name: "linear-fallback".to_string(),
                kind: ModelKind::Linear,
                accuracy: 0.7,
                params: HashMap::new(),
            },
        }
    }

    /// The model the predictor will use: highest accuracy above 0.8, or
    /// the built-in linear fallback.
    pub fn active_model(&self) -> &PredictionModel {
        self.models
            .iter()
            .filter(|m| m.accuracy > 0.8)
            .max_by(|a, b| a.accuracy.total_cmp(&b.accuracy))
            .unwrap_or(&self.fallback)
    }

    /// Forecast `horizon_secs` ahead over `series`.
    ///
    /// Short series (fewer than ten points) produce a zero-value,
    /// zero-confidence forecast that predictive triggers will discard.
    pub fn forecast(&self, series: &[MetricPoint], horizon_secs: u64) -> Forecast {
        let model = self.active_model();

        if series.len() < MIN_POINTS {
            debug!(
                points = series.len(),
                model = %model.name,
                "series too short to forecast"
            );
            return Forecast {
                value: 0.0,
                confidence: 0.0,
                model: model.name.clone(),
            };
        }

        let (value, confidence) = match model.kind {
            ModelKind::Linear => linear_forecast(series, horizon_secs),
            ModelKind::Exponential => exponential_forecast(series),
            ModelKind::Seasonal => seasonal_forecast(series),
            // Seam for a real ML model; abstains in this core.
            ModelKind::ExternalMl => (0.0, 0.0),
        };

        Forecast {
            value,
            confidence,
            model: model.name.clone(),
        }
    }
}

impl Default for Predictor {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Ordinary least squares over (index, value); extrapolates to
/// `n + horizon_secs/60`. Result floored at zero, confidence 0.85.
fn linear_forecast(series: &[MetricPoint], horizon_secs: u64) -> (f64, f64) {
    let n = series.len() as f64;
    let sum_x: f64 = (0..series.len()).map(|i| i as f64).sum();
    let sum_y: f64 = series.iter().map(|p| p.value).sum();
    let sum_xy: f64 = series
        .iter()
        .enumerate()
        .map(|(i, p)| i as f64 * p.value)
        .sum();
    let sum_x2: f64 = (0..series.len()).map(|i| (i * i) as f64).sum();

    let denom = n * sum_x2 - sum_x * sum_x;
    let slope = if denom == 0.0 {
        0.0
    } else {
        (n * sum_xy - sum_x * sum_y) / denom
    };
    let intercept = (sum_y - slope * sum_x) / n;

    let future_index = series.len() as f64 + (horizon_secs / 60) as f64;
    ((slope * future_index + intercept).max(0.0), 0.85)
}

/// Exponential smoothing, α = 0.3, seeded with the first value and folded
/// left-to-right. The horizon is unused: the smoothed level is the
/// forecast at any lead time. Confidence 0.80.
fn exponential_forecast(series: &[MetricPoint]) -> (f64, f64) {
    let mut smoothed = series[0].value;
    for p in &series[1..] {
        smoothed = SMOOTHING_ALPHA * p.value + (1.0 - SMOOTHING_ALPHA) * smoothed;
    }
    (smoothed, 0.80)
}

/// Average of points in the same phase of a fixed 24-sample period as the
/// next index. Confidence 0.75.
fn seasonal_forecast(series: &[MetricPoint]) -> (f64, f64) {
    let phase = series.len() % SEASONAL_PERIOD;
    let matching: Vec<f64> = series
        .iter()
        .enumerate()
        .filter(|(i, _)| i % SEASONAL_PERIOD == phase)
        .map(|(_, p)| p.value)
        .collect();

    if matching.is_empty() {
        return (0.0, 0.75);
    }
    let mean = matching.iter().sum::<f64>() / matching.len() as f64;
    (mean, 0.75)
}
