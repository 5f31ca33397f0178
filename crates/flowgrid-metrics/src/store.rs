//! Metric store — per-key append-only time series.
//!
//! Keys are `"{source}:{metric}"`. Points are appended in arrival order
//! and trimmed to a retention window by a periodic sweep. DashMap gives
//! per-shard locking so recording one key never serializes against
//! reads of another.

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info};

use flowgrid_core::MetricPoint;

/// Concurrency-safe keyed time-series store.
pub struct MetricStore {
    series: DashMap<String, Vec<MetricPoint>>,
    /// Points older than this are dropped by `trim`.
    retention_secs: u64,
}

impl MetricStore {
    pub fn new(retention_secs: u64) -> Self {
        Self {
            series: DashMap::new(),
            retention_secs,
        }
    }

    fn key(source: &str, metric: &str) -> String {
        format!("{source}:{metric}")
    }

    /// Record a single observation. The only external write path.
    pub fn record(&self, source: &str, metric: &str, value: f64, timestamp: u64) {
        let mut entry = self.series.entry(Self::key(source, metric)).or_default();
        entry.push(MetricPoint { timestamp, value });
    }

    /// Points with `timestamp >= now - window_secs`, in arrival order.
    pub fn query_window(
        &self,
        source: &str,
        metric: &str,
        window_secs: u64,
        now: u64,
    ) -> Vec<MetricPoint> {
        let cutoff = now.saturating_sub(window_secs);
        match self.series.get(&Self::key(source, metric)) {
            Some(points) => points
                .iter()
                .filter(|p| p.timestamp >= cutoff)
                .copied()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Mean of the trailing window, or `None` if no points fall in it.
    pub fn window_mean(
        &self,
        source: &str,
        metric: &str,
        window_secs: u64,
        now: u64,
    ) -> Option<f64> {
        let points = self.query_window(source, metric, window_secs, now);
        if points.is_empty() {
            return None;
        }
        let sum: f64 = points.iter().map(|p| p.value).sum();
        Some(sum / points.len() as f64)
    }

    /// Full series clone for a key (feeds the prediction models).
    pub fn series(&self, source: &str, metric: &str) -> Vec<MetricPoint> {
        self.series
            .get(&Self::key(source, metric))
            .map(|points| points.clone())
            .unwrap_or_default()
    }

    /// Most recent value per key (feeds custom triggers).
    pub fn latest_snapshot(&self) -> HashMap<String, f64> {
        self.series
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .last()
                    .map(|p| (entry.key().clone(), p.value))
            })
            .collect()
    }

    /// Drop points older than the retention window. Keys left empty are
    /// removed entirely.
    pub fn trim(&self, now: u64) {
        let cutoff = now.saturating_sub(self.retention_secs);
        let mut dropped = 0usize;

        for mut entry in self.series.iter_mut() {
            let before = entry.len();
            entry.retain(|p| p.timestamp >= cutoff);
            dropped += before - entry.len();
        }
        self.series.retain(|_, points| !points.is_empty());

        if dropped > 0 {
            debug!(dropped, "trimmed expired metric points");
        }
    }

    /// Number of tracked keys.
    pub fn key_count(&self) -> usize {
        self.series.len()
    }

    /// Run the retention sweep until shutdown.
    pub async fn run_retention(
        &self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(
            interval_secs = interval.as_secs(),
            retention_secs = self.retention_secs,
            "metric retention sweep started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.trim(epoch_secs());
                }
                _ = shutdown.changed() => {
                    info!("metric retention sweep shutting down");
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
