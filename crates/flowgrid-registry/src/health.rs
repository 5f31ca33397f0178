//! Health recomputation sweep.
//!
//! Derives each backend's score from three weighted factors: operational
//! state (50%), spare-connection ratio (30%), and inverse response time
//! (20%). The formula is a heuristic over data the registry already has;
//! an active probe plugs in at the registry's `update_health` seam.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use flowgrid_core::{Backend, BackendState};

use crate::registry::BackendRegistry;

/// Weighted-factor health score in [0, 100].
///
/// State factor: healthy 100, degraded 50, unhealthy 0. Spare ratio and
/// inverse response time are scaled to the same range before weighting.
pub fn compute_health_score(backend: &Backend) -> f64 {
    let state_factor = match backend.state {
        BackendState::Healthy => 100.0,
        BackendState::Degraded => 50.0,
        _ => 0.0,
    };
    let spare_factor = 100.0 * backend.spare_ratio();
    let response_factor = 100.0 / (1.0 + backend.response_time_ms / 100.0);

    (0.5 * state_factor + 0.3 * spare_factor + 0.2 * response_factor).clamp(0.0, 100.0)
}

/// Periodic health recomputation over the whole registry.
pub struct HealthMonitor {
    registry: Arc<BackendRegistry>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self { registry }
    }

    /// Recompute every backend's score once. Maintenance and draining
    /// backends are skipped (their states are operator-owned); draining
    /// backends past their grace deadline are removed.
    pub fn sweep(&self, now: u64) {
        for backend in self.registry.list_all() {
            if matches!(
                backend.state,
                BackendState::Maintenance | BackendState::Draining
            ) {
                continue;
            }
            let score = compute_health_score(&backend);
            // The backend can only disappear concurrently via drain removal.
            let _ = self.registry.update_health(&backend.id, score);
        }
        self.registry.sweep_drained(now);
    }

    /// Run the health sweep until shutdown.
    pub async fn run(
        &self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(
            interval_secs = interval.as_secs(),
            "health sweep started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.sweep(epoch_secs());
                }
                _ = shutdown.changed() => {
                    info!("health sweep shutting down");
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
