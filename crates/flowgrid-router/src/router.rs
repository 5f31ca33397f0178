//! The routing core.
//!
//! `route()` runs the rate-limit check, then session affinity, then the
//! configured selection algorithm over the registry's healthy set. After
//! selection the backend's connection count is incremented and the
//! aggregate statistics updated. Errors surface immediately; retry policy
//! belongs to the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use flowgrid_core::{RouterConfig, RoutingError, RoutingRequest, RoutingResult};
use flowgrid_registry::BackendRegistry;

use crate::affinity::AffinityStore;
use crate::algorithms::{AlgorithmState, select};
use crate::rate_limit::RateLimiter;

/// Incremental mean over a stream of samples.
#[derive(Debug, Default)]
struct RunningMean {
    count: u64,
    mean: f64,
}

impl RunningMean {
    fn push(&mut self, sample: f64) {
        self.count += 1;
        self.mean += (sample - self.mean) / self.count as f64;
    }
}

/// Read-only statistics snapshot for external collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterStats {
    pub total_requests: u64,
    pub avg_decision_time_us: f64,
    pub per_backend_requests: Vec<(String, u64)>,
    pub per_region_avg_decision_us: Vec<(String, f64)>,
}

/// Routes requests to backends.
pub struct Router {
    registry: Arc<BackendRegistry>,
    rate_limiter: RateLimiter,
    affinity: AffinityStore,
    config: RouterConfig,
    alg_state: AlgorithmState,
    total_requests: AtomicU64,
    decision_time: Mutex<RunningMean>,
    per_backend: DashMap<String, u64>,
    per_region: DashMap<String, RunningMean>,
}

impl Router {
    pub fn new(registry: Arc<BackendRegistry>, config: RouterConfig) -> Self {
        let rate_limiter = RateLimiter::new(
            config.rate_limit_per_sec,
            config.rate_limit_block_secs,
            config.whitelist.clone(),
            config.blacklist.clone(),
        );
        info!(algorithm = ?config.algorithm, affinity = config.affinity_enabled, "router created");
        Self {
            registry,
            rate_limiter,
            affinity: AffinityStore::new(),
            config,
            alg_state: AlgorithmState::new(),
            total_requests: AtomicU64::new(0),
            decision_time: Mutex::new(RunningMean::default()),
            per_backend: DashMap::new(),
            per_region: DashMap::new(),
        }
    }

    /// Route a request to a backend.
    pub fn route(&self, request: &RoutingRequest) -> Result<RoutingResult, RoutingError> {
        let started = Instant::now();
        let now_ms = request.timestamp;

        self.rate_limiter.check(&request.source, now_ms)?;

        // A live affinity entry pointing at a routable backend wins over
        // the algorithm. Entries for non-routable backends are ignored,
        // not deleted; they lapse on their own TTL.
        if self.config.affinity_enabled {
            if let Some(session) = request.session_id.as_deref() {
                if let Some(backend_id) = self.affinity.lookup(session, now_ms) {
                    if self
                        .registry
                        .get(&backend_id)
                        .is_some_and(|b| b.is_routable())
                    {
                        return self.finish(request, backend_id, true, started);
                    }
                    debug!(session, %backend_id, "affinity target not routable, ignoring");
                }
            }
        }

        let healthy = self.registry.list_healthy();
        let idx = select(self.config.algorithm, &self.alg_state, &healthy, request)
            .ok_or(RoutingError::NoHealthyBackend)?;
        let backend_id = healthy[idx].id.clone();

        if self.config.affinity_enabled {
            if let Some(session) = request.session_id.as_deref() {
                self.affinity
                    .record(session, &backend_id, now_ms, self.config.affinity_ttl_secs);
            }
        }

        self.finish(request, backend_id, false, started)
    }

    fn finish(
        &self,
        request: &RoutingRequest,
        backend_id: String,
        affinity_honored: bool,
        started: Instant,
    ) -> Result<RoutingResult, RoutingError> {
        self.registry.acquire_connection(&backend_id)?;

        let elapsed_us = started.elapsed().as_micros() as u64;
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.decision_time.lock().push(elapsed_us as f64);
        *self.per_backend.entry(backend_id.clone()).or_insert(0) += 1;
        if let Some(ref geo) = request.geo {
            self.per_region
                .entry(geo.region.clone())
                .or_default()
                .push(elapsed_us as f64);
        }

        Ok(RoutingResult {
            backend_id,
            algorithm: self.config.algorithm,
            affinity_honored,
            decision_time_us: elapsed_us,
        })
    }

    /// Release a connection taken by a previous routing decision.
    pub fn release_connection(&self, backend_id: &str) -> Result<(), RoutingError> {
        self.registry.release_connection(backend_id)
    }

    /// Record an observed response time for a backend.
    pub fn record_response_time(&self, backend_id: &str, ms: f64) -> Result<(), RoutingError> {
        self.registry.record_response_time(backend_id, ms)
    }

    /// Aggregate routing statistics.
    pub fn stats(&self) -> RouterStats {
        let decision = self.decision_time.lock();
        RouterStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            avg_decision_time_us: decision.mean,
            per_backend_requests: self
                .per_backend
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            per_region_avg_decision_us: self
                .per_region
                .iter()
                .map(|e| (e.key().clone(), e.value().mean))
                .collect(),
        }
    }

    /// Drop expired rate-limit and affinity entries.
    pub fn sweep(&self, now_ms: u64) {
        self.rate_limiter.sweep(now_ms);
        self.affinity.sweep(now_ms);
    }

    /// Run the table sweep until shutdown.
    pub async fn run_sweep(
        &self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(interval_secs = interval.as_secs(), "router table sweep started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.sweep(epoch_ms());
                }
                _ = shutdown.changed() => {
                    info!("router table sweep shutting down");
                    break;
                }
            }
        }
    }
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
