//! Backend selection algorithms.
//!
//! Every function selects from the healthy set it is handed and never
//! looks outside it. Tie-breaks are explicit: minimum/maximum scans keep
//! the first backend encountered, and the round-robin cursor is a shared
//! atomic taken modulo the set size at evaluation time.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use flowgrid_core::{Backend, GeoPoint, RoutingAlgorithm, RoutingRequest};

/// Earth radius used for great-circle distances, in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Shared selection state that must survive across calls.
pub struct AlgorithmState {
    rr_cursor: AtomicUsize,
}

impl AlgorithmState {
    pub fn new() -> Self {
        Self {
            rr_cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for AlgorithmState {
    fn default() -> Self {
        Self::new()
    }
}

/// Select a backend index from `set` using `algorithm`.
///
/// Returns `None` only when `set` is empty.
pub fn select(
    algorithm: RoutingAlgorithm,
    state: &AlgorithmState,
    set: &[Backend],
    request: &RoutingRequest,
) -> Option<usize> {
    if set.is_empty() {
        return None;
    }
    let idx = match algorithm {
        RoutingAlgorithm::RoundRobin => round_robin(state, set.len()),
        RoutingAlgorithm::LeastConnections => least_connections(set),
        RoutingAlgorithm::LeastResponseTime => least_response_time(set),
        RoutingAlgorithm::IpHash => ip_hash(&request.source, set.len()),
        RoutingAlgorithm::WeightedRoundRobin => weighted_round_robin(set),
        RoutingAlgorithm::Geographic => geographic(state, set, request),
        RoutingAlgorithm::HealthBased => health_based(set),
        RoutingAlgorithm::Adaptive => adaptive(set, request),
    };
    Some(idx)
}

/// Monotonic cursor modulo the set size at evaluation time. The set can
/// change between calls; no sticky ordering is guaranteed.
fn round_robin(state: &AlgorithmState, len: usize) -> usize {
    state.rr_cursor.fetch_add(1, Ordering::Relaxed) % len
}

/// Minimum current connections; first encountered wins ties.
fn least_connections(set: &[Backend]) -> usize {
    let mut best = 0;
    for (i, b) in set.iter().enumerate().skip(1) {
        if b.current_connections < set[best].current_connections {
            best = i;
        }
    }
    best
}

/// Minimum response-time estimate; first encountered wins ties.
fn least_response_time(set: &[Backend]) -> usize {
    let mut best = 0;
    for (i, b) in set.iter().enumerate().skip(1) {
        if b.response_time_ms < set[best].response_time_ms {
            best = i;
        }
    }
    best
}

/// 32-bit rolling hash of the source address modulo the set size.
/// Deterministic for a fixed source and fixed set size.
fn ip_hash(source: &str, len: usize) -> usize {
    hash_source(source) as usize % len
}

pub(crate) fn hash_source(source: &str) -> u32 {
    let mut hash = 0u32;
    for byte in source.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(byte as u32);
    }
    hash
}

/// Uniform draw in [0, total_weight); subtract weights in iteration order
/// until the draw goes negative. Falls back to the first backend if the
/// total weight is zero.
fn weighted_round_robin(set: &[Backend]) -> usize {
    let total: u64 = set.iter().map(|b| b.weight as u64).sum();
    if total == 0 {
        return 0;
    }
    let mut draw = rand::thread_rng().gen_range(0..total) as i64;
    for (i, b) in set.iter().enumerate() {
        draw -= b.weight as i64;
        if draw < 0 {
            return i;
        }
    }
    0
}

/// Same-region backends by least connections; otherwise the backend
/// closest by great-circle distance; requests without a geo point fall
/// back to round-robin.
fn geographic(state: &AlgorithmState, set: &[Backend], request: &RoutingRequest) -> usize {
    let Some(ref req_geo) = request.geo else {
        return round_robin(state, set.len());
    };

    let same_region: Vec<usize> = set
        .iter()
        .enumerate()
        .filter(|(_, b)| {
            b.geo
                .as_ref()
                .is_some_and(|g| g.region == req_geo.region)
        })
        .map(|(i, _)| i)
        .collect();

    if !same_region.is_empty() {
        let mut best = same_region[0];
        for &i in &same_region[1..] {
            if set[i].current_connections < set[best].current_connections {
                best = i;
            }
        }
        return best;
    }

    // No regional match: minimize distance. Backends without a location
    // sort behind every located one.
    let mut best = 0;
    let mut best_dist = backend_distance(&set[0], req_geo);
    for (i, b) in set.iter().enumerate().skip(1) {
        let dist = backend_distance(b, req_geo);
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    best
}

/// Maximum health score; first encountered wins ties.
fn health_based(set: &[Backend]) -> usize {
    let mut best = 0;
    for (i, b) in set.iter().enumerate().skip(1) {
        if b.health_score > set[best].health_score {
            best = i;
        }
    }
    best
}

/// Linear scalarization over health, load, latency, and (when the request
/// carries a location) distance:
///
///   0.4·(health/100) + 0.3·(1 − cur/max) + 0.2·(1 − rt/max_rt)
///   + 0.1·(1 − dist/max_dist)
///
/// Maximum score wins, first encountered on ties.
fn adaptive(set: &[Backend], request: &RoutingRequest) -> usize {
    let max_rt = set
        .iter()
        .map(|b| b.response_time_ms)
        .fold(0.0_f64, f64::max);
    let distances: Option<Vec<f64>> = request.geo.as_ref().map(|req_geo| {
        set.iter().map(|b| backend_distance(b, req_geo)).collect()
    });
    let max_dist = distances
        .as_ref()
        .map(|d| d.iter().copied().filter(|v| v.is_finite()).fold(0.0_f64, f64::max));

    let score = |i: usize, b: &Backend| -> f64 {
        let mut s = 0.4 * (b.health_score / 100.0) + 0.3 * (1.0 - conn_ratio(b));
        if max_rt > 0.0 {
            s += 0.2 * (1.0 - b.response_time_ms / max_rt);
        } else {
            s += 0.2;
        }
        if let (Some(dists), Some(max_dist)) = (&distances, max_dist) {
            if max_dist > 0.0 && dists[i].is_finite() {
                s += 0.1 * (1.0 - dists[i] / max_dist);
            }
        }
        s
    };

    let mut best = 0;
    let mut best_score = score(0, &set[0]);
    for (i, b) in set.iter().enumerate().skip(1) {
        let s = score(i, b);
        if s > best_score {
            best = i;
            best_score = s;
        }
    }
    best
}

fn conn_ratio(b: &Backend) -> f64 {
    if b.max_connections == 0 {
        return 1.0;
    }
    b.current_connections as f64 / b.max_connections as f64
}

fn backend_distance(backend: &Backend, point: &GeoPoint) -> f64 {
    match backend.geo {
        Some(ref g) => haversine_km(g, point),
        None => f64::INFINITY,
    }
}

/// Great-circle distance between two points in kilometers.
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}
