//! Configuration for the Flowgrid core.
//!
//! Plain serde structs; loadable from TOML. Defaults match the documented
//! behavior of each loop (60s policy evaluation, 5m retention sweep).

use serde::{Deserialize, Serialize};

use crate::types::RoutingAlgorithm;

/// Router-side configuration: algorithm, affinity, and rate limiting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub algorithm: RoutingAlgorithm,
    pub affinity_enabled: bool,
    /// TTL of a new affinity entry; set once at creation, never refreshed.
    pub affinity_ttl_secs: u64,
    /// Requests allowed per source per one-second window.
    pub rate_limit_per_sec: u32,
    /// How long a source stays blocked after exceeding the limit.
    pub rate_limit_block_secs: u64,
    /// Sources that bypass rate limiting entirely.
    pub whitelist: Vec<String>,
    /// Sources that are always rejected.
    pub blacklist: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            algorithm: RoutingAlgorithm::RoundRobin,
            affinity_enabled: false,
            affinity_ttl_secs: 300,
            rate_limit_per_sec: 100,
            rate_limit_block_secs: 60,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
        }
    }
}

/// Fleet-wide configuration for the background loops and the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub router: RouterConfig,
    /// Policy evaluation loop interval.
    pub evaluation_interval_secs: u64,
    /// Metric points older than this are trimmed.
    pub retention_secs: u64,
    /// Retention sweep interval.
    pub retention_sweep_secs: u64,
    /// Health recomputation sweep interval.
    pub health_sweep_secs: u64,
    /// How long a draining backend is kept before removal.
    pub drain_grace_secs: u64,
    /// Hard cap on concurrent in-flight scaling executions.
    pub max_concurrent_scalings: u32,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            evaluation_interval_secs: 60,
            retention_secs: 3600,
            retention_sweep_secs: 300,
            health_sweep_secs: 30,
            drain_grace_secs: 60,
            max_concurrent_scalings: 4,
        }
    }
}

impl FleetConfig {
    /// Parse a config from TOML text. Missing fields take defaults.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = FleetConfig::default();
        assert_eq!(cfg.evaluation_interval_secs, 60);
        assert_eq!(cfg.retention_sweep_secs, 300);
        assert_eq!(cfg.router.rate_limit_per_sec, 100);
        assert!(!cfg.router.affinity_enabled);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg = FleetConfig::from_toml(
            r#"
            evaluation_interval_secs = 30

            [router]
            algorithm = "least_connections"
            affinity_enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.evaluation_interval_secs, 30);
        assert_eq!(cfg.router.algorithm, RoutingAlgorithm::LeastConnections);
        assert!(cfg.router.affinity_enabled);
        // Untouched fields keep defaults.
        assert_eq!(cfg.retention_secs, 3600);
        assert_eq!(cfg.router.affinity_ttl_secs, 300);
    }
}
