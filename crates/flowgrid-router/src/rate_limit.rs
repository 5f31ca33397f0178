//! Per-source rate limiter.
//!
//! Fixed one-second sliding window per source address. A source that
//! exceeds its limit is blocked for a configured duration; expiry is
//! lazy-checked on access and a periodic sweep drops dead entries, so
//! no per-entry timers exist.

use std::collections::HashSet;

use dashmap::DashMap;
use tracing::debug;

use flowgrid_core::{RoutingError, SourceAddr};

const WINDOW_MS: u64 = 1_000;

#[derive(Debug)]
struct RateEntry {
    count: u32,
    /// End of the current one-second window (unix ms).
    window_reset_ms: u64,
    /// Source is rejected until this time after exceeding the limit.
    blocked_until_ms: u64,
}

/// Sliding-window rate limiter with allow/deny lists.
pub struct RateLimiter {
    entries: DashMap<SourceAddr, RateEntry>,
    limit: u32,
    block_ms: u64,
    whitelist: HashSet<String>,
    blacklist: HashSet<String>,
}

impl RateLimiter {
    pub fn new(
        limit: u32,
        block_secs: u64,
        whitelist: Vec<String>,
        blacklist: Vec<String>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            limit,
            block_ms: block_secs * 1_000,
            whitelist: whitelist.into_iter().collect(),
            blacklist: blacklist.into_iter().collect(),
        }
    }

    /// Check whether a request from `source` is allowed at `now_ms`.
    ///
    /// Whitelisted sources bypass the limiter entirely; blacklisted
    /// sources are always rejected.
    pub fn check(&self, source: &str, now_ms: u64) -> Result<(), RoutingError> {
        if self.blacklist.contains(source) {
            return Err(RoutingError::RateLimited {
                source: source.to_string(),
            });
        }
        if self.whitelist.contains(source) {
            return Ok(());
        }

        let mut entry = self
            .entries
            .entry(source.to_string())
            .or_insert_with(|| RateEntry {
                count: 0,
                window_reset_ms: now_ms + WINDOW_MS,
                blocked_until_ms: 0,
            });

        if now_ms < entry.blocked_until_ms {
            return Err(RoutingError::RateLimited {
                source: source.to_string(),
            });
        }

        if now_ms >= entry.window_reset_ms {
            entry.count = 0;
            entry.window_reset_ms = now_ms + WINDOW_MS;
        }

        entry.count += 1;
        if entry.count > self.limit {
            entry.blocked_until_ms = now_ms + self.block_ms;
            debug!(source, block_ms = self.block_ms, "source exceeded rate limit");
            return Err(RoutingError::RateLimited {
                source: source.to_string(),
            });
        }
        Ok(())
    }

    /// Drop entries whose window and block have both lapsed.
    pub fn sweep(&self, now_ms: u64) {
        self.entries
            .retain(|_, e| now_ms < e.window_reset_ms || now_ms < e.blocked_until_ms);
    }

    /// Number of tracked sources.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32) -> RateLimiter {
        RateLimiter::new(limit, 60, vec![], vec![])
    }

    #[test]
    fn sixth_request_in_window_is_rejected() {
        let rl = limiter(5);
        for _ in 0..5 {
            assert!(rl.check("1.2.3.4", 1_000).is_ok());
        }
        assert_eq!(
            rl.check("1.2.3.4", 1_500),
            Err(RoutingError::RateLimited {
                source: "1.2.3.4".to_string()
            })
        );
    }

    #[test]
    fn fresh_window_resets_the_count() {
        let rl = limiter(2);
        assert!(rl.check("s", 1_000).is_ok());
        assert!(rl.check("s", 1_100).is_ok());
        // Window [1000, 2000) is full; a later request starts a new one.
        assert!(rl.check("s", 2_100).is_ok());
    }

    #[test]
    fn exceeding_source_stays_blocked_for_the_block_duration() {
        let rl = RateLimiter::new(1, 10, vec![], vec![]);
        assert!(rl.check("s", 1_000).is_ok());
        assert!(rl.check("s", 1_001).is_err()); // exceeds, blocked until 11_001

        // A fresh window alone does not unblock.
        assert!(rl.check("s", 5_000).is_err());
        assert!(rl.check("s", 11_001).is_ok());
    }

    #[test]
    fn whitelist_bypasses_entirely() {
        let rl = RateLimiter::new(1, 60, vec!["vip".to_string()], vec![]);
        for i in 0..100 {
            assert!(rl.check("vip", 1_000 + i).is_ok());
        }
        assert_eq!(rl.entry_count(), 0);
    }

    #[test]
    fn blacklist_always_rejects() {
        let rl = RateLimiter::new(100, 60, vec![], vec!["bad".to_string()]);
        assert!(rl.check("bad", 1_000).is_err());
        assert!(rl.check("bad", 999_999).is_err());
    }

    #[test]
    fn sources_are_limited_independently() {
        let rl = limiter(1);
        assert!(rl.check("a", 1_000).is_ok());
        assert!(rl.check("b", 1_000).is_ok());
        assert!(rl.check("a", 1_100).is_err());
        assert!(rl.check("b", 2_100).is_ok());
    }

    #[test]
    fn sweep_drops_lapsed_entries() {
        let rl = RateLimiter::new(1, 10, vec![], vec![]);
        rl.check("a", 1_000).unwrap();
        rl.check("b", 1_000).unwrap();
        let _ = rl.check("b", 1_001); // b gets blocked until 11_001
        assert_eq!(rl.entry_count(), 2);

        // a's window lapsed; b is still blocked.
        rl.sweep(5_000);
        assert_eq!(rl.entry_count(), 1);

        rl.sweep(11_001);
        assert_eq!(rl.entry_count(), 0);
    }
}
