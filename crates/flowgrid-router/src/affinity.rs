//! Session affinity store.
//!
//! Maps a session id to the backend it was first routed to. The TTL is
//! set once at creation and never refreshed on access; entries die only
//! by expiry (lazy check on read plus a periodic sweep). Whether the
//! referenced backend is still healthy is the router's call — an entry
//! pointing at an unhealthy backend is ignored, not deleted.

use dashmap::DashMap;

use flowgrid_core::{BackendId, SessionId};

#[derive(Debug, Clone)]
struct AffinityEntry {
    backend_id: BackendId,
    expires_at_ms: u64,
}

/// Sticky session → backend mapping with set-once TTLs.
pub struct AffinityStore {
    entries: DashMap<SessionId, AffinityEntry>,
}

impl AffinityStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Look up the live entry for a session. An expired entry is removed
    /// and `None` returned.
    pub fn lookup(&self, session: &str, now_ms: u64) -> Option<BackendId> {
        let expired = match self.entries.get(session) {
            Some(entry) if now_ms < entry.expires_at_ms => {
                return Some(entry.backend_id.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(session);
        }
        None
    }

    /// Record an affinity entry unless a live one already exists. The TTL
    /// is fixed at creation.
    pub fn record(&self, session: &str, backend_id: &str, now_ms: u64, ttl_secs: u64) {
        let mut entry = self
            .entries
            .entry(session.to_string())
            .or_insert_with(|| AffinityEntry {
                backend_id: backend_id.to_string(),
                expires_at_ms: now_ms + ttl_secs * 1_000,
            });
        // Replace only if the existing entry has expired.
        if now_ms >= entry.expires_at_ms {
            entry.backend_id = backend_id.to_string();
            entry.expires_at_ms = now_ms + ttl_secs * 1_000;
        }
    }

    /// Drop expired entries.
    pub fn sweep(&self, now_ms: u64) {
        self.entries.retain(|_, e| now_ms < e.expires_at_ms);
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

impl Default for AffinityStore {
    fn default() -> Self {
        Self::new()
    }
}
