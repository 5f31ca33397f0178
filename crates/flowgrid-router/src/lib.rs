//! flowgrid-router — the request-routing path.
//!
//! A `route()` call runs three checks in order: rate limit, session
//! affinity, then the configured selection algorithm over the healthy
//! backend set. This is the latency-sensitive path of the core; all
//! shared state is keyed per source/session/backend and never blocks
//! on the scaling loop.

pub mod affinity;
pub mod algorithms;
pub mod rate_limit;
pub mod router;

pub use affinity::AffinityStore;
pub use rate_limit::RateLimiter;
pub use router::{Router, RouterStats};
