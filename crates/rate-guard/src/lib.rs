//! Per-client admission budgets for the relay.
//!
//! Two independent [`RateLimiter`] instances gate the relay: one for new
//! connection attempts, one for per-message throughput, both keyed by the
//! resolved client address. The instances share nothing; exhausting the
//! message budget never affects the connection budget and vice versa.

pub mod limiter;

pub use limiter::RateLimiter;
