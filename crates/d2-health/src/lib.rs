//! d2-health: readiness checking for freshly started instances.
//!
//! ```text
//! wait_until_ready(port, policy)
//!   └── http_probe() → ProbeResult
//!         Ready      any response < 500 (404 included)
//!         Booting    5xx, retried after `interval`
//!         Failed     no response, retried after `interval`
//! ```
//!
//! Polling is bounded by `max_attempts`; running out is a readiness error.

pub mod probe;
pub mod readiness;

#[cfg(test)]
mod test_server;

pub use probe::{ProbeResult, http_probe};
pub use readiness::{HttpReadiness, ReadinessPolicy, ReadinessProbe, ReadyFuture, wait_until_ready};
