//! Bounded readiness polling.
//!
//! A freshly started instance is polled until it gives any non-5xx answer.
//! Connection failures and 5xx answers are retried every `interval`, at most
//! `max_attempts` times.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use d2_core::{D2Error, D2Result, ReadinessConfig};
use tracing::{debug, info};

use crate::probe::{ProbeResult, http_probe};

/// Polling bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub interval: Duration,
    /// Deadline of a single probe.
    pub timeout: Duration,
    pub max_attempts: u32,
    pub path: String,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
            max_attempts: 360,
            path: "/".to_string(),
        }
    }
}

impl ReadinessPolicy {
    pub fn from_config(config: &ReadinessConfig) -> D2Result<Self> {
        Ok(Self {
            interval: config.interval()?,
            timeout: config.timeout()?,
            max_attempts: config.max_attempts,
            ..Self::default()
        })
    }
}

/// Poll `127.0.0.1:port` until ready or the attempts run out.
pub async fn wait_until_ready(port: u16, policy: &ReadinessPolicy) -> D2Result<()> {
    let address = format!("127.0.0.1:{port}");
    info!(port, "Waiting for instance to be ready");

    for attempt in 1..=policy.max_attempts {
        match http_probe(&address, &policy.path, policy.timeout).await {
            ProbeResult::Ready => {
                info!(port, attempt, "Instance ready");
                return Ok(());
            }
            other => debug!(port, attempt, result = ?other, "instance not ready"),
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(D2Error::Readiness {
        port,
        attempts: policy.max_attempts,
    })
}

/// Boxed future returned by [`ReadinessProbe::wait`].
pub type ReadyFuture<'a> = Pin<Box<dyn Future<Output = D2Result<()>> + Send + 'a>>;

/// Decides when a started instance is usable. Injected so orchestration can
/// be tested without HTTP.
pub trait ReadinessProbe: Send + Sync {
    fn wait(&self, port: u16) -> ReadyFuture<'_>;
}

/// [`ReadinessProbe`] backed by [`wait_until_ready`].
#[derive(Debug, Clone, Default)]
pub struct HttpReadiness {
    policy: ReadinessPolicy,
}

impl HttpReadiness {
    pub fn new(policy: ReadinessPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ReadinessPolicy {
        &self.policy
    }
}

impl ReadinessProbe for HttpReadiness {
    fn wait(&self, port: u16) -> ReadyFuture<'_> {
        Box::pin(wait_until_ready(port, &self.policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::{closed_port, serve};

    fn fast(max_attempts: u32) -> ReadinessPolicy {
        ReadinessPolicy {
            interval: Duration::from_millis(10),
            timeout: Duration::from_secs(2),
            max_attempts,
            ..ReadinessPolicy::default()
        }
    }

    fn port_of(address: &str) -> u16 {
        address.rsplit(':').next().unwrap().parse().unwrap()
    }

    #[tokio::test]
    async fn retries_server_errors_until_not_found() {
        let address = serve(vec![503, 502, 404]).await;
        wait_until_ready(port_of(&address), &fast(5)).await.unwrap();
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let address = serve(vec![503]).await;
        let err = wait_until_ready(port_of(&address), &fast(3)).await.unwrap_err();
        assert!(matches!(err, D2Error::Readiness { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn refused_connections_exhaust_attempts() {
        let port = closed_port().await;
        let err = HttpReadiness::new(fast(2)).wait(port).await.unwrap_err();
        assert!(matches!(err, D2Error::Readiness { attempts: 2, .. }));
    }

    #[test]
    fn policy_from_config() {
        let config = ReadinessConfig {
            interval: "500ms".to_string(),
            timeout: "3s".to_string(),
            max_attempts: 7,
        };
        let policy = ReadinessPolicy::from_config(&config).unwrap();
        assert_eq!(policy.interval, Duration::from_millis(500));
        assert_eq!(policy.timeout, Duration::from_secs(3));
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.path, "/");
    }
}
