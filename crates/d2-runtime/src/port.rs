//! Local port allocation.

use std::future::Future;
use std::time::Duration;

use d2_core::config::PortsConfig;
use d2_core::{D2Error, D2Result};
use tokio::net::TcpStream;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// Half-open port range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 8080,
            end: 65535,
        }
    }
}

impl From<&PortsConfig> for PortRange {
    fn from(config: &PortsConfig) -> Self {
        Self {
            start: config.start,
            end: config.end,
        }
    }
}

/// Whether something accepts TCP connections on `localhost:port`.
pub async fn port_in_use(port: u16) -> bool {
    matches!(
        tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

/// First port in `range` that refuses connections.
pub async fn get_free_port(range: PortRange) -> D2Result<u16> {
    scan_ports(range, port_in_use).await
}

/// Ascending scan returning the first port `in_use` reports free.
async fn scan_ports<F, Fut>(range: PortRange, mut in_use: F) -> D2Result<u16>
where
    F: FnMut(u16) -> Fut,
    Fut: Future<Output = bool>,
{
    for port in range.start..range.end {
        if !in_use(port).await {
            debug!(port, "free port");
            return Ok(port);
        }
    }
    Err(D2Error::NoFreePort {
        start: range.start,
        end: range.end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_scan_skips_used_ports_in_order() {
        let range = PortRange { start: 8080, end: 8090 };
        let mut probed = Vec::new();
        let port = scan_ports(range, |p| {
            probed.push(p);
            async move { p < 8083 }
        })
        .await
        .unwrap();
        assert_eq!(port, 8083);
        assert_eq!(probed, vec![8080, 8081, 8082, 8083]);
    }

    #[tokio::test]
    async fn test_scan_exhausted() {
        let range = PortRange { start: 8080, end: 8083 };
        let err = scan_ports(range, |_| async { true }).await.unwrap_err();
        assert!(matches!(err, D2Error::NoFreePort { start: 8080, end: 8083 }));
    }

    #[tokio::test]
    async fn test_empty_range() {
        let range = PortRange { start: 9000, end: 9000 };
        assert!(get_free_port(range).await.is_err());
    }

    #[tokio::test]
    async fn test_listening_port_is_never_returned() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let busy = listener.local_addr().unwrap().port();
        let Some(end) = busy.checked_add(20) else {
            return;
        };

        let err = get_free_port(PortRange { start: busy, end: busy + 1 }).await.unwrap_err();
        assert!(matches!(err, D2Error::NoFreePort { .. }));

        let port = get_free_port(PortRange { start: busy, end }).await.unwrap();
        assert_ne!(port, busy);
        assert!(port > busy && port < end);
    }
}
