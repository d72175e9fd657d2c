//! Single HTTP readiness probe.

use std::time::Duration;

use tracing::debug;

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The server answered with anything below 500, 404 included.
    Ready,
    /// The server answered 5xx: it is up but still booting.
    Booting(u16),
    /// No HTTP response (connection refused, reset, timeout).
    Failed,
}

impl ProbeResult {
    pub fn is_ready(self) -> bool {
        matches!(self, ProbeResult::Ready)
    }

    fn from_status(status: http::StatusCode) -> Self {
        if status.is_server_error() {
            ProbeResult::Booting(status.as_u16())
        } else {
            ProbeResult::Ready
        }
    }
}

/// `GET http://{address}{path}` with a deadline covering connect and response.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeResult {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "probe connection failed");
                return ProbeResult::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "probe handshake failed");
                return ProbeResult::Failed;
            }
        };

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", concat!("d2-docker/", env!("CARGO_PKG_VERSION")))
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "invalid probe request");
                return ProbeResult::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) => {
                let result = ProbeResult::from_status(resp.status());
                debug!(status = %resp.status(), %uri, ready = result.is_ready(), "probe response");
                result
            }
            Err(e) => {
                debug!(error = %e, %uri, "probe request failed");
                ProbeResult::Failed
            }
        }
    })
    .await;

    match result {
        Ok(probe) => probe,
        Err(_) => {
            debug!(%uri, "probe timed out");
            ProbeResult::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::{closed_port, serve};

    #[test]
    fn status_classification() {
        assert_eq!(ProbeResult::from_status(http::StatusCode::OK), ProbeResult::Ready);
        assert_eq!(ProbeResult::from_status(http::StatusCode::FOUND), ProbeResult::Ready);
        assert_eq!(ProbeResult::from_status(http::StatusCode::NOT_FOUND), ProbeResult::Ready);
        assert_eq!(
            ProbeResult::from_status(http::StatusCode::BAD_GATEWAY),
            ProbeResult::Booting(502)
        );
    }

    #[tokio::test]
    async fn not_found_counts_as_ready() {
        let address = serve(vec![404]).await;
        let result = http_probe(&address, "/", Duration::from_secs(2)).await;
        assert_eq!(result, ProbeResult::Ready);
    }

    #[tokio::test]
    async fn server_error_is_booting() {
        let address = serve(vec![503]).await;
        let result = http_probe(&address, "/", Duration::from_secs(2)).await;
        assert_eq!(result, ProbeResult::Booting(503));
    }

    #[tokio::test]
    async fn refused_connection_fails() {
        let address = format!("127.0.0.1:{}", closed_port().await);
        let result = http_probe(&address, "/", Duration::from_secs(2)).await;
        assert_eq!(result, ProbeResult::Failed);
    }
}
