//! Port reachability probing

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::config::ServiceAddress;
use crate::error::HarnessResult;

/// Answers "is something already listening on this address?".
///
/// Implementations must not fail: every error collapses to `false`.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn is_reachable(&self, address: &ServiceAddress) -> bool;
}

/// Single TCP connect attempt bounded by a short timeout
#[derive(Debug, Clone)]
pub struct TcpProber {
    connect_timeout: Duration,
}

impl TcpProber {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpProber {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn is_reachable(&self, address: &ServiceAddress) -> bool {
        let connect = TcpStream::connect((address.host.as_str(), address.port));
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => {
                drop(stream);
                trace!("{} accepted connection", address);
                true
            }
            Ok(Err(e)) => {
                trace!("{} not reachable: {}", address, e);
                false
            }
            Err(_) => {
                trace!("{} connect timed out", address);
                false
            }
        }
    }
}

/// Readiness via an HTTP health endpoint; only a 2xx response counts
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    health_url: String,
}

impl HttpProber {
    pub fn new(health_url: impl Into<String>, request_timeout: Duration) -> HarnessResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            health_url: health_url.into(),
        })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn is_reachable(&self, _address: &ServiceAddress) -> bool {
        match self.client.get(&self.health_url).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                debug!("Health check returned {}", resp.status());
                false
            }
            Err(e) => {
                // Connection refused is expected while the service is starting
                if !e.is_connect() {
                    debug!("Health check error: {}", e);
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn test_tcp_reachable_when_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let prober = TcpProber::default();
        assert!(prober.is_reachable(&ServiceAddress::new("127.0.0.1", port)).await);
    }

    #[tokio::test]
    async fn test_tcp_unreachable_when_closed() {
        let port = closed_port().await;
        let prober = TcpProber::default();
        assert!(!prober.is_reachable(&ServiceAddress::new("127.0.0.1", port)).await);
    }

    #[tokio::test]
    async fn test_tcp_unresolvable_host_is_false() {
        let prober = TcpProber::new(Duration::from_millis(200));
        let address = ServiceAddress::new("does-not-exist.invalid", 80);
        assert!(!prober.is_reachable(&address).await);
    }

    #[tokio::test]
    async fn test_http_prober_requires_success_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let statuses = ["503 Service Unavailable", "200 OK"];
            for status in statuses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    status
                );
                socket.write_all(response.as_bytes()).await.unwrap();
            }
        });

        let prober = HttpProber::new(
            format!("http://127.0.0.1:{}/health", port),
            Duration::from_secs(2),
        )
        .unwrap();
        let address = ServiceAddress::new("127.0.0.1", port);

        assert!(!prober.is_reachable(&address).await);
        assert!(prober.is_reachable(&address).await);
    }

    #[tokio::test]
    async fn test_http_prober_refused_is_false() {
        let port = closed_port().await;
        let prober = HttpProber::new(
            format!("http://127.0.0.1:{}/", port),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(!prober.is_reachable(&ServiceAddress::new("127.0.0.1", port)).await);
    }
}
