//! Local node diagnostics.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};
use warden_common::{Result, WardenError};

use crate::config::DiagnosticsConfig;

/// Probes a control-plane node runs on itself before trusting an
/// ambiguous peer verdict. Every probe is bounded by a deadline.
#[async_trait]
pub trait Diagnostics: Send + Sync {
    /// Whether the outside world is reachable right now
    async fn has_external_access(&self) -> bool;

    /// Whether the local workload runtime answers
    async fn is_runtime_endpoint_alive(&self) -> bool;

    /// Whether the local control-plane API accepts connections
    async fn is_api_endpoint_alive(&self) -> bool;
}

/// TCP and HTTPS probes against the addresses in [`DiagnosticsConfig`]
pub struct NetworkDiagnostics {
    external_addr: String,
    runtime_url: String,
    token_path: Option<PathBuf>,
    api_addr: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl NetworkDiagnostics {
    pub fn new(config: &DiagnosticsConfig, node_name: &str) -> Result<Self> {
        let timeout = Duration::from_millis(config.probe_timeout_ms);
        // The runtime endpoint serves a node-local self-signed certificate.
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .build()
            .map_err(|e| WardenError::Initialization(format!("http client: {e}")))?;

        Ok(Self {
            external_addr: config.external_probe_addr.clone(),
            runtime_url: config.runtime_endpoint_url.replace("{node}", node_name),
            token_path: config.runtime_token_path.as_ref().map(PathBuf::from),
            api_addr: config.api_endpoint_addr.clone(),
            timeout,
            http,
        })
    }

    pub fn runtime_url(&self) -> &str {
        &self.runtime_url
    }

    async fn bearer_token(&self) -> Option<String> {
        let path = self.token_path.as_ref()?;
        match tokio::fs::read_to_string(path).await {
            Ok(token) => Some(token.trim().to_string()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read runtime token");
                None
            }
        }
    }
}

#[async_trait]
impl Diagnostics for NetworkDiagnostics {
    async fn has_external_access(&self) -> bool {
        tcp_probe(&self.external_addr, self.timeout).await
    }

    async fn is_runtime_endpoint_alive(&self) -> bool {
        let mut request = self.http.get(&self.runtime_url);
        if let Some(token) = self.bearer_token().await {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            // any HTTP answer, error statuses included, means the runtime is up
            Ok(response) => {
                debug!(url = %self.runtime_url, status = %response.status(), "Runtime endpoint answered");
                true
            }
            Err(e) => {
                warn!(url = %self.runtime_url, error = %e, "Runtime endpoint unreachable");
                false
            }
        }
    }

    async fn is_api_endpoint_alive(&self) -> bool {
        tcp_probe(&self.api_addr, self.timeout).await
    }
}

/// Connect-only TCP probe
pub async fn tcp_probe(addr: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(addr = %addr, error = %e, "TCP probe failed");
            false
        }
        Err(_) => {
            debug!(addr = %addr, timeout_ms = timeout.as_millis() as u64, "TCP probe timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        assert!(tcp_probe(&addr, Duration::from_secs(1)).await);

        drop(listener);
        assert!(!tcp_probe(&addr, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_api_probe_uses_configured_addr() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = DiagnosticsConfig {
            api_endpoint_addr: listener.local_addr().unwrap().to_string(),
            probe_timeout_ms: 1000,
            ..Default::default()
        };

        let diag = NetworkDiagnostics::new(&config, "cp-0").unwrap();
        assert!(diag.is_api_endpoint_alive().await);
        assert_eq!(diag.runtime_url(), "https://cp-0:10250/pods");
    }

    #[tokio::test]
    async fn test_runtime_probe_accepts_error_status() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
        });

        let config = DiagnosticsConfig {
            runtime_endpoint_url: format!("http://127.0.0.1:{port}/pods"),
            probe_timeout_ms: 2000,
            ..Default::default()
        };
        let diag = NetworkDiagnostics::new(&config, "cp-0").unwrap();
        assert!(diag.is_runtime_endpoint_alive().await);
    }

    #[tokio::test]
    async fn test_runtime_probe_fails_when_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = DiagnosticsConfig {
            runtime_endpoint_url: format!("https://127.0.0.1:{port}/pods"),
            runtime_token_path: Some("/nonexistent/token".to_string()),
            probe_timeout_ms: 1000,
            ..Default::default()
        };
        let diag = NetworkDiagnostics::new(&config, "cp-0").unwrap();
        assert!(!diag.is_runtime_endpoint_alive().await);
    }
}
