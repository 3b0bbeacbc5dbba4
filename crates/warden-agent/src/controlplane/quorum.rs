//! Quorum store liveness probe.
//!
//! Logs how many quorum store endpoints accept connections. It is
//! informational only; the health decision never consults it.

use std::time::Duration;
use tokio::sync::broadcast;

use super::diagnostics::tcp_probe;

#[derive(Debug, Clone)]
pub struct QuorumProbe {
    endpoints: Vec<String>,
    timeout: Duration,
    interval: Duration,
}

impl QuorumProbe {
    pub fn new(endpoints: Vec<String>, timeout: Duration, interval: Duration) -> Self {
        Self {
            endpoints,
            timeout,
            interval,
        }
    }

    /// Probe every endpoint once. Returns how many answered.
    pub async fn probe_once(&self) -> usize {
        let mut reachable = 0;
        for endpoint in &self.endpoints {
            if tcp_probe(endpoint, self.timeout).await {
                reachable += 1;
            }
        }
        reachable
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            endpoints = ?self.endpoints,
            interval = ?self.interval,
            "Quorum probe started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let reachable = self.probe_once().await;
                    let total = self.endpoints.len();
                    if reachable * 2 > total {
                        tracing::debug!(reachable, total, "Quorum store reachable");
                    } else {
                        tracing::warn!(reachable, total, "Quorum store has no majority reachable");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Quorum probe shutting down");
                    break;
                }
            }
        }
    }
}
