//! Application state and shared resources.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Instant;

use crate::config::AppConfig;
use crate::controlplane::ControlPlaneManager;
use crate::reboot::SafeTimeCalculator;
use crate::watchdog::WatchdogDriver;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,

    /// Redis connection manager (auto-reconnecting); absent when running
    /// against in-memory collaborators
    pub redis: Option<ConnectionManager>,

    /// Watchdog driver (agent mode only)
    pub watchdog: Option<WatchdogDriver>,

    /// Safe reboot time calculator
    pub calculator: Arc<SafeTimeCalculator>,

    /// Control-plane decision engine (agent mode only)
    pub control_plane: Option<Arc<ControlPlaneManager>>,

    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, calculator: Arc<SafeTimeCalculator>) -> Self {
        Self {
            config,
            redis: None,
            watchdog: None,
            calculator,
            control_plane: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_redis(mut self, redis: ConnectionManager) -> Self {
        self.redis = Some(redis);
        self
    }

    pub fn with_watchdog(mut self, watchdog: WatchdogDriver) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    pub fn with_control_plane(mut self, manager: Arc<ControlPlaneManager>) -> Self {
        self.control_plane = Some(manager);
        self
    }

    pub fn node_name(&self) -> &str {
        &self.config.node_name
    }
}

/// Connect to Redis with connection manager (handles reconnection)
pub async fn connect_redis(url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(url).context("Failed to create Redis client")?;

    ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")
}
