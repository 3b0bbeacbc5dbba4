//! Configuration management for the Warden agent.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use warden_common::constants::{
    self, DEFAULT_CONFIG_NAME, DEFAULT_LISTEN_ADDR, DEFAULT_REDIS_URL, DEFAULT_WATCHDOG_PATH,
};
use warden_common::{ConfigSpec, WardenError};

use crate::reboot::SafetyConfiguration;

/// Which side of the safe time calculation this process runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Runs on the protected node and owns its watchdog
    #[default]
    Agent,
    /// Only reads the floor published by agents
    Observer,
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Name of this node in the roster
    #[serde(default)]
    pub node_name: String,

    #[serde(default)]
    pub mode: Mode,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Name of the shared safety configuration resource
    #[serde(default = "default_config_name")]
    pub config_name: String,

    #[serde(default)]
    pub watchdog: WatchdogConfig,

    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

/// Watchdog device settings
#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_watchdog_path")]
    pub device_path: String,

    /// Keep running without a watchdog timeout if the device can't be armed
    #[serde(default = "default_true")]
    pub software_reboot_enabled: bool,

    /// Use the in-process fake device instead of real hardware
    #[serde(default)]
    pub fake: bool,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            device_path: default_watchdog_path(),
            software_reboot_enabled: true,
            fake: false,
        }
    }
}

/// Inputs of the safe reboot time floor
#[derive(Debug, Clone, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_api_check_interval")]
    pub api_check_interval_ms: u64,

    #[serde(default = "default_api_server_timeout")]
    pub api_server_timeout_ms: u64,

    #[serde(default = "default_peer_dial_timeout")]
    pub peer_dial_timeout_ms: u64,

    #[serde(default = "default_peer_request_timeout")]
    pub peer_request_timeout_ms: u64,

    #[serde(default = "default_max_api_error_threshold")]
    pub max_api_error_threshold: u32,

    /// Operator-chosen wait before assuming a node rebooted
    #[serde(default = "default_safe_time")]
    pub safe_time_to_assume_node_rebooted_secs: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            api_check_interval_ms: default_api_check_interval(),
            api_server_timeout_ms: default_api_server_timeout(),
            peer_dial_timeout_ms: default_peer_dial_timeout(),
            peer_request_timeout_ms: default_peer_request_timeout(),
            max_api_error_threshold: default_max_api_error_threshold(),
            safe_time_to_assume_node_rebooted_secs: default_safe_time(),
        }
    }
}

/// Local diagnostics used for control-plane nodes
#[derive(Debug, Clone, Deserialize)]
pub struct DiagnosticsConfig {
    /// External address probed over TCP
    #[serde(default = "default_external_probe_addr")]
    pub external_probe_addr: String,

    /// Node workload runtime endpoint; `{node}` is replaced by the node name
    #[serde(default = "default_runtime_endpoint_url")]
    pub runtime_endpoint_url: String,

    /// Bearer token for the runtime endpoint
    #[serde(default)]
    pub runtime_token_path: Option<String>,

    /// Local control-plane API endpoint probed over TCP
    #[serde(default = "default_api_endpoint_addr")]
    pub api_endpoint_addr: String,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Periodic quorum store liveness logging. Never used for decisions.
    #[serde(default)]
    pub quorum_probe_enabled: bool,

    #[serde(default)]
    pub quorum_endpoints: Vec<String>,

    #[serde(default = "default_quorum_interval")]
    pub quorum_probe_interval_secs: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            external_probe_addr: default_external_probe_addr(),
            runtime_endpoint_url: default_runtime_endpoint_url(),
            runtime_token_path: None,
            api_endpoint_addr: default_api_endpoint_addr(),
            probe_timeout_ms: default_probe_timeout(),
            quorum_probe_enabled: false,
            quorum_endpoints: Vec::new(),
            quorum_probe_interval_secs: default_quorum_interval(),
        }
    }
}

/// Shared store settings
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Deadline for every Redis round trip
    #[serde(default = "default_store_timeout")]
    pub request_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_store_timeout(),
        }
    }
}

/// Values from the command line that win over the file and environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub node_name: Option<String>,
    pub mode: Option<Mode>,
    pub redis_url: Option<String>,
    pub listen_addr: Option<String>,
    pub fake_watchdog: bool,
}

// Default value functions
fn default_redis_url() -> String { DEFAULT_REDIS_URL.to_string() }
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_config_name() -> String { DEFAULT_CONFIG_NAME.to_string() }
fn default_watchdog_path() -> String { DEFAULT_WATCHDOG_PATH.to_string() }
fn default_true() -> bool { true }
fn default_api_check_interval() -> u64 { constants::DEFAULT_API_CHECK_INTERVAL_MS }
fn default_api_server_timeout() -> u64 { constants::DEFAULT_API_SERVER_TIMEOUT_MS }
fn default_peer_dial_timeout() -> u64 { constants::DEFAULT_PEER_DIAL_TIMEOUT_MS }
fn default_peer_request_timeout() -> u64 { constants::DEFAULT_PEER_REQUEST_TIMEOUT_MS }
fn default_max_api_error_threshold() -> u32 { constants::DEFAULT_MAX_API_ERROR_THRESHOLD }
fn default_safe_time() -> u64 { constants::DEFAULT_SAFE_TIME_TO_ASSUME_NODE_REBOOTED_SECS }
fn default_external_probe_addr() -> String { constants::DEFAULT_EXTERNAL_PROBE_ADDR.to_string() }
fn default_runtime_endpoint_url() -> String { format!("https://{{node}}:{}/pods", constants::RUNTIME_ENDPOINT_PORT) }
fn default_api_endpoint_addr() -> String { constants::DEFAULT_API_ENDPOINT_ADDR.to_string() }
fn default_probe_timeout() -> u64 { constants::DEFAULT_PROBE_TIMEOUT_MS }
fn default_quorum_interval() -> u64 { 5 }
fn default_store_timeout() -> u64 { constants::DEFAULT_STORE_TIMEOUT_MS }

impl AppConfig {
    /// Load configuration from file and `WARDEN_*` environment variables,
    /// with CLI overrides applied last
    pub fn load(config_path: &str, overrides: &ConfigOverrides) -> Result<Self> {
        if !Path::new(config_path).exists() {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
        }

        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(config::Environment::with_prefix("WARDEN").separator("__"))
            .build()
            .context("Failed to load config file")?;

        let mut config: Self = settings
            .try_deserialize()
            .context("Failed to parse config")?;

        config.apply(overrides);
        Ok(config)
    }

    /// Apply CLI overrides
    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref node_name) = overrides.node_name {
            self.node_name = node_name.clone();
        }
        if let Some(mode) = overrides.mode {
            self.mode = mode;
        }
        if let Some(ref redis_url) = overrides.redis_url {
            self.redis_url = redis_url.clone();
        }
        if let Some(ref listen) = overrides.listen_addr {
            self.listen_addr = listen.clone();
        }
        if overrides.fake_watchdog {
            self.watchdog.fake = true;
        }
    }

    /// Reject settings the floor computation or the probes can't work with
    pub fn validate(&self) -> warden_common::Result<()> {
        if self.node_name.trim().is_empty() {
            return Err(WardenError::Config("node_name must be set".to_string()));
        }
        if self.config_name.trim().is_empty() {
            return Err(WardenError::Config("config_name must be set".to_string()));
        }

        let durations = [
            ("safety.api_check_interval_ms", self.safety.api_check_interval_ms),
            ("safety.api_server_timeout_ms", self.safety.api_server_timeout_ms),
            ("safety.peer_dial_timeout_ms", self.safety.peer_dial_timeout_ms),
            ("safety.peer_request_timeout_ms", self.safety.peer_request_timeout_ms),
            ("diagnostics.probe_timeout_ms", self.diagnostics.probe_timeout_ms),
            ("diagnostics.quorum_probe_interval_secs", self.diagnostics.quorum_probe_interval_secs),
            ("store.request_timeout_ms", self.store.request_timeout_ms),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, value)| *value == 0) {
            return Err(WardenError::Config(format!("{name} must be greater than zero")));
        }

        if self.safety.max_api_error_threshold == 0 {
            return Err(WardenError::Config(
                "safety.max_api_error_threshold must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Resource spec seeded into the store when none exists yet
    pub fn default_spec(&self) -> ConfigSpec {
        ConfigSpec {
            safe_time_to_assume_node_rebooted_seconds: self
                .safety
                .safe_time_to_assume_node_rebooted_secs,
            watchdog_file_path: self.watchdog.device_path.clone(),
            is_software_reboot_enabled: self.watchdog.software_reboot_enabled,
            api_check_interval_ms: self.safety.api_check_interval_ms,
            api_server_timeout_ms: self.safety.api_server_timeout_ms,
            peer_dial_timeout_ms: self.safety.peer_dial_timeout_ms,
            peer_request_timeout_ms: self.safety.peer_request_timeout_ms,
            max_api_error_threshold: self.safety.max_api_error_threshold,
        }
    }

    pub fn safety_configuration(&self, watchdog_timeout: Duration) -> SafetyConfiguration {
        SafetyConfiguration::from_spec(&self.default_spec(), watchdog_timeout)
    }

    pub fn configured_safe_time(&self) -> Duration {
        Duration::from_secs(self.safety.safe_time_to_assume_node_rebooted_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store.request_timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            mode: Mode::default(),
            redis_url: default_redis_url(),
            listen_addr: default_listen_addr(),
            config_name: default_config_name(),
            watchdog: WatchdogConfig::default(),
            safety: SafetyConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            store: StoreConfig::default(),
        }
    }
}
