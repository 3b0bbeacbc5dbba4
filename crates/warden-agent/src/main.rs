//! # Warden Agent
//!
//! Arms the node watchdog, publishes the safe reboot time, and decides
//! control-plane health.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use warden_agent::cluster::{
    ConfigStore, EventRecorder, NodeRoster, RedisConfigStore, RedisEventRecorder, RedisNodeRoster,
};
use warden_agent::config::{AppConfig, ConfigOverrides, Mode, WatchdogConfig};
use warden_agent::controlplane::{ControlPlaneManager, NetworkDiagnostics, QuorumProbe};
use warden_agent::reboot::SafeTimeCalculator;
use warden_agent::routes;
use warden_agent::state::{self, AppState};
use warden_agent::watchdog::{FakeWatchdog, LinuxWatchdog, WatchdogDevice, WatchdogDriver};
use warden_common::{NodeRecord, SafetyConfigResource};

/// Pause between attempts to compute and publish the safe time
const CALCULATOR_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Warden Agent - node self-fencing
#[derive(Parser, Debug)]
#[command(name = "warden-agent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/warden.toml")]
    config: String,

    /// Name of this node (overrides config)
    #[arg(long, env = "NODE_NAME")]
    node_name: Option<String>,

    /// Run as agent or observer (overrides config)
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Redis URL (overrides config)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Use the fake watchdog device
    #[arg(long, default_value = "false")]
    fake_watchdog: bool,

    /// Register this node in the roster with this role label
    #[arg(long)]
    role_label: Option<String>,

    /// Disarm the watchdog on Ctrl-C instead of leaving it armed
    #[arg(long, default_value = "false")]
    disarm_on_shutdown: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            node_name: self.node_name.clone(),
            mode: self.mode,
            redis_url: self.redis_url.clone(),
            listen_addr: self.listen.clone(),
            fake_watchdog: self.fake_watchdog,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env before clap so env fallbacks see it
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs)?;

    info!("🛡️ Starting Warden agent v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(&args.config, &args.overrides())?;
    config.validate().context("Invalid configuration")?;
    info!(
        node = %config.node_name,
        mode = ?config.mode,
        "📋 Configuration loaded from {}",
        args.config
    );

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let redis = state::connect_redis(&config.redis_url).await?;
    info!("✅ Redis connected: {}", config.redis_url);

    let store_timeout = config.store_timeout();
    let store: Arc<dyn ConfigStore> = Arc::new(RedisConfigStore::new(redis.clone(), store_timeout));
    let roster = Arc::new(RedisNodeRoster::new(redis.clone(), store_timeout));
    let events: Arc<dyn EventRecorder> =
        Arc::new(RedisEventRecorder::new(redis.clone(), store_timeout));

    let seed = SafetyConfigResource {
        spec: config.default_spec(),
        ..SafetyConfigResource::default_named(config.config_name.clone())
    };
    if store
        .create(seed)
        .await
        .context("Failed to seed safety configuration")?
    {
        info!(config = %config.config_name, "Created default safety configuration");
    }

    if let Some(ref label) = args.role_label {
        let record = NodeRecord::new(config.node_name.clone()).with_label(label.clone(), "");
        roster
            .register(&record)
            .await
            .context("Failed to register node in roster")?;
        info!(node = %config.node_name, label = %label, "Registered node in roster");
    }

    let (app_state, watchdog) = match config.mode {
        Mode::Agent => {
            let driver = WatchdogDriver::new(build_device(&config.watchdog));
            let watchdog_timeout = match driver.start() {
                Ok(timeout) => timeout,
                Err(e) if config.watchdog.software_reboot_enabled => {
                    warn!(error = %e, "Watchdog unavailable, relying on software reboot");
                    Duration::ZERO
                }
                Err(e) => {
                    error!(error = %e, "Watchdog unavailable and software reboot disabled");
                    Duration::ZERO
                }
            };

            let calculator = Arc::new(SafeTimeCalculator::agent(
                config.config_name.clone(),
                config.safety_configuration(watchdog_timeout),
                config.configured_safe_time(),
                store.clone(),
                roster.clone(),
                events,
            ));
            spawn_calculator(calculator.clone(), shutdown_tx.subscribe());

            let diagnostics = Arc::new(NetworkDiagnostics::new(&config.diagnostics, &config.node_name)?);
            let manager = ControlPlaneManager::initialize(
                config.node_name.clone(),
                roster.as_ref() as &dyn NodeRoster,
                diagnostics,
            )
            .await
            .context("Failed to initialize control-plane manager")?;

            let app_state = AppState::new(config.clone(), calculator)
                .with_watchdog(driver.clone())
                .with_control_plane(Arc::new(manager));
            (app_state, Some(driver))
        }
        Mode::Observer => {
            let calculator = Arc::new(SafeTimeCalculator::observer(
                config.config_name.clone(),
                store.clone(),
            ));
            spawn_calculator(calculator.clone(), shutdown_tx.subscribe());
            (AppState::new(config.clone(), calculator), None)
        }
    };
    let app_state = app_state.with_redis(redis);

    if config.diagnostics.quorum_probe_enabled {
        let probe = QuorumProbe::new(
            config.diagnostics.quorum_endpoints.clone(),
            Duration::from_millis(config.diagnostics.probe_timeout_ms),
            Duration::from_secs(config.diagnostics.quorum_probe_interval_secs),
        );
        tokio::spawn(probe.run(shutdown_tx.subscribe()));
    }

    // Build router
    let app = routes::create_router(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("🚀 Warden agent listening on {}", config.listen_addr);

    // Handle graceful shutdown
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
        info!("🛑 Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    if let Some(driver) = watchdog {
        if args.disarm_on_shutdown {
            driver.disarm().context("Failed to disarm watchdog")?;
        } else {
            warn!("Watchdog left armed; the node reboots unless the agent restarts in time");
        }
    }

    info!("👋 Warden agent shutdown complete");
    Ok(())
}

fn build_device(config: &WatchdogConfig) -> Box<dyn WatchdogDevice> {
    if config.fake {
        warn!("Using fake watchdog, this node will not be fenced");
        Box::new(FakeWatchdog::new(true))
    } else {
        Box::new(LinuxWatchdog::new(&config.device_path))
    }
}

fn spawn_calculator(
    calculator: Arc<SafeTimeCalculator>,
    shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        calculator
            .start_with_retry(CALCULATOR_RETRY_BACKOFF, shutdown)
            .await;
    });
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
