// # garaged - Garage Alert Daemon
//
// Thin integration layer: all alert logic lives in garage-core, all HTTP and
// websocket handling lives in garage-relay.
//
// The garaged daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing the runtime and logging
// 3. Loading the in-memory entity store and the standalone leadership gate
// 4. Starting the controller, the relay server and the periodic broadcast
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Controller
// - `GARAGE_APP_NAME`: Application identity written with every alert (default: garage)
// - `ALERTS`: Enabled alert channels; checked for the substrings `TTS` and `EMAIL`
// - `TICK_RATE_MS`: Reminder tick period in milliseconds (default: 100)
//
// ### Store
// - `GARAGE_STORE_SEED`: JSON file with the initial entities (optional)
//
// ### Relay
// - `GARAGE_HTTP_ADDR`: Listen address (default: 0.0.0.0:20000)
// - `GARAGE_STATIC_DIR`: Directory served under /static (optional)
// - `GARAGE_BROADCAST_SECS`: Seconds between snapshot broadcasts (default: 1)
//
// ### Logging
// - `GARAGE_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// ## Example
//
// ```bash
// export ALERTS=TTS,EMAIL
// export GARAGE_STORE_SEED=/etc/garage/entities.json
// export GARAGE_STATIC_DIR=/usr/share/garage/static
//
// garaged
// ```

use anyhow::{Context, Result};
use garage_core::schema::Schema;
use garage_core::store::MemoryEntityStore;
use garage_core::{AlertChannels, Controller, ControllerConfig, ControllerEvent, StandaloneLeadership};
use garage_relay::{RelayState, create_router};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum GarageExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<GarageExitCode> for ExitCode {
    fn from(code: GarageExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// How long the controller gets to release its subscriptions on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Application configuration
struct Config {
    app_name: String,
    alerts: String,
    tick_rate_ms: u64,
    http_addr: String,
    static_dir: Option<PathBuf>,
    store_seed: Option<PathBuf>,
    broadcast_secs: u64,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            app_name: env::var("GARAGE_APP_NAME").unwrap_or_else(|_| "garage".to_string()),
            alerts: env::var("ALERTS").unwrap_or_default(),
            tick_rate_ms: parse_var("TICK_RATE_MS", garage_core::config::DEFAULT_TICK_RATE_MS)?,
            http_addr: env::var("GARAGE_HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:20000".to_string()),
            static_dir: env::var("GARAGE_STATIC_DIR").ok().map(PathBuf::from),
            store_seed: env::var("GARAGE_STORE_SEED").ok().map(PathBuf::from),
            broadcast_secs: parse_var("GARAGE_BROADCAST_SECS", 1)?,
            log_level: env::var("GARAGE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.app_name.trim().is_empty() {
            anyhow::bail!("GARAGE_APP_NAME cannot be empty");
        }

        if !(10..=60_000).contains(&self.tick_rate_ms) {
            anyhow::bail!(
                "TICK_RATE_MS must be between 10 and 60000 milliseconds. Got: {}",
                self.tick_rate_ms
            );
        }

        if !(1..=3600).contains(&self.broadcast_secs) {
            anyhow::bail!(
                "GARAGE_BROADCAST_SECS must be between 1 and 3600 seconds. Got: {}",
                self.broadcast_secs
            );
        }

        if self.http_addr.parse::<SocketAddr>().is_err() {
            anyhow::bail!(
                "GARAGE_HTTP_ADDR '{}' is not a valid socket address (e.g. 0.0.0.0:20000)",
                self.http_addr
            );
        }

        if let Some(ref dir) = self.static_dir
            && !dir.is_dir()
        {
            anyhow::bail!("GARAGE_STATIC_DIR is not a directory: {}", dir.display());
        }

        if let Some(ref seed) = self.store_seed
            && !seed.is_file()
        {
            anyhow::bail!("GARAGE_STORE_SEED does not exist: {}", seed.display());
        }

        let alerts = AlertChannels::from_alerts(&self.alerts);
        if !alerts.tts && !alerts.email {
            eprintln!(
                "WARNING: ALERTS enables neither TTS nor EMAIL. \
                 Alerts will be written with both channels off."
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "GARAGE_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig::new(self.app_name.clone())
            .with_alerts(AlertChannels::from_alerts(&self.alerts))
            .with_tick_rate_ms(self.tick_rate_ms)
    }
}

/// Parse a numeric variable, falling back to `default` when unset
fn parse_var(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a non-negative integer. Got: '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return GarageExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return GarageExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return GarageExitCode::ConfigError.into();
    }

    info!("Starting garaged daemon");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return GarageExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        match run_daemon(config).await {
            Ok(()) => GarageExitCode::CleanShutdown,
            Err(DaemonError::Startup(e)) => {
                error!("Startup error: {:#}", e);
                GarageExitCode::ConfigError
            }
            Err(DaemonError::Runtime(e)) => {
                error!("Daemon error: {:#}", e);
                GarageExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Distinguishes failures before the daemon is serving from failures after
enum DaemonError {
    Startup(anyhow::Error),
    Runtime(anyhow::Error),
}

/// Run the daemon
async fn run_daemon(config: Config) -> std::result::Result<(), DaemonError> {
    let store = Arc::new(match &config.store_seed {
        Some(path) => MemoryEntityStore::from_seed_file(path)
            .await
            .with_context(|| format!("Failed to load store seed {}", path.display()))
            .map_err(DaemonError::Startup)?,
        None => {
            warn!("GARAGE_STORE_SEED not set, starting with an empty store");
            MemoryEntityStore::new()
        }
    });

    let leadership = Arc::new(StandaloneLeadership::new());
    gate_on_schema(&store, &leadership).await;

    let (controller, events) = Controller::new(
        store.clone(),
        store.clone(),
        Box::new(Arc::clone(&leadership)),
        config.controller_config(),
    )
    .context("Failed to create controller")
    .map_err(DaemonError::Startup)?;
    let controller = Arc::new(controller);

    // HTTP bind failure is fatal
    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.http_addr))
        .map_err(DaemonError::Startup)?;

    let relay = Arc::new(RelayState::new());
    let router = create_router(Arc::clone(&relay), config.static_dir.as_deref());
    let (relay_stop_tx, relay_stop_rx) = oneshot::channel::<()>();
    let relay_handle = tokio::spawn(garage_relay::serve(listener, router, async move {
        let _ = relay_stop_rx.await;
    }));

    let broadcast_handle = tokio::spawn(broadcast_loop(
        Arc::clone(&relay),
        Duration::from_secs(config.broadcast_secs),
    ));
    let events_handle = tokio::spawn(log_events(events));

    let (controller_stop_tx, controller_stop_rx) = oneshot::channel();
    let running = Arc::clone(&controller);
    let mut controller_handle =
        tokio::spawn(async move { running.run_with_shutdown(Some(controller_stop_rx)).await });

    leadership.on_database_connected();
    info!(
        addr = %config.http_addr,
        leader = leadership.is_leader(),
        "Daemon initialized"
    );

    let outcome = tokio::select! {
        signal = wait_for_shutdown() => {
            match signal {
                Ok(name) => info!("Received shutdown signal: {}", name),
                Err(e) => error!("Shutdown signal error: {:#}", e),
            }
            let _ = controller_stop_tx.send(());
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut controller_handle).await {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(e))) => Err(DaemonError::Runtime(e.into())),
                Ok(Err(e)) => Err(DaemonError::Runtime(e.into())),
                Err(_) => {
                    controller_handle.abort();
                    Err(DaemonError::Runtime(anyhow::anyhow!(
                        "Controller did not stop within {:?}",
                        SHUTDOWN_GRACE
                    )))
                }
            }
        }
        result = &mut controller_handle => {
            let error = match result {
                Ok(Ok(())) => anyhow::anyhow!("Controller stopped unexpectedly"),
                Ok(Err(e)) => e.into(),
                Err(e) => e.into(),
            };
            Err(DaemonError::Runtime(error))
        }
    };

    leadership.on_database_disconnected();
    broadcast_handle.abort();
    events_handle.abort();
    let _ = relay_stop_tx.send(());
    match relay_handle.await {
        Ok(Ok(())) => debug!("Relay stopped"),
        Ok(Err(e)) => warn!("Relay stopped with error: {}", e),
        Err(e) => warn!("Relay task failed: {}", e),
    }

    info!("Shutting down daemon");
    outcome
}

/// Withhold leadership unless the store carries the garage schema
///
/// Checked once at startup: the seed is the only source of entities, and the
/// controller's own alert writes never remove fields.
async fn gate_on_schema(store: &MemoryEntityStore, leadership: &StandaloneLeadership) -> bool {
    let missing = Schema::garage().missing_fields(&store.snapshot().await);
    for (entity, field) in &missing {
        warn!(entity = %entity, field = %field, "Schema field missing, leadership withheld");
    }
    let valid = missing.is_empty();
    leadership.add_availability_criteria(Box::new(move || valid));
    valid
}

/// Push a time snapshot to every websocket client on a fixed period
async fn broadcast_loop(relay: Arc<RelayState>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        match relay.broadcast_snapshot().await {
            Ok(0) => {}
            Ok(pruned) => debug!(pruned, "Pruned dead clients"),
            Err(e) => warn!("Snapshot broadcast failed: {}", e),
        }
    }
}

/// Log every controller event
async fn log_events(mut events: mpsc::Receiver<ControllerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ControllerEvent::DispatchFailed { .. } | ControllerEvent::RebindFailed { .. } => {
                warn!(?event, "Controller event")
            }
            _ => info!(?event, "Controller event"),
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
