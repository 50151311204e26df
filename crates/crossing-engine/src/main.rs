//! Engine binary for the Crossing traffic-phase controller.
//!
//! Wires the phase controller, the scheduler loops, and the protocol
//! server together and runs until Ctrl-C or `SIGTERM`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `crossing-config.yaml` (or `$CROSSING_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Create the controller in `GROUP1_GREEN` and an empty session registry
//! 4. Start the phase-advance, broadcast, and idle-cleanup loops
//! 5. Bind the listener and start accepting clients
//! 6. Wait for a shutdown signal, then stop every task

mod error;

use std::path::PathBuf;
use std::sync::Arc;

use crossing_core::config::{CrossingConfig, LoggingConfig};
use crossing_server::scheduler::spawn_scheduler;
use crossing_server::startup::spawn_server;
use crossing_server::state::AppState;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Config file read when `CROSSING_CONFIG` is unset.
const DEFAULT_CONFIG_PATH: &str = "crossing-config.yaml";

/// Environment variable naming an alternative config file.
const CONFIG_PATH_ENV: &str = "CROSSING_CONFIG";

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the listener
/// cannot be bound.
#[tokio::main]
async fn main() -> Result<(), EngineError> {
    // 1. Load configuration. Logging depends on it, so it comes first.
    let (config, source) = load_config()?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!("crossing-engine starting");
    info!(
        source = %source,
        min_green_secs = config.timing.min_green_secs,
        max_green_secs = config.timing.max_green_secs,
        yellow_secs = config.timing.yellow_secs,
        max_sessions = config.server.max_sessions,
        "Configuration loaded"
    );

    // 3. Shared state.
    let state = Arc::new(AppState::new(&config));
    let (shutdown, _) = broadcast::channel(1);

    // 4. Scheduler loops.
    let scheduler = spawn_scheduler(&state, config.scheduler, &shutdown);

    // 5. Protocol server.
    let (addr, server) =
        spawn_server(&config.server, Arc::clone(&state), shutdown.subscribe()).await?;
    info!(%addr, "Crossing controller ready");

    // 6. Run until asked to stop.
    wait_for_shutdown_signal().await;
    if shutdown.send(()).is_err() {
        warn!("No task was listening for shutdown");
    }
    scheduler.join().await;
    if let Err(e) = server.await {
        warn!(error = %e, "Server task ended abnormally");
    }

    info!("crossing-engine stopped");
    Ok(())
}

/// Load, override from the environment, and validate the configuration.
///
/// Falls back to defaults when the file does not exist. Returns the
/// config together with a description of where it came from.
fn load_config() -> Result<(CrossingConfig, String), EngineError> {
    let path = std::env::var_os(CONFIG_PATH_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);

    let (config, source) = if path.exists() {
        (CrossingConfig::from_file(&path)?, path.display().to_string())
    } else {
        let mut config = CrossingConfig::default();
        config.apply_env_overrides();
        (config, String::from("defaults"))
    };

    config.validate()?;
    Ok((config, source))
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Resolve on Ctrl-C or, on Unix, `SIGTERM`.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
