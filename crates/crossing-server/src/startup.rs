//! Server startup helper for embedding in the engine binary.
//!
//! Provides [`spawn_server`] which binds the listener and runs the accept
//! loop on a background Tokio task. The engine calls this after starting
//! the scheduler so clients are only admitted once phases are advancing.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crossing_server::startup::spawn_server;
//! use crossing_server::state::AppState;
//! use std::sync::Arc;
//!
//! let state = Arc::new(AppState::new(&config));
//! let (shutdown, _) = tokio::sync::broadcast::channel(1);
//! let (addr, handle) = spawn_server(&config.server, state, shutdown.subscribe()).await?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use crossing_core::config::ServerSettings;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::ServerError;
use crate::server::{bind, serve};
use crate::state::AppState;

/// Errors that can occur when spawning the server.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The server failed to bind or start.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// Bind the listener and serve it on a background Tokio task.
///
/// Binding happens before the task is spawned, so an unusable address is
/// reported here rather than from inside the task. Port `0` picks a free
/// port; the returned address is the one actually bound.
///
/// # Arguments
///
/// * `settings` -- Listener address and per-connection limits.
/// * `state` -- Shared controller and session registry.
/// * `shutdown` -- Receiver that stops the accept loop when it fires.
///
/// # Errors
///
/// Returns [`StartupError::Server`] if the address cannot be bound.
pub async fn spawn_server(
    settings: &ServerSettings,
    state: Arc<AppState>,
    shutdown: broadcast::Receiver<()>,
) -> Result<(SocketAddr, JoinHandle<()>), StartupError> {
    let listener = bind(settings).await?;
    let addr = listener
        .local_addr()
        .map_err(|e| ServerError::Bind(format!("listener has no local address: {e}")))?;

    let handle = tokio::spawn(async move {
        if let Err(e) = serve(listener, state, shutdown).await {
            tracing::error!(error = %e, "Server exited with error");
        }
    });

    tracing::info!(%addr, "Crossing server spawned on background task");

    Ok((addr, handle))
}
