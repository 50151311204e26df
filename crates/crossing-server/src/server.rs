//! TCP listener lifecycle.
//!
//! Provides [`start_server`] which binds to the configured address and
//! accepts connections until the shutdown signal fires. Each connection is
//! served on its own task by [`handle_connection`].

use std::sync::Arc;
use std::time::Duration;

use crossing_core::config::ServerSettings;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::connection::handle_connection;
use crate::error::ServerError;
use crate::state::AppState;

/// Pause after a failed `accept` so a persistent error (e.g. file
/// descriptor exhaustion) does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Bind a listener to `settings.host:settings.port`.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address cannot be bound.
pub async fn bind(settings: &ServerSettings) -> Result<TcpListener, ServerError> {
    let addr = format!("{}:{}", settings.host, settings.port);
    TcpListener::bind(&addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))
}

/// Accept connections on `listener` until `shutdown` fires.
///
/// Accept errors are logged and the loop continues. Returns `Ok(())` on
/// clean shutdown.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("Server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "Connection accepted");
                    tokio::spawn(handle_connection(stream, peer, Arc::clone(&state)));
                }
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
}

/// Start the protocol server.
///
/// Binds to the configured address and serves connections until the
/// shutdown signal fires.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind.
pub async fn start_server(
    settings: &ServerSettings,
    state: Arc<AppState>,
    shutdown: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let listener = bind(settings).await?;
    let addr = listener
        .local_addr()
        .map_err(|e| ServerError::Serve(format!("listener has no local address: {e}")))?;
    info!(%addr, "Crossing server listening");
    serve(listener, state, shutdown).await
}
