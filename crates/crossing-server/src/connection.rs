//! Per-connection tasks.
//!
//! Each accepted socket is split in two. A writer task drains the
//! session's bounded outbound queue onto the socket; the reader runs in the
//! connection task itself, reassembling lines and applying each command
//! before the next line is parsed. Replies go through the registry like
//! every other frame, so a session sees its frames in enqueue order.

use std::net::SocketAddr;
use std::sync::Arc;

use crossing_types::{QueryType, Route, SessionEvent, SessionId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::codec::{self, ClientCommand, Frame, LineAccumulator};
use crate::error::{EncodeError, ProtocolError, RegistryError};
use crate::registry::CloseSignal;
use crate::state::AppState;

/// Bytes requested from the socket per read.
const READ_CHUNK_BYTES: usize = 4096;

/// Why the reader stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    Eof,
    IdleTimeout,
    Evicted,
    ReadError,
    /// A reply could not be queued; the client stopped draining its socket.
    Backpressure,
}

/// Serve one client until it disconnects, goes idle, is evicted, or stops
/// reading its replies.
pub async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: Arc<AppState>) {
    let (mut reader, writer) = stream.into_split();
    let (outbound, queue) = mpsc::channel(state.settings.outbound_queue);

    let (session_id, closed) = match state.registry.register(outbound).await {
        Ok(registration) => registration,
        Err(e) => {
            reject(writer, &e).await;
            warn!(%peer, error = %e, "Connection refused");
            return;
        }
    };
    info!(%peer, session_id = %session_id, "Client connected");

    tokio::spawn(write_loop(writer, queue, session_id, Arc::clone(&state)));

    let reason = read_loop(&mut reader, session_id, closed, &state).await;
    state.registry.remove(session_id).await;
    info!(%peer, session_id = %session_id, reason = ?reason, "Client disconnected");
}

/// Write one `ERROR` frame straight to the socket and close it.
async fn reject(mut writer: OwnedWriteHalf, err: &RegistryError) {
    match codec::encode_error(err.code(), &err.to_string()) {
        Ok(frame) => {
            if let Err(e) = writer.write_all(frame.as_bytes()).await {
                debug!(error = %e, "Failed to write rejection frame");
            }
        }
        Err(e) => warn!(error = %e, "Failed to encode rejection frame"),
    }
    let _ = writer.shutdown().await;
}

/// Drain the outbound queue onto the socket.
///
/// Ends when the registry drops the session's sender, or on the first
/// write failure, which marks the session inactive.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::Receiver<Frame>,
    session_id: SessionId,
    state: Arc<AppState>,
) {
    while let Some(frame) = queue.recv().await {
        if let Err(e) = writer.write_all(frame.as_bytes()).await {
            debug!(session_id = %session_id, error = %e, "Write failed");
            state.registry.mark_inactive(session_id).await;
            return;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(
    reader: &mut OwnedReadHalf,
    session_id: SessionId,
    mut closed: CloseSignal,
    state: &AppState,
) -> Disconnect {
    let mut accumulator = LineAccumulator::new(state.settings.max_frame_bytes);
    let mut buf = vec![0_u8; READ_CHUNK_BYTES];
    let idle = state.settings.idle_timeout();

    loop {
        tokio::select! {
            _ = &mut closed => return Disconnect::Evicted,
            read = tokio::time::timeout(idle, reader.read(&mut buf)) => {
                let n = match read {
                    Err(_elapsed) => return Disconnect::IdleTimeout,
                    Ok(Ok(0)) => return Disconnect::Eof,
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) => {
                        debug!(session_id = %session_id, error = %e, "Read failed");
                        return Disconnect::ReadError;
                    }
                };

                state.registry.touch(session_id).await;
                let chunk = buf.get(..n).unwrap_or_default();
                for line in accumulator.push(chunk) {
                    if !process_line(line, session_id, state).await {
                        return Disconnect::Backpressure;
                    }
                }
            }
        }
    }
}

/// Apply one line and enqueue exactly one reply for it.
///
/// Returns `false` when the reply could not be queued, after which no
/// further command from this session may be applied.
async fn process_line(
    line: Result<Vec<u8>, ProtocolError>,
    session_id: SessionId,
    state: &AppState,
) -> bool {
    let reply = match line.and_then(|bytes| codec::decode_command(&bytes)) {
        Ok(command) => apply_command(command, session_id, state).await,
        Err(err) => {
            debug!(session_id = %session_id, error = %err, "Rejected frame");
            codec::encode_protocol_error(&err)
        }
    };

    match reply {
        Ok(frame) => state.registry.deliver(session_id, frame).await,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Failed to encode reply");
            true
        }
    }
}

async fn apply_command(
    command: ClientCommand,
    session_id: SessionId,
    state: &AppState,
) -> Result<Frame, EncodeError> {
    match command {
        ClientCommand::CameraUpdate(samples) => {
            let routes = samples.keys().copied().collect();
            state.controller.update_traffic_batch(samples).await;
            codec::encode_status(&SessionEvent::CameraUpdate { routes })
        }
        ClientCommand::Subscribe(routes) => {
            let result = state.registry.subscribe(session_id, &routes).await;
            acknowledge(result, |subscriptions| SessionEvent::Subscribed {
                routes: routes.iter().copied().collect(),
                subscriptions,
            })
        }
        ClientCommand::Unsubscribe(routes) => {
            let result = state.registry.unsubscribe(session_id, &routes).await;
            acknowledge(result, |subscriptions| {
                SessionEvent::Unsubscribed {
                    routes: routes.iter().copied().collect(),
                    subscriptions,
                }
            })
        }
        ClientCommand::Query(QueryType::Status) => {
            codec::encode_status(&state.controller.snapshot().await)
        }
        ClientCommand::Query(QueryType::Phase) => {
            codec::encode_status(&state.controller.phase_timing().await)
        }
        ClientCommand::Query(QueryType::Traffic) => {
            codec::encode_status(&state.controller.traffic_report().await)
        }
    }
}

/// Reply to a subscription change with its ack, or with an `ERROR` frame.
fn acknowledge<F>(
    result: Result<Vec<Route>, RegistryError>,
    event: F,
) -> Result<Frame, EncodeError>
where
    F: FnOnce(Vec<Route>) -> SessionEvent,
{
    match result {
        Ok(subscriptions) => codec::encode_status(&event(subscriptions)),
        Err(e) => codec::encode_error(e.code(), &e.to_string()),
    }
}
