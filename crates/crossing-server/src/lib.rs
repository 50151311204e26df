//! Protocol server for the Crossing traffic-phase controller.
//!
//! Clients connect over TCP and exchange newline-delimited JSON frames:
//! camera feeds push `CAMERA_UPDATE`, dashboards `SUBSCRIBE` to state
//! broadcasts, and anyone may `QUERY` the current state.
//!
//! # Modules
//!
//! - [`codec`] -- Line framing, inbound command decoding, and outbound
//!   `STATUS` / `ERROR` frame encoding.
//! - [`registry`] -- [`ConnectionRegistry`]: sessions, subscriptions, and
//!   non-blocking delivery.
//! - [`scheduler`] -- The phase-advance, broadcast, and idle-cleanup loops.
//! - [`connection`] -- Per-connection reader and writer tasks.
//! - [`server`] -- Listener binding and the accept loop.
//! - [`startup`] -- Background spawning helper for the engine binary.
//! - [`state`] -- [`AppState`] shared by every task.
//! - [`error`] -- Protocol, registry, and server errors.
//!
//! [`ConnectionRegistry`]: registry::ConnectionRegistry
//! [`AppState`]: state::AppState

pub mod codec;
pub mod connection;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod startup;
pub mod state;
