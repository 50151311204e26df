//! Shared application state for the protocol server.
//!
//! [`AppState`] bundles the one [`SharedController`] with the
//! [`ConnectionRegistry`]. Each sits behind its own lock, so a slow
//! registry operation never holds up a phase transition and the reverse.

use crossing_core::config::{CrossingConfig, ServerSettings};
use crossing_core::demand::DemandCalculator;
use crossing_core::shared::SharedController;

use crate::registry::ConnectionRegistry;

/// State shared by the accept loop, every connection task, and the
/// scheduler loops.
#[derive(Debug)]
pub struct AppState {
    /// The phase controller.
    pub controller: SharedController,
    /// Connected sessions and their subscriptions.
    pub registry: ConnectionRegistry,
    /// Listener and per-connection limits.
    pub settings: ServerSettings,
}

impl AppState {
    /// Build fresh state from a validated configuration. The controller
    /// starts in `GROUP1_GREEN` at the current instant.
    pub fn new(config: &CrossingConfig) -> Self {
        let calculator = DemandCalculator::new(&config.weights, &config.timing);
        Self::with_controller(SharedController::start(calculator), config.server.clone())
    }

    /// Build state around an existing controller.
    pub fn with_controller(controller: SharedController, settings: ServerSettings) -> Self {
        Self {
            controller,
            registry: ConnectionRegistry::new(settings.max_sessions),
            settings,
        }
    }
}
