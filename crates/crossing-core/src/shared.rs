//! The single synchronisation boundary around [`PhaseController`].
//!
//! Every connection handler and the phase-advance and broadcast loops reach
//! controller state only through [`SharedController`]. Each method takes the
//! lock once, so a reader never observes one route of a group updated
//! without its partner.

use std::sync::Arc;

use crossing_types::{ControllerSnapshot, PhaseTimingView, Route, TrafficReport, TrafficSample};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::controller::{PhaseController, PhaseTransition};
use crate::demand::DemandCalculator;

/// Cloneable handle to the one controller instance.
#[derive(Debug, Clone)]
pub struct SharedController {
    inner: Arc<Mutex<PhaseController>>,
}

impl SharedController {
    /// Wrap an existing controller.
    pub fn new(controller: PhaseController) -> Self {
        Self {
            inner: Arc::new(Mutex::new(controller)),
        }
    }

    /// Create a fresh controller starting now.
    pub fn start(calculator: DemandCalculator) -> Self {
        Self::new(PhaseController::new(calculator, Instant::now()))
    }

    /// Advance the phase if it is due.
    pub async fn advance(&self) -> Option<PhaseTransition> {
        self.inner.lock().await.advance(Instant::now())
    }

    /// Apply every sample of one validated camera update atomically.
    pub async fn update_traffic_batch<I>(&self, samples: I)
    where
        I: IntoIterator<Item = (Route, TrafficSample)>,
    {
        self.inner.lock().await.update_traffic_batch(samples);
    }

    /// Full snapshot at the current instant.
    pub async fn snapshot(&self) -> ControllerSnapshot {
        self.inner.lock().await.snapshot(Instant::now())
    }

    /// Timing-only view at the current instant.
    pub async fn phase_timing(&self) -> PhaseTimingView {
        self.inner.lock().await.phase_timing(Instant::now())
    }

    /// Samples and computed demands.
    pub async fn traffic_report(&self) -> TrafficReport {
        self.inner.lock().await.traffic_report()
    }

    /// Consume-once change check; see
    /// [`PhaseController::state_changed_since_last_broadcast`].
    pub async fn state_changed_since_last_broadcast(&self) -> bool {
        self.inner.lock().await.state_changed_since_last_broadcast()
    }

    /// Run the change check and, when it fires, take the snapshot under the
    /// same lock acquisition so the broadcast matches the detected change.
    pub async fn take_broadcast_snapshot(&self) -> Option<ControllerSnapshot> {
        let mut guard = self.inner.lock().await;
        if guard.state_changed_since_last_broadcast() {
            Some(guard.snapshot(Instant::now()))
        } else {
            None
        }
    }
}
