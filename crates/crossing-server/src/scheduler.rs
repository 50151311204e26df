//! The three periodic loops that drive the controller.
//!
//! - **phase advance** checks whether the active phase is due to end.
//! - **broadcast** pushes one snapshot to every subscribed session when
//!   the signal colours changed since the previous push.
//! - **cleanup** evicts idle and inactive sessions.
//!
//! The loops run as independent tasks on their own intervals so a slow
//! fan-out never delays a phase transition. Each body is also exposed as a
//! `*_once` function so tests can step the scheduler deterministically.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crossing_core::config::SchedulerConfig;
use crossing_core::controller::PhaseTransition;
use crossing_types::SessionId;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::codec;
use crate::state::AppState;

/// Handles for the spawned scheduler tasks.
#[derive(Debug)]
pub struct SchedulerHandles {
    /// Phase-advance loop.
    pub phase_advance: JoinHandle<()>,
    /// Broadcast loop.
    pub broadcast: JoinHandle<()>,
    /// Idle-cleanup loop.
    pub cleanup: JoinHandle<()>,
}

impl SchedulerHandles {
    /// Wait for all three loops to exit.
    pub async fn join(self) {
        for (name, handle) in [
            ("phase_advance", self.phase_advance),
            ("broadcast", self.broadcast),
            ("cleanup", self.cleanup),
        ] {
            if let Err(e) = handle.await {
                warn!(scheduler_loop = name, error = %e, "Scheduler loop panicked or was aborted");
            }
        }
    }
}

/// Spawn the three scheduler loops. Each exits when `shutdown` fires.
pub fn spawn_scheduler(
    state: &Arc<AppState>,
    config: SchedulerConfig,
    shutdown: &broadcast::Sender<()>,
) -> SchedulerHandles {
    let advance_state = Arc::clone(state);
    let phase_advance = tokio::spawn(run_periodic(
        "phase_advance",
        config.phase_advance(),
        shutdown.subscribe(),
        move || {
            let state = Arc::clone(&advance_state);
            async move {
                advance_once(&state).await;
            }
        },
    ));

    let broadcast_state = Arc::clone(state);
    let broadcast = tokio::spawn(run_periodic(
        "broadcast",
        config.broadcast(),
        shutdown.subscribe(),
        move || {
            let state = Arc::clone(&broadcast_state);
            async move {
                broadcast_once(&state).await;
            }
        },
    ));

    let cleanup_state = Arc::clone(state);
    let cleanup = tokio::spawn(run_periodic(
        "cleanup",
        config.cleanup(),
        shutdown.subscribe(),
        move || {
            let state = Arc::clone(&cleanup_state);
            async move {
                cleanup_once(&state).await;
            }
        },
    ));

    info!(
        phase_advance_ms = config.phase_advance_ms,
        broadcast_ms = config.broadcast_ms,
        cleanup_ms = config.cleanup_ms,
        "Scheduler started"
    );

    SchedulerHandles {
        phase_advance,
        broadcast,
        cleanup,
    }
}

async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut body: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!(scheduler_loop = name, "Scheduler loop stopping");
                return;
            }
            _ = ticker.tick() => body().await,
        }
    }
}

/// Advance the phase if its committed duration has elapsed.
pub async fn advance_once(state: &AppState) -> Option<PhaseTransition> {
    state.controller.advance().await
}

/// Push the current snapshot to every subscribed session if the signal
/// colours changed since the last push.
///
/// The snapshot is encoded once and the same frame is shared by every
/// recipient. Returns how many sessions accepted it.
pub async fn broadcast_once(state: &AppState) -> usize {
    let Some(snapshot) = state.controller.take_broadcast_snapshot().await else {
        return 0;
    };

    let frame = match codec::encode_status(&snapshot) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Failed to encode state broadcast");
            return 0;
        }
    };

    let receivers = state.registry.broadcast(frame).await;
    debug!(phase = %snapshot.phase, receivers, "State broadcast");
    receivers
}

/// Evict sessions idle past the configured timeout or marked inactive.
pub async fn cleanup_once(state: &AppState) -> Vec<SessionId> {
    let evicted = state
        .registry
        .evict_idle(state.settings.idle_timeout())
        .await;
    if !evicted.is_empty() {
        info!(count = evicted.len(), "Evicted idle sessions");
    }
    evicted
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use crossing_core::config::CrossingConfig;
    use crossing_types::{ControllerSnapshot, Phase, Route, SignalColor};
    use tokio::sync::mpsc;

    use super::*;
    use crate::codec::{Frame, ServerFrame, decode_frame};

    async fn subscribed_session(state: &AppState) -> (SessionId, mpsc::Receiver<Frame>) {
        let (tx, mut rx) = mpsc::channel(16);
        let (id, _close) = state.registry.register(tx).await.unwrap();
        rx.recv().await.unwrap();
        let all: BTreeSet<Route> = Route::ALL.into_iter().collect();
        state.registry.subscribe(id, &all).await.unwrap();
        (id, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_fires_once_per_colour_change() {
        let state = AppState::new(&CrossingConfig::default());
        let (_id, mut rx) = subscribed_session(&state).await;

        // Initial state is pushed once.
        assert_eq!(broadcast_once(&state).await, 1);
        assert_eq!(broadcast_once(&state).await, 0);
        let first: ServerFrame<ControllerSnapshot> = decode_frame(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(first.data.unwrap().phase, Phase::Group1Green);

        // Nothing due yet.
        assert!(advance_once(&state).await.is_none());
        assert_eq!(broadcast_once(&state).await, 0);

        tokio::time::advance(Duration::from_secs(5)).await;
        let transition = advance_once(&state).await.unwrap();
        assert_eq!(transition.to, Phase::Group1Yellow);
        assert_eq!(broadcast_once(&state).await, 1);

        let second: ServerFrame<ControllerSnapshot> = decode_frame(&rx.recv().await.unwrap()).unwrap();
        let snapshot = second.data.unwrap();
        assert_eq!(snapshot.phase, Phase::Group1Yellow);
        assert_eq!(snapshot.signals.get(&Route::A), Some(&SignalColor::Yellow));
        assert_eq!(snapshot.signals.get(&Route::B), Some(&SignalColor::Red));
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_evicts_after_idle_timeout() {
        let state = AppState::new(&CrossingConfig::default());
        let (id, _rx) = subscribed_session(&state).await;

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(cleanup_once(&state).await.is_empty());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cleanup_once(&state).await, vec![id]);
        assert!(state.registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_loops_drive_transitions_and_stop_on_shutdown() {
        let state = Arc::new(AppState::new(&CrossingConfig::default()));
        let (_id, mut rx) = subscribed_session(&state).await;
        let (shutdown, _keep) = broadcast::channel(1);
        let handles = spawn_scheduler(&state, SchedulerConfig::default(), &shutdown);

        // Initial snapshot, then the yellow phase after five seconds.
        let initial: ServerFrame<ControllerSnapshot> =
            decode_frame(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(initial.data.unwrap().phase, Phase::Group1Green);
        let next: ServerFrame<ControllerSnapshot> =
            decode_frame(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(next.data.unwrap().phase, Phase::Group1Yellow);

        shutdown.send(()).unwrap();
        handles.join().await;
    }
}
