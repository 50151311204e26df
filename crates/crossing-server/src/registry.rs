//! Connected client sessions and their route subscriptions.
//!
//! The registry has its own lock, separate from the controller's. Frames
//! are handed to each session's bounded outbound queue with `try_send`, so
//! no registry operation ever waits on a socket: a session whose queue is
//! full or whose writer has gone away is marked inactive. Its connection
//! task ends on the next reply it fails to queue; anything left over is
//! evicted by the cleanup loop.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossing_types::{Route, SessionEvent, SessionId};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::codec::{self, Frame};
use crate::error::RegistryError;

/// Sending half of a session's outbound queue.
pub type FrameSender = mpsc::Sender<Frame>;

/// Fires when the registry evicts a session.
pub type CloseSignal = oneshot::Receiver<()>;

#[derive(Debug)]
struct ClientSession {
    outbound: FrameSender,
    subscriptions: BTreeSet<Route>,
    last_activity: Instant,
    active: bool,
    close: Option<oneshot::Sender<()>>,
}

impl ClientSession {
    /// Non-blocking enqueue. Any failure marks the session inactive.
    fn try_deliver(&mut self, id: SessionId, frame: Frame) -> bool {
        if !self.active {
            return false;
        }
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session_id = %id, "Outbound queue full, marking session inactive");
                self.active = false;
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(session_id = %id, "Writer gone, marking session inactive");
                self.active = false;
                false
            }
        }
    }

    fn signal_close(&mut self) {
        if let Some(close) = self.close.take() {
            // The receiver is gone when the connection task already exited.
            let _ = close.send(());
        }
    }
}

/// Every live session, keyed by id.
#[derive(Debug)]
pub struct ConnectionRegistry {
    sessions: Mutex<BTreeMap<SessionId, ClientSession>>,
    next_id: AtomicU64,
    max_sessions: usize,
}

impl ConnectionRegistry {
    /// Create an empty registry admitting at most `max_sessions` sessions.
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            max_sessions,
        }
    }

    /// Admit a new session with no subscriptions and deliver its welcome
    /// frame.
    ///
    /// Returns the assigned id and the signal that fires on eviction.
    pub async fn register(
        &self,
        outbound: FrameSender,
    ) -> Result<(SessionId, CloseSignal), RegistryError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.len() >= self.max_sessions {
            return Err(RegistryError::Full {
                limit: self.max_sessions,
            });
        }

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (close_tx, close_rx) = oneshot::channel();
        let mut session = ClientSession {
            outbound,
            subscriptions: BTreeSet::new(),
            last_activity: Instant::now(),
            active: true,
            close: Some(close_tx),
        };

        let welcome = SessionEvent::Welcome {
            session_id: id,
            message: format!("Connected to crossing controller as session {id}"),
        };
        match codec::encode_status(&welcome) {
            Ok(frame) => {
                session.try_deliver(id, frame);
            }
            Err(e) => warn!(session_id = %id, error = %e, "Failed to encode welcome frame"),
        }

        sessions.insert(id, session);
        debug!(session_id = %id, sessions = sessions.len(), "Session registered");
        Ok((id, close_rx))
    }

    /// Add `routes` to the session's subscriptions; returns the full set.
    pub async fn subscribe(
        &self,
        id: SessionId,
        routes: &BTreeSet<Route>,
    ) -> Result<Vec<Route>, RegistryError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(RegistryError::UnknownSession(id))?;
        session.subscriptions.extend(routes.iter().copied());
        Ok(session.subscriptions.iter().copied().collect())
    }

    /// Remove `routes` from the session's subscriptions; returns the full set.
    pub async fn unsubscribe(
        &self,
        id: SessionId,
        routes: &BTreeSet<Route>,
    ) -> Result<Vec<Route>, RegistryError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(RegistryError::UnknownSession(id))?;
        session.subscriptions.retain(|route| !routes.contains(route));
        Ok(session.subscriptions.iter().copied().collect())
    }

    /// Record inbound activity.
    pub async fn touch(&self, id: SessionId) {
        if let Some(session) = self.sessions.lock().await.get_mut(&id) {
            session.last_activity = Instant::now();
        }
    }

    /// Sessions that should receive a broadcast about `routes`.
    ///
    /// `None` selects every session with at least one subscription;
    /// otherwise a session is selected when its subscriptions intersect
    /// `routes`. Sessions without subscriptions are never selected.
    pub async fn fanout_targets(&self, routes: Option<&BTreeSet<Route>>) -> Vec<SessionId> {
        let sessions = self.sessions.lock().await;
        sessions
            .iter()
            .filter(|(_, session)| is_target(session, routes))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Enqueue `frame` for one session without waiting.
    ///
    /// Returns `false` unless the frame was queued.
    pub async fn deliver(&self, id: SessionId, frame: Frame) -> bool {
        self.sessions
            .lock()
            .await
            .get_mut(&id)
            .is_some_and(|session| session.try_deliver(id, frame))
    }

    /// Enqueue one shared frame for every broadcast target, in id order.
    ///
    /// Returns how many sessions accepted it.
    pub async fn broadcast(&self, frame: Frame) -> usize {
        let mut sessions = self.sessions.lock().await;
        sessions
            .iter_mut()
            .filter(|(_, session)| is_target(session, None))
            .map(|(id, session)| session.try_deliver(*id, Frame::clone(&frame)))
            .filter(|delivered| *delivered)
            .count()
    }

    /// Flag a session for eviction on the next cleanup pass.
    pub async fn mark_inactive(&self, id: SessionId) {
        if let Some(session) = self.sessions.lock().await.get_mut(&id) {
            session.active = false;
        }
    }

    /// Drop a session. Returns whether it was registered.
    pub async fn remove(&self, id: SessionId) -> bool {
        let removed = self.sessions.lock().await.remove(&id);
        match removed {
            Some(mut session) => {
                session.signal_close();
                debug!(session_id = %id, "Session removed");
                true
            }
            None => false,
        }
    }

    /// Remove every inactive session and every session silent for longer
    /// than `threshold`, signalling each one to close.
    pub async fn evict_idle(&self, threshold: Duration) -> Vec<SessionId> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let stale: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, session)| {
                !session.active || now.saturating_duration_since(session.last_activity) > threshold
            })
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            if let Some(mut session) = sessions.remove(id) {
                session.signal_close();
            }
        }
        stale
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether no session is registered.
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// A session's current subscriptions, or `None` if it is not registered.
    pub async fn subscriptions(&self, id: SessionId) -> Option<Vec<Route>> {
        self.sessions
            .lock()
            .await
            .get(&id)
            .map(|session| session.subscriptions.iter().copied().collect())
    }

    /// Whether a session is still eligible for delivery.
    pub async fn is_active(&self, id: SessionId) -> Option<bool> {
        self.sessions.lock().await.get(&id).map(|session| session.active)
    }
}

fn is_target(session: &ClientSession, routes: Option<&BTreeSet<Route>>) -> bool {
    match routes {
        None => !session.subscriptions.is_empty(),
        Some(routes) => !session.subscriptions.is_disjoint(routes),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::{ServerFrame, decode_frame};

    fn routes(list: &[Route]) -> BTreeSet<Route> {
        list.iter().copied().collect()
    }

    async fn connect(
        registry: &ConnectionRegistry,
        capacity: usize,
    ) -> (SessionId, mpsc::Receiver<Frame>, CloseSignal) {
        let (tx, rx) = mpsc::channel(capacity);
        let (id, close) = registry.register(tx).await.unwrap();
        (id, rx, close)
    }

    #[tokio::test]
    async fn register_sends_welcome_with_session_id() {
        let registry = ConnectionRegistry::new(4);
        let (id, mut rx, _close) = connect(&registry, 8).await;
        let frame = rx.recv().await.unwrap();
        let decoded: ServerFrame<SessionEvent> = decode_frame(&frame).unwrap();
        assert!(matches!(
            decoded.data,
            Some(SessionEvent::Welcome { session_id, .. }) if session_id == id
        ));
        assert_eq!(registry.subscriptions(id).await, Some(Vec::new()));
    }

    #[tokio::test]
    async fn ids_are_unique_and_capacity_is_enforced() {
        let registry = ConnectionRegistry::new(2);
        let (first, _rx1, _c1) = connect(&registry, 8).await;
        let (second, _rx2, _c2) = connect(&registry, 8).await;
        assert_ne!(first, second);

        let (tx, _rx) = mpsc::channel(8);
        let refused = registry.register(tx).await;
        assert_eq!(refused.unwrap_err(), RegistryError::Full { limit: 2 });

        assert!(registry.remove(first).await);
        let (third, _rx3, _c3) = connect(&registry, 8).await;
        assert!(third > second);
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe_are_idempotent() {
        let registry = ConnectionRegistry::new(4);
        let (id, _rx, _close) = connect(&registry, 8).await;

        let once = registry.subscribe(id, &routes(&[Route::A, Route::C])).await.unwrap();
        let twice = registry.subscribe(id, &routes(&[Route::A])).await.unwrap();
        assert_eq!(once, vec![Route::A, Route::C]);
        assert_eq!(twice, once);

        let after = registry.unsubscribe(id, &routes(&[Route::C, Route::D])).await.unwrap();
        assert_eq!(after, vec![Route::A]);
        let again = registry.unsubscribe(id, &routes(&[Route::D])).await.unwrap();
        assert_eq!(again, vec![Route::A]);

        let missing = registry.subscribe(SessionId(999), &routes(&[Route::A])).await;
        assert_eq!(missing.unwrap_err(), RegistryError::UnknownSession(SessionId(999)));
    }

    #[tokio::test]
    async fn fanout_targets_follow_subscriptions() {
        let registry = ConnectionRegistry::new(4);
        let (silent, _r1, _c1) = connect(&registry, 8).await;
        let (north, _r2, _c2) = connect(&registry, 8).await;
        let (east, _r3, _c3) = connect(&registry, 8).await;
        registry.subscribe(north, &routes(&[Route::A])).await.unwrap();
        registry.subscribe(east, &routes(&[Route::B])).await.unwrap();

        let all = registry.fanout_targets(None).await;
        assert_eq!(all, vec![north, east]);
        assert!(!all.contains(&silent));

        let scoped = registry.fanout_targets(Some(&routes(&[Route::B, Route::D]))).await;
        assert_eq!(scoped, vec![east]);
    }

    #[tokio::test]
    async fn broadcast_shares_one_frame_with_every_subscriber() {
        let registry = ConnectionRegistry::new(4);
        let (silent, mut silent_rx, _c1) = connect(&registry, 8).await;
        let (a, mut a_rx, _c2) = connect(&registry, 8).await;
        let (b, mut b_rx, _c3) = connect(&registry, 8).await;
        registry.subscribe(a, &routes(&[Route::A])).await.unwrap();
        registry.subscribe(b, &routes(&[Route::D])).await.unwrap();
        for rx in [&mut silent_rx, &mut a_rx, &mut b_rx] {
            rx.recv().await.unwrap();
        }

        let frame = codec::encode_status(&"tick").unwrap();
        assert_eq!(registry.broadcast(Frame::clone(&frame)).await, 2);

        let got_a = a_rx.recv().await.unwrap();
        let got_b = b_rx.recv().await.unwrap();
        assert!(std::sync::Arc::ptr_eq(&got_a, &got_b));
        assert!(silent_rx.try_recv().is_err());
        assert_eq!(registry.is_active(silent).await, Some(true));
    }

    #[tokio::test]
    async fn full_queue_marks_session_inactive() {
        let registry = ConnectionRegistry::new(4);
        // Capacity one is taken by the welcome frame.
        let (id, _rx, _close) = connect(&registry, 1).await;
        let frame = codec::encode_status(&"x").unwrap();
        assert!(!registry.deliver(id, frame).await);
        assert_eq!(registry.is_active(id).await, Some(false));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn closed_writer_marks_session_inactive() {
        let registry = ConnectionRegistry::new(4);
        let (id, rx, _close) = connect(&registry, 8).await;
        drop(rx);
        let frame = codec::encode_status(&"x").unwrap();
        assert!(!registry.deliver(id, frame).await);
        assert_eq!(registry.is_active(id).await, Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn evict_idle_removes_stale_and_inactive_sessions() {
        let registry = ConnectionRegistry::new(4);
        let (quiet, _r1, quiet_close) = connect(&registry, 8).await;
        let (chatty, _r2, _c2) = connect(&registry, 8).await;
        let (broken, _r3, broken_close) = connect(&registry, 8).await;
        registry.mark_inactive(broken).await;

        tokio::time::advance(Duration::from_secs(90)).await;
        registry.touch(chatty).await;
        tokio::time::advance(Duration::from_secs(40)).await;

        let evicted = registry.evict_idle(Duration::from_secs(120)).await;
        assert_eq!(evicted, vec![quiet, broken]);
        assert_eq!(registry.len().await, 1);
        assert!(quiet_close.await.is_ok());
        assert!(broken_close.await.is_ok());
        assert!(registry.subscriptions(chatty).await.is_some());
    }
}
