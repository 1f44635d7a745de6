//! Typing indicator coordination.
//!
//! Many terminals may write to the same destination at once, but the
//! platform only has one typing indicator per channel. The coordinator
//! keeps one session per destination, holding the set of participating
//! terminals. The indicator is asserted while the set is non-empty and
//! deasserted as soon as it empties.
//!
//! Each session runs a refresh loop that re-asserts the indicator on a
//! fixed interval (platforms expire it after a few seconds). `stop` wakes
//! the loop through a [`Notify`] permit, so a wake issued before the loop
//! starts waiting is never lost, and the loop re-checks its session after
//! every wake.
//!
//! Transport calls for one destination are serialised through a gate, and
//! a loop only asserts while its own session is alive and only deasserts
//! when no newer session exists. Once the loops go quiet the transport
//! state therefore always matches [`TypingCoordinator::is_active`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::Destination;
use crate::channels::Transport;

/// Identity of a terminal taking part in a typing session.
pub type ParticipantId = Uuid;

struct TypingSession {
    generation: u64,
    participants: HashSet<ParticipantId>,
    wake: Arc<Notify>,
}

struct CoordinatorInner {
    transport: Arc<dyn Transport>,
    refresh: Duration,
    sessions: Mutex<HashMap<Destination, TypingSession>>,
    // One gate per destination with a running loop. An entry is dropped only
    // when its last loop exits, so overlapping loops share a gate.
    gates: Mutex<HashMap<Destination, Arc<tokio::sync::Mutex<()>>>>,
    next_generation: AtomicU64,
}

/// Reference-counted typing indicator, one session per destination.
#[derive(Clone)]
pub struct TypingCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl TypingCoordinator {
    /// Create a coordinator refreshing the indicator every `refresh`.
    pub fn new(transport: Arc<dyn Transport>, refresh: Duration) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                transport,
                refresh,
                sessions: Mutex::new(HashMap::new()),
                gates: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Refresh interval of the indicator.
    pub fn refresh_interval(&self) -> Duration {
        self.inner.refresh
    }

    /// Add `participant` to the destination's session, creating the session
    /// and its refresh loop when none exists. Idempotent per participant.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, destination: &Destination, participant: ParticipantId) {
        let mut sessions = self.inner.sessions.lock();
        let session = sessions.entry(destination.clone()).or_insert_with(|| {
            let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
            let wake = Arc::new(Notify::new());
            info!(destination = %destination, generation, "Started typing session");
            tokio::spawn(refresh_loop(
                Arc::clone(&self.inner),
                destination.clone(),
                generation,
                Arc::clone(&wake),
            ));
            TypingSession {
                generation,
                participants: HashSet::new(),
                wake,
            }
        });
        session.participants.insert(participant);
        debug!(
            destination = %destination,
            participants = session.participants.len(),
            "Typing participant joined"
        );
    }

    /// Remove `participant` from the destination's session. When the set
    /// empties the session is destroyed and its loop woken to deassert.
    ///
    /// Returns whether the participant was part of the session.
    pub fn stop(&self, destination: &Destination, participant: ParticipantId) -> bool {
        let mut sessions = self.inner.sessions.lock();
        let Some(session) = sessions.get_mut(destination) else {
            return false;
        };

        let removed = session.participants.remove(&participant);
        let wake = Arc::clone(&session.wake);
        if session.participants.is_empty() {
            sessions.remove(destination);
            info!(destination = %destination, "Typing session ended");
        }
        wake.notify_one();
        removed
    }

    /// Whether a session with at least one participant exists.
    pub fn is_active(&self, destination: &Destination) -> bool {
        self.inner
            .sessions
            .lock()
            .get(destination)
            .map(|s| !s.participants.is_empty())
            .unwrap_or(false)
    }

    /// Number of participants typing in a destination.
    pub fn participant_count(&self, destination: &Destination) -> usize {
        self.inner
            .sessions
            .lock()
            .get(destination)
            .map(|s| s.participants.len())
            .unwrap_or(0)
    }

    /// Number of live sessions across all destinations.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    #[cfg(test)]
    fn gate_count(&self) -> usize {
        self.inner.gates.lock().len()
    }

    /// End every session.
    pub fn stop_all(&self) {
        let drained: Vec<(Destination, TypingSession)> =
            self.inner.sessions.lock().drain().collect();
        for (destination, session) in drained {
            debug!(destination = %destination, "Typing session cancelled");
            session.wake.notify_one();
        }
    }
}

impl CoordinatorInner {
    fn gate(&self, destination: &Destination) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.gates
                .lock()
                .entry(destination.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Forget the destination's gate when the caller holds the last handle
    /// outside the map.
    fn release_gate(&self, destination: &Destination, gate: &Arc<tokio::sync::Mutex<()>>) {
        let mut gates = self.gates.lock();
        let ours = gates
            .get(destination)
            .is_some_and(|g| Arc::ptr_eq(g, gate));
        if ours && Arc::strong_count(gate) == 2 {
            gates.remove(destination);
        }
    }

    /// Whether the session `generation` for `destination` is still alive.
    fn is_alive(&self, destination: &Destination, generation: u64) -> bool {
        match self.sessions.lock().get(destination) {
            Some(session) if session.generation == generation => {
                // stop() removes a session as soon as it empties
                debug_assert!(
                    !session.participants.is_empty(),
                    "typing session alive with no participants"
                );
                if session.participants.is_empty() {
                    error!(destination = %destination, "Typing session alive with no participants");
                    return false;
                }
                true
            }
            _ => false,
        }
    }

    fn has_session(&self, destination: &Destination) -> bool {
        self.sessions.lock().contains_key(destination)
    }
}

async fn refresh_loop(
    inner: Arc<CoordinatorInner>,
    destination: Destination,
    generation: u64,
    wake: Arc<Notify>,
) {
    let gate = inner.gate(&destination);
    let mut next_refresh = Instant::now();

    loop {
        if !inner.is_alive(&destination, generation) {
            break;
        }

        if Instant::now() >= next_refresh {
            let _guard = gate.lock().await;
            if !inner.is_alive(&destination, generation) {
                break;
            }
            if let Err(e) = inner.transport.start_typing(&destination).await {
                warn!(destination = %destination, error = %e, "Failed to assert typing indicator");
            }
            next_refresh = Instant::now() + inner.refresh;
        }

        tokio::select! {
            _ = wake.notified() => {}
            _ = tokio::time::sleep_until(next_refresh) => {}
        }
    }

    {
        let _guard = gate.lock().await;
        if inner.has_session(&destination) {
            // A newer session owns the indicator now.
            debug!(destination = %destination, generation, "Typing handed over to newer session");
        } else {
            if let Err(e) = inner.transport.stop_typing(&destination).await {
                warn!(destination = %destination, error = %e, "Failed to deassert typing indicator");
            }
            debug!(destination = %destination, generation, "Typing loop exited");
        }
    }
    inner.release_gate(&destination, &gate);
}
