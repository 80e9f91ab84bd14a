//! Publish session lifecycle.
//!
//! A session is created by the first publish request (and again after the
//! previous one stopped), and owns the view of one transport connection:
//!
//! ```text
//! start_publish       Idle       -> Connecting
//! connect ok          Connecting -> Publishing   (worker)
//! connect failed      Connecting -> Idle         (worker)
//! stop_publish        Connecting -> Stopping
//!                     Publishing -> Stopping
//! stop task ran       Stopping   -> Stopped      (worker)
//! ```
//!
//! `Stopped` is terminal; publishing again needs a new session.
//!
//! Requests that do not match the table (stop while `Idle`, start while
//! `Publishing`, a second stop) are no-ops.
//!
//! Producer threads never take the state lock. They read the
//! [`is_publishing`](PublishSession::is_publishing) flag, which only the
//! dispatch worker writes, as it enters and leaves `Publishing`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::transport::TransportHandle;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Publish session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No connection; a publish request may start one.
    Idle,
    /// Connect queued or running on the worker.
    Connecting,
    /// Connected; frame tasks reach the transport.
    Publishing,
    /// Stop queued behind the frames enqueued before it.
    Stopping,
    /// Connection closed and worker exited.
    Stopped,
}

/// One publish session.
#[derive(Debug)]
pub struct PublishSession {
    id: u64,
    state: RwLock<SessionState>,
    publishing: AtomicBool,
    handle: RwLock<Option<TransportHandle>>,
}

impl PublishSession {
    /// Create a new `Idle` session with a unique id.
    pub fn new() -> Self {
        let id = SESSION_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self {
            id,
            state: RwLock::new(SessionState::Idle),
            publishing: AtomicBool::new(false),
            handle: RwLock::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Whether producers should enqueue frames. Lock-free.
    pub fn is_publishing(&self) -> bool {
        self.publishing.load(Ordering::Acquire)
    }

    /// Connection handle while connected.
    pub fn handle(&self) -> Option<TransportHandle> {
        *self.handle.read()
    }

    /// `Idle -> Connecting`. Returns whether the transition happened.
    pub(crate) fn begin_connect(&self) -> bool {
        self.transition(&[SessionState::Idle], SessionState::Connecting)
            .is_some()
    }

    /// `Connecting -> Publishing`, recording the handle.
    ///
    /// If a stop arrived while connecting, the state stays `Stopping` but the
    /// handle is still recorded so the stop task can close it.
    pub(crate) fn connected(&self, handle: TransportHandle) -> Option<SessionState> {
        *self.handle.write() = Some(handle);
        let from = self.transition(&[SessionState::Connecting], SessionState::Publishing);
        if from.is_some() {
            self.publishing.store(true, Ordering::Release);
        }
        from
    }

    /// `Connecting -> Idle` after a refused connect.
    pub(crate) fn connect_failed(&self) -> Option<SessionState> {
        self.transition(&[SessionState::Connecting], SessionState::Idle)
    }

    /// `Connecting | Publishing -> Stopping`. Returns the previous state.
    pub(crate) fn begin_stop(&self) -> Option<SessionState> {
        self.transition(
            &[SessionState::Connecting, SessionState::Publishing],
            SessionState::Stopping,
        )
    }

    /// Any non-terminal state `-> Stopped`, clearing the handle and the
    /// publishing flag. Returns the previous state, or `None` if already stopped.
    pub(crate) fn finish_stop(&self) -> Option<SessionState> {
        self.publishing.store(false, Ordering::Release);
        *self.handle.write() = None;
        self.transition(
            &[
                SessionState::Idle,
                SessionState::Connecting,
                SessionState::Publishing,
                SessionState::Stopping,
            ],
            SessionState::Stopped,
        )
    }

    /// Move to `to` if the current state is in `from`. Returns the previous state.
    fn transition(&self, from: &[SessionState], to: SessionState) -> Option<SessionState> {
        let mut state = self.state.write();
        let old = *state;
        if !from.contains(&old) {
            tracing::trace!(
                session_id = self.id,
                state = ?old,
                requested = ?to,
                "transition ignored"
            );
            return None;
        }
        *state = to;
        tracing::debug!(
            session_id = self.id,
            old_state = ?old,
            new_state = ?to,
            "state transition"
        );
        Some(old)
    }
}

impl Default for PublishSession {
    fn default() -> Self {
        Self::new()
    }
}
