//! Runtime events for monitoring a publish pipeline.
//!
//! Events are how failures off the caller's thread reach the application:
//! connect failures, send failures and dropped frames all surface here and
//! in the `tracing` output, never as returned errors. Publishing continues
//! after every event except a connect failure, which returns the session
//! to [`SessionState::Idle`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{FramingError, TransportError};
use crate::media::{FrameKind, StreamKind};
use crate::session::SessionState;

/// Runtime events emitted by a [`Publisher`](crate::Publisher).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishEvent {
    /// The publish session moved between lifecycle states.
    StateChanged {
        session_id: u64,
        from: SessionState,
        to: SessionState,
    },

    /// The transport refused the connection. No retry is attempted.
    ConnectFailed {
        session_id: u64,
        error: TransportError,
    },

    /// A send call returned a negative status. Publishing continues.
    SendFailed {
        kind: FrameKind,
        error: TransportError,
    },

    /// Closing the connection failed. The session still ends.
    DisconnectFailed { error: TransportError },

    /// An encoder buffer could not be framed and was dropped.
    FramingFailed {
        stream: StreamKind,
        error: FramingError,
    },

    /// A data frame arrived before its stream's sync frame in this
    /// session and was dropped.
    MissingSync { stream: StreamKind },
}

/// Callback type for receiving runtime events.
///
/// Called from producer threads and from the dispatch worker; keep it
/// short and non-blocking.
pub type EventCallback = Arc<dyn Fn(PublishEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use publish::{event_callback, PublishEvent};
///
/// let callback = event_callback(|event| {
///     if let PublishEvent::ConnectFailed { error, .. } = event {
///         eprintln!("connect failed: {error}");
///     }
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(PublishEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Counters for one publisher, across sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishStats {
    /// Frames handed to the dispatch queue.
    pub frames_enqueued: u64,
    /// Frames the transport accepted.
    pub frames_sent: u64,
    /// Frames the transport rejected.
    pub send_failures: u64,
    /// Classified frames dropped before the queue (not publishing, no sync yet).
    pub frames_dropped: u64,
    /// Encoder buffers that failed classification.
    pub framing_errors: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub frames_enqueued: AtomicU64,
    pub frames_sent: AtomicU64,
    pub send_failures: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub framing_errors: AtomicU64,
}

impl StatsCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PublishStats {
        PublishStats {
            frames_enqueued: self.frames_enqueued.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
        }
    }
}

/// Emitter that tolerates an absent callback.
#[derive(Clone, Default)]
pub(crate) struct Events {
    callback: Option<EventCallback>,
}

impl Events {
    pub fn new(callback: Option<EventCallback>) -> Self {
        Self { callback }
    }

    pub fn emit(&self, event: PublishEvent) {
        if let Some(callback) = &self.callback {
            callback(event);
        }
    }
}
