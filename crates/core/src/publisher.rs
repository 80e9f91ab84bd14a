use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::config::{PublishConfig, VideoSize};
use crate::dispatch::{self, DispatchQueue, DispatchTask, Dispatcher};
use crate::error::{PublishError, Result};
use crate::event::{EventCallback, Events, PublishEvent, PublishStats, StatsCounters};
use crate::media::{ClassifiedFrame, EncodedUnit, FrameClassifier, StreamKind};
use crate::session::{PublishSession, SessionState};
use crate::transport::{Transport, TransportHandle};

/// Live-publishing pipeline coordinator.
///
/// Wires encoder output to the classifier and the dispatch queue, and owns
/// the publish session lifecycle. One dispatch worker thread runs per
/// session and is the only thread that touches the [`Transport`].
///
/// Encoder callbacks push through [`push`](Self::push) or a cloned
/// [`FrameSink`]; the control thread calls [`start_publish`](Self::start_publish)
/// and [`stop_publish`](Self::stop_publish). Both are non-blocking: connect
/// and disconnect run on the worker, in queue order.
///
/// Event callbacks run on producer, control and worker threads and must
/// not call back into `start_publish`, `stop_publish` or `release`.
pub struct Publisher {
    shared: Arc<Shared>,
    control: Mutex<Control>,
}

/// State reachable from producer threads.
struct Shared {
    config: PublishConfig,
    classifier: FrameClassifier,
    video: Mutex<SyncGate>,
    audio: Mutex<SyncGate>,
    live: RwLock<Option<Live>>,
    events: Events,
    stats: Arc<StatsCounters>,
}

/// The current session and the queue feeding its worker.
#[derive(Clone)]
struct Live {
    session: Arc<PublishSession>,
    queue: DispatchQueue,
}

/// Lifecycle-only state, touched by the control thread.
struct Control {
    /// Transport while no worker owns it.
    transport: Option<Box<dyn Transport>>,
    worker: Option<JoinHandle<Box<dyn Transport>>>,
}

impl Publisher {
    /// Create a publisher with the default configuration.
    pub fn new(transport: impl Transport + 'static) -> Result<Self> {
        Self::build(Box::new(transport), PublishConfig::default(), None)
    }

    /// Create a publisher with a custom configuration.
    pub fn with_config(transport: impl Transport + 'static, config: PublishConfig) -> Result<Self> {
        Self::build(Box::new(transport), config, None)
    }

    /// Create a publisher with a custom configuration and an event callback.
    pub fn with_config_and_events(
        transport: impl Transport + 'static,
        config: PublishConfig,
        events: EventCallback,
    ) -> Result<Self> {
        Self::build(Box::new(transport), config, Some(events))
    }

    fn build(
        transport: Box<dyn Transport>,
        config: PublishConfig,
        events: Option<EventCallback>,
    ) -> Result<Self> {
        config.validate()?;
        tracing::debug!(
            url = %config.url,
            fps = config.fps,
            pps_policy = ?config.pps_policy,
            "publisher created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                classifier: FrameClassifier::new(config.pps_policy),
                config,
                video: Mutex::new(SyncGate::default()),
                audio: Mutex::new(SyncGate::default()),
                live: RwLock::new(None),
                events: Events::new(events),
                stats: Arc::new(StatsCounters::default()),
            }),
            control: Mutex::new(Control {
                transport: Some(transport),
                worker: None,
            }),
        })
    }

    /// Request a connection publishing at `size`.
    ///
    /// From `Idle` this moves to `Connecting` and queues the connect; a
    /// `Stopped` session is replaced by a fresh one first. In any other
    /// state the request is ignored.
    pub fn start_publish(&self, size: VideoSize) -> Result<()> {
        let mut control = self.control.lock();

        if let Some(live) = self.shared.current() {
            match live.session.state() {
                SessionState::Idle => {
                    self.begin_connect(&live, size);
                    return Ok(());
                }
                SessionState::Stopped => {}
                state => {
                    tracing::debug!(session_id = live.session.id(), ?state, "start ignored");
                    return Ok(());
                }
            }
        }

        self.reclaim_transport(&mut control)?;
        let transport = control
            .transport
            .take()
            .ok_or(PublishError::TransportUnavailable)?;

        let session = Arc::new(PublishSession::new());
        let (queue, rx) = dispatch::queue();
        let dispatcher = Dispatcher::new(
            transport,
            session.clone(),
            self.shared.events.clone(),
            self.shared.stats.clone(),
        );
        let worker = thread::Builder::new()
            .name(format!("publish-dispatch-{}", session.id()))
            .spawn(move || dispatcher.run(rx))?;
        control.worker = Some(worker);

        tracing::debug!(session_id = session.id(), "session created");
        let live = Live { session, queue };
        *self.shared.live.write() = Some(live.clone());

        self.begin_connect(&live, size);
        Ok(())
    }

    fn begin_connect(&self, live: &Live, size: VideoSize) {
        if live.session.begin_connect() {
            self.shared.events.emit(PublishEvent::StateChanged {
                session_id: live.session.id(),
                from: SessionState::Idle,
                to: SessionState::Connecting,
            });
            live.queue.enqueue(DispatchTask::Connect(
                self.shared.config.connect_params(size),
            ));
        }
    }

    /// Request a stop, ordered after every frame already queued.
    ///
    /// Ignored unless the session is `Connecting` or `Publishing`.
    pub fn stop_publish(&self) {
        let _control = self.control.lock();

        let Some(live) = self.shared.current() else {
            tracing::debug!("stop ignored, no session");
            return;
        };

        match live.session.begin_stop() {
            Some(from) => {
                self.shared.events.emit(PublishEvent::StateChanged {
                    session_id: live.session.id(),
                    from,
                    to: SessionState::Stopping,
                });
                live.queue.enqueue(DispatchTask::Stop);
            }
            None => {
                tracing::debug!(
                    session_id = live.session.id(),
                    state = ?live.session.state(),
                    "stop ignored"
                );
            }
        }
    }

    /// Shut the worker down now and wait for it.
    ///
    /// The task in progress finishes; queued tasks are abandoned. A
    /// connection that is still open is closed by the worker on its way
    /// out. Calling this again, or after a stop, is harmless.
    pub fn release(&self) -> Result<()> {
        let mut control = self.control.lock();
        if let Some(live) = self.shared.current() {
            live.queue.shutdown();
        }
        self.reclaim_transport(&mut control)
    }

    fn reclaim_transport(&self, control: &mut Control) -> Result<()> {
        if let Some(worker) = control.worker.take() {
            match worker.join() {
                Ok(transport) => control.transport = Some(transport),
                Err(_) => {
                    tracing::error!("dispatch worker panicked, transport lost");
                    // The worker never reached its own stop; end the session here.
                    if let Some(live) = self.shared.current()
                        && let Some(from) = live.session.finish_stop()
                    {
                        self.shared.events.emit(PublishEvent::StateChanged {
                            session_id: live.session.id(),
                            from,
                            to: SessionState::Stopped,
                        });
                    }
                    return Err(PublishError::WorkerPanicked);
                }
            }
        }
        Ok(())
    }

    /// Handle one encoder output buffer. Never blocks on the transport.
    pub fn push(&self, kind: StreamKind, unit: EncodedUnit) {
        self.shared.push(kind, unit);
    }

    pub fn push_video(&self, data: impl Into<Bytes>, timestamp_us: i64) {
        self.push(StreamKind::Video, EncodedUnit::new(data, timestamp_us));
    }

    pub fn push_audio(&self, data: impl Into<Bytes>, timestamp_us: i64) {
        self.push(StreamKind::Audio, EncodedUnit::new(data, timestamp_us));
    }

    /// A cloneable producer handle for encoder callback threads.
    pub fn frame_sink(&self) -> FrameSink {
        FrameSink {
            shared: self.shared.clone(),
        }
    }

    /// Current session state; `Idle` before the first publish request.
    pub fn state(&self) -> SessionState {
        self.shared
            .current()
            .map_or(SessionState::Idle, |live| live.session.state())
    }

    /// Whether frames are currently forwarded. Capture glue can use this
    /// to skip encoding while not publishing.
    pub fn is_publishing(&self) -> bool {
        self.shared.is_publishing()
    }

    pub fn session_id(&self) -> Option<u64> {
        self.shared.current().map(|live| live.session.id())
    }

    /// Live transport handle of the current session.
    pub fn handle(&self) -> Option<TransportHandle> {
        self.shared.current().and_then(|live| live.session.handle())
    }

    pub fn stats(&self) -> PublishStats {
        self.shared.stats.snapshot()
    }

    pub fn config(&self) -> &PublishConfig {
        &self.shared.config
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(error = %e, "release on drop failed");
        }
    }
}

/// Producer handle for encoder callback threads.
///
/// Outlives neither the encoder nor the [`Publisher`] meaningfully: after
/// the publisher is released, pushes are classified and dropped.
#[derive(Clone)]
pub struct FrameSink {
    shared: Arc<Shared>,
}

impl FrameSink {
    pub fn push(&self, kind: StreamKind, unit: EncodedUnit) {
        self.shared.push(kind, unit);
    }

    pub fn push_video(&self, data: impl Into<Bytes>, timestamp_us: i64) {
        self.push(StreamKind::Video, EncodedUnit::new(data, timestamp_us));
    }

    pub fn push_audio(&self, data: impl Into<Bytes>, timestamp_us: i64) {
        self.push(StreamKind::Audio, EncodedUnit::new(data, timestamp_us));
    }

    pub fn is_publishing(&self) -> bool {
        self.shared.is_publishing()
    }
}

impl Shared {
    fn current(&self) -> Option<Live> {
        self.live.read().clone()
    }

    fn is_publishing(&self) -> bool {
        self.live
            .read()
            .as_ref()
            .is_some_and(|live| live.session.is_publishing())
    }

    fn gate(&self, kind: StreamKind) -> &Mutex<SyncGate> {
        match kind {
            StreamKind::Video => &self.video,
            StreamKind::Audio => &self.audio,
        }
    }

    fn push(&self, kind: StreamKind, unit: EncodedUnit) {
        let frames = match self.classifier.classify(&unit, kind) {
            Ok(frames) => frames,
            Err(error) => {
                StatsCounters::incr(&self.stats.framing_errors);
                tracing::warn!(stream = ?kind, size = unit.data.len(), %error, "unit dropped");
                self.events
                    .emit(PublishEvent::FramingFailed { stream: kind, error });
                return;
            }
        };
        if frames.is_empty() {
            return;
        }

        let mut missing_sync = false;
        {
            // Held across enqueue so per-stream order matches arrival order.
            let mut gate = self.gate(kind).lock();
            let live = self.live.read();
            let Some(live) = live.as_ref().filter(|live| live.session.is_publishing()) else {
                for _ in &frames {
                    StatsCounters::incr(&self.stats.frames_dropped);
                }
                tracing::trace!(stream = ?kind, "not publishing, frames dropped");
                return;
            };

            for frame in frames {
                match gate.admit(live.session.id(), &frame) {
                    Admission::Forward => {
                        StatsCounters::incr(&self.stats.frames_enqueued);
                        live.queue.enqueue(DispatchTask::Frame(frame));
                    }
                    Admission::RepeatedSync => {
                        tracing::debug!(stream = ?kind, "repeated sync frame suppressed");
                    }
                    Admission::MissingSync => {
                        StatsCounters::incr(&self.stats.frames_dropped);
                        tracing::debug!(
                            stream = ?kind,
                            frame = ?frame.kind(),
                            "data before sync, dropped"
                        );
                        missing_sync = true;
                    }
                }
            }
        }

        if missing_sync {
            self.events.emit(PublishEvent::MissingSync { stream: kind });
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Admission {
    Forward,
    RepeatedSync,
    MissingSync,
}

/// Per-stream sync-before-data gate, reset for every session.
#[derive(Debug, Default)]
struct SyncGate {
    session_id: u64,
    last_sync: Option<ClassifiedFrame>,
}

impl SyncGate {
    fn admit(&mut self, session_id: u64, frame: &ClassifiedFrame) -> Admission {
        if self.session_id != session_id {
            self.session_id = session_id;
            self.last_sync = None;
        }

        if frame.is_sync() {
            if self
                .last_sync
                .as_ref()
                .is_some_and(|last| last.same_sync_as(frame))
            {
                return Admission::RepeatedSync;
            }
            self.last_sync = Some(frame.clone());
            Admission::Forward
        } else if self.last_sync.is_some() {
            Admission::Forward
        } else {
            Admission::MissingSync
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_sync(sps: &'static [u8]) -> ClassifiedFrame {
        ClassifiedFrame::VideoSync {
            sps: Bytes::from_static(sps),
            pps: Bytes::from_static(&[0x68, 0xCE, 0x06, 0xE2]),
            timestamp_ms: 0,
        }
    }

    fn video_data() -> ClassifiedFrame {
        ClassifiedFrame::VideoData {
            nal: Bytes::from_static(&[0, 0, 0, 1, 0x41, 0x9A]),
            keyframe: false,
            timestamp_ms: 33,
        }
    }

    #[test]
    fn gate_drops_data_before_sync() {
        let mut gate = SyncGate::default();
        assert_eq!(gate.admit(1, &video_data()), Admission::MissingSync);
        assert_eq!(gate.admit(1, &video_sync(&[0x67, 0x42])), Admission::Forward);
        assert_eq!(gate.admit(1, &video_data()), Admission::Forward);
    }

    #[test]
    fn gate_suppresses_identical_sync() {
        let mut gate = SyncGate::default();
        assert_eq!(gate.admit(1, &video_sync(&[0x67, 0x42])), Admission::Forward);
        assert_eq!(
            gate.admit(1, &video_sync(&[0x67, 0x42])),
            Admission::RepeatedSync
        );
        // Changed parameters restart the stream.
        assert_eq!(gate.admit(1, &video_sync(&[0x67, 0x4D])), Admission::Forward);
    }

    #[test]
    fn gate_resets_on_new_session() {
        let mut gate = SyncGate::default();
        gate.admit(1, &video_sync(&[0x67, 0x42]));
        assert_eq!(gate.admit(2, &video_data()), Admission::MissingSync);
        assert_eq!(gate.admit(2, &video_sync(&[0x67, 0x42])), Admission::Forward);
    }
}
