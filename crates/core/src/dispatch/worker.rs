use std::ops::ControlFlow;
use std::sync::Arc;

use super::{DispatchReceiver, DispatchTask};
use crate::event::{Events, PublishEvent, StatsCounters};
use crate::media::ClassifiedFrame;
use crate::session::{PublishSession, SessionState};
use crate::transport::{ConnectParams, Transport, TransportHandle};

/// Executes dispatch tasks against the transport on the worker thread.
///
/// Sole owner of the transport and of the live handle for one session.
pub(crate) struct Dispatcher {
    transport: Box<dyn Transport>,
    session: Arc<PublishSession>,
    handle: Option<TransportHandle>,
    events: Events,
    stats: Arc<StatsCounters>,
}

impl Dispatcher {
    pub fn new(
        transport: Box<dyn Transport>,
        session: Arc<PublishSession>,
        events: Events,
        stats: Arc<StatsCounters>,
    ) -> Self {
        Self {
            transport,
            session,
            handle: None,
            events,
            stats,
        }
    }

    /// Run the dispatch loop to completion and hand the transport back.
    pub fn run(mut self, rx: DispatchReceiver) -> Box<dyn Transport> {
        tracing::debug!(session_id = self.session.id(), "dispatch worker started");
        rx.run_loop(|task| self.execute(task));
        // Shutdown leaves the session open; close it here.
        self.finish();
        self.transport
    }

    fn execute(&mut self, task: DispatchTask) -> ControlFlow<()> {
        match task {
            DispatchTask::Connect(params) => {
                self.connect(&params);
                ControlFlow::Continue(())
            }
            DispatchTask::Frame(frame) => {
                self.send(&frame);
                ControlFlow::Continue(())
            }
            DispatchTask::Stop => {
                self.finish();
                ControlFlow::Break(())
            }
            DispatchTask::Shutdown => ControlFlow::Break(()),
        }
    }

    fn connect(&mut self, params: &ConnectParams) {
        let session_id = self.session.id();
        if self.session.state() != SessionState::Connecting {
            tracing::debug!(session_id, state = ?self.session.state(), "connect skipped");
            return;
        }

        tracing::info!(
            session_id,
            url = %params.url,
            width = params.width,
            height = params.height,
            timeout_ms = params.timeout_ms,
            "connecting"
        );

        match self.transport.connect(params) {
            Ok(handle) => {
                self.handle = Some(handle);
                if let Some(from) = self.session.connected(handle) {
                    tracing::info!(session_id, %handle, "publishing");
                    self.state_changed(from, SessionState::Publishing);
                }
            }
            Err(error) => {
                tracing::error!(session_id, url = %params.url, code = error.code, "connect failed");
                self.events
                    .emit(PublishEvent::ConnectFailed { session_id, error });
                if let Some(from) = self.session.connect_failed() {
                    self.state_changed(from, SessionState::Idle);
                }
            }
        }
    }

    fn send(&mut self, frame: &ClassifiedFrame) {
        let Some(handle) = self.handle else {
            tracing::trace!(kind = ?frame.kind(), "not connected, frame dropped");
            return;
        };

        let result = match frame {
            ClassifiedFrame::VideoSync {
                sps,
                pps,
                timestamp_ms,
            } => self
                .transport
                .send_sync_video(handle, sps, pps, *timestamp_ms),
            ClassifiedFrame::VideoData {
                nal, timestamp_ms, ..
            } => self.transport.send_video_data(handle, nal, *timestamp_ms),
            ClassifiedFrame::AudioSync { spec, .. } => self.transport.send_sync_audio(handle, spec),
            ClassifiedFrame::AudioData {
                frame,
                timestamp_ms,
            } => self.transport.send_audio_data(handle, frame, *timestamp_ms),
        };

        match result {
            Ok(()) => {
                StatsCounters::incr(&self.stats.frames_sent);
                tracing::trace!(
                    kind = ?frame.kind(),
                    bytes = frame.payload_len(),
                    timestamp_ms = frame.timestamp_ms(),
                    "frame sent"
                );
            }
            Err(error) => {
                StatsCounters::incr(&self.stats.send_failures);
                tracing::warn!(kind = ?frame.kind(), code = error.code, "send failed");
                self.events.emit(PublishEvent::SendFailed {
                    kind: frame.kind(),
                    error,
                });
            }
        }
    }

    /// Close the live connection, if any, and end the session. Idempotent.
    fn finish(&mut self) {
        if let Some(handle) = self.handle.take() {
            match self.transport.disconnect(handle) {
                Ok(()) => tracing::info!(session_id = self.session.id(), %handle, "disconnected"),
                Err(error) => {
                    tracing::warn!(
                        session_id = self.session.id(),
                        code = error.code,
                        "disconnect failed"
                    );
                    self.events.emit(PublishEvent::DisconnectFailed { error });
                }
            }
        }

        if let Some(from) = self.session.finish_stop() {
            self.state_changed(from, SessionState::Stopped);
        }
    }

    fn state_changed(&self, from: SessionState, to: SessionState) {
        self.events.emit(PublishEvent::StateChanged {
            session_id: self.session.id(),
            from,
            to,
        });
    }
}
