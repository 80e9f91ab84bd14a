//! Live-publishing pipeline for an RTMP-style ingest transport.
//!
//! Encoder output (H.264 Annex B and raw AAC) is classified into sync and
//! data frames, queued in arrival order, and handed to a [`Transport`] by a
//! single dispatch worker per publish session.
//!
//! ```no_run
//! use publish::{Publisher, PublishConfig, VideoSize};
//! # fn demo(transport: impl publish::Transport + 'static) -> publish::Result<()> {
//! let publisher = Publisher::with_config(
//!     transport,
//!     PublishConfig::with_url("rtmp://ingest.example.com/live/key"),
//! )?;
//! publisher.start_publish(VideoSize::new(640, 480))?;
//! // encoder callbacks:
//! publisher.push_video(vec![0, 0, 0, 1, 0x65, 0x88], 33_000);
//! publisher.stop_publish();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod media;
pub mod publisher;
pub mod session;
pub mod transport;

pub use config::{PpsPolicy, PublishConfig, VideoSize};
pub use error::{FramingError, PublishError, Result, TransportError};
pub use event::{EventCallback, PublishEvent, PublishStats, event_callback};
pub use media::{ClassifiedFrame, EncodedUnit, FrameClassifier, FrameKind, StreamKind};
pub use publisher::{FrameSink, Publisher};
pub use session::SessionState;
pub use transport::{ConnectParams, Transport, TransportHandle, TransportResult};
