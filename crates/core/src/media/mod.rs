//! Encoder output classification.
//!
//! This module turns raw encoder buffers ([`EncodedUnit`]) into the
//! semantic messages an RTMP-style transport expects ([`ClassifiedFrame`]).
//!
//! ## Sync before data
//!
//! FLV-framed transports require one configuration message per stream kind
//! before any media of that kind:
//!
//! | Stream | Sync message | Data message |
//! |--------|--------------|--------------|
//! | H.264 | SPS + PPS ([`ClassifiedFrame::VideoSync`]) | slice NAL ([`ClassifiedFrame::VideoData`]) |
//! | AAC | AudioSpecificConfig ([`ClassifiedFrame::AudioSync`]) | raw frame ([`ClassifiedFrame::AudioData`]) |
//!
//! The classifier only recognises the kinds; ordering is preserved by the
//! dispatch queue and gated per session by the
//! [`Publisher`](crate::Publisher).
//!
//! ## Supported codecs
//!
//! | Codec | Module |
//! |-------|--------|
//! | H.264 Annex B | [`h264`] |
//! | AAC (raw, no ADTS) | [`aac`] |

pub mod aac;
pub mod h264;

use bytes::Bytes;

use crate::config::PpsPolicy;
use crate::error::FramingError;

pub use aac::AacDemuxer;
pub use h264::H264Demuxer;

/// Which encoder produced a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

/// One encoder output buffer.
///
/// Cloning is cheap: the payload is reference counted, and classified
/// frames slice into it rather than copying.
#[derive(Debug, Clone)]
pub struct EncodedUnit {
    /// Encoder output bytes.
    pub data: Bytes,
    /// Presentation timestamp on the producer clock, in microseconds.
    pub timestamp_us: i64,
}

impl EncodedUnit {
    pub fn new(data: impl Into<Bytes>, timestamp_us: i64) -> Self {
        Self {
            data: data.into(),
            timestamp_us,
        }
    }

    /// Timestamp in transport milliseconds.
    pub fn timestamp_ms(&self) -> i64 {
        micros_to_millis(self.timestamp_us)
    }
}

/// Microseconds to milliseconds by truncating integer division.
pub fn micros_to_millis(us: i64) -> i64 {
    us / 1000
}

/// A classified encoder buffer, ready to become one transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedFrame {
    /// H.264 sequence header: SPS and PPS without start codes.
    VideoSync {
        sps: Bytes,
        pps: Bytes,
        timestamp_ms: i64,
    },
    /// H.264 slice, start code included.
    VideoData {
        nal: Bytes,
        keyframe: bool,
        timestamp_ms: i64,
    },
    /// AAC AudioSpecificConfig record.
    AudioSync { spec: Bytes, timestamp_ms: i64 },
    /// One raw AAC frame.
    AudioData { frame: Bytes, timestamp_ms: i64 },
}

/// Discriminant of [`ClassifiedFrame`], used in events and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    VideoSync,
    VideoData,
    AudioSync,
    AudioData,
}

impl ClassifiedFrame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::VideoSync { .. } => FrameKind::VideoSync,
            Self::VideoData { .. } => FrameKind::VideoData,
            Self::AudioSync { .. } => FrameKind::AudioSync,
            Self::AudioData { .. } => FrameKind::AudioData,
        }
    }

    pub fn stream(&self) -> StreamKind {
        match self {
            Self::VideoSync { .. } | Self::VideoData { .. } => StreamKind::Video,
            Self::AudioSync { .. } | Self::AudioData { .. } => StreamKind::Audio,
        }
    }

    pub fn is_sync(&self) -> bool {
        matches!(self, Self::VideoSync { .. } | Self::AudioSync { .. })
    }

    pub fn timestamp_ms(&self) -> i64 {
        match self {
            Self::VideoSync { timestamp_ms, .. }
            | Self::VideoData { timestamp_ms, .. }
            | Self::AudioSync { timestamp_ms, .. }
            | Self::AudioData { timestamp_ms, .. } => *timestamp_ms,
        }
    }

    /// Payload size in bytes, summed over SPS and PPS for video sync.
    pub fn payload_len(&self) -> usize {
        match self {
            Self::VideoSync { sps, pps, .. } => sps.len() + pps.len(),
            Self::VideoData { nal, .. } => nal.len(),
            Self::AudioSync { spec, .. } => spec.len(),
            Self::AudioData { frame, .. } => frame.len(),
        }
    }

    /// Whether two frames carry the same sync record, ignoring timestamps.
    pub(crate) fn same_sync_as(&self, other: &ClassifiedFrame) -> bool {
        match (self, other) {
            (
                Self::VideoSync { sps, pps, .. },
                Self::VideoSync {
                    sps: other_sps,
                    pps: other_pps,
                    ..
                },
            ) => sps == other_sps && pps == other_pps,
            (Self::AudioSync { spec, .. }, Self::AudioSync { spec: other, .. }) => spec == other,
            _ => false,
        }
    }
}

/// Stateless entry point over both demuxers.
#[derive(Debug, Clone, Default)]
pub struct FrameClassifier {
    video: H264Demuxer,
    audio: AacDemuxer,
}

impl FrameClassifier {
    pub fn new(pps_policy: PpsPolicy) -> Self {
        Self {
            video: H264Demuxer::new(pps_policy),
            audio: AacDemuxer,
        }
    }

    /// Classify one encoder buffer.
    ///
    /// Returns zero frames for NAL types that are not forwarded (SEI, AUD,
    /// data partitions, filler), one frame in the common case, and more
    /// than one only when a start-code scan finds parameter sets and a
    /// slice in the same buffer.
    pub fn classify(
        &self,
        unit: &EncodedUnit,
        kind: StreamKind,
    ) -> Result<Vec<ClassifiedFrame>, FramingError> {
        match kind {
            StreamKind::Video => self.video.classify(unit),
            StreamKind::Audio => self.audio.classify(unit).map(|frame| vec![frame]),
        }
    }

    pub fn pps_policy(&self) -> PpsPolicy {
        self.video.pps_policy()
    }
}
