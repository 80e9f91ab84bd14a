use std::time::Duration;

use crate::error::{PublishError, Result};
use crate::transport::ConnectParams;

/// How the H.264 classifier locates the PPS in a parameter-set buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PpsPolicy {
    /// PPS is the trailing 4 bytes behind a 4-byte start code.
    ///
    /// Matches the hardware encoders the pipeline was built against, and
    /// cuts any other layout wrongly.
    #[default]
    FixedWidth,
    /// Find the PPS by scanning for the next start code.
    ScanStartCode,
}

/// Capture dimensions negotiated with the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSize {
    pub width: u32,
    pub height: u32,
}

impl VideoSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Swap axes, for portrait capture rotated by 90°.
    pub fn transposed(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }
}

/// Publish configuration, immutable for the lifetime of one session.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Ingest URL (`rtmp://` or `rtmps://`).
    pub url: String,
    /// Target capture frame rate.
    pub fps: u32,
    /// Smallest acceptable capture width.
    pub min_width: u32,
    /// Largest acceptable capture width.
    pub max_width: u32,
    /// Transport connect timeout.
    pub connect_timeout: Duration,
    /// PPS locating rule for H.264 parameter sets.
    pub pps_policy: PpsPolicy,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            url: "rtmp://127.0.0.1:1935/live/stream".to_string(),
            fps: 30,
            min_width: 320,
            max_width: 720,
            connect_timeout: Duration::from_secs(5),
            pps_policy: PpsPolicy::default(),
        }
    }
}

impl PublishConfig {
    /// Default configuration publishing to `url`.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("rtmp://") || self.url.starts_with("rtmps://")) {
            return Err(PublishError::invalid_config(
                "url",
                format!("expected rtmp:// or rtmps:// scheme, got {:?}", self.url),
            ));
        }
        if self.fps == 0 {
            return Err(PublishError::invalid_config("fps", "must be positive"));
        }
        if self.min_width > self.max_width {
            return Err(PublishError::invalid_config(
                "min_width",
                format!("{} exceeds max_width {}", self.min_width, self.max_width),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(PublishError::invalid_config(
                "connect_timeout",
                "must be positive",
            ));
        }
        if self.timeout_ms().is_none() {
            return Err(PublishError::invalid_config(
                "connect_timeout",
                "does not fit in i32 milliseconds",
            ));
        }
        Ok(())
    }

    /// Widest candidate whose width lies within `min_width..=max_width`.
    pub fn pick_capture_size(&self, candidates: &[VideoSize]) -> Option<VideoSize> {
        candidates
            .iter()
            .filter(|size| (self.min_width..=self.max_width).contains(&size.width))
            .max_by_key(|size| (size.width, size.height))
            .copied()
    }

    /// Connect arguments for a session publishing at `size`.
    pub fn connect_params(&self, size: VideoSize) -> ConnectParams {
        ConnectParams {
            url: self.url.clone(),
            width: size.width,
            height: size.height,
            timeout_ms: self.timeout_ms().unwrap_or(i32::MAX),
        }
    }

    fn timeout_ms(&self) -> Option<i32> {
        i32::try_from(self.connect_timeout.as_millis()).ok()
    }
}
