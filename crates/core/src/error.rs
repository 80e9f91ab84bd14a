//! Error types for the publish pipeline.

/// Fatal errors returned from constructors and lifecycle calls.
///
/// Runtime failures on producer threads and on the dispatch worker are
/// never returned here; they are contained, logged, and reported through
/// [`PublishEvent`](crate::PublishEvent) instead:
///
/// - **Framing**: [`FramingError`] via [`PublishEvent::FramingFailed`](crate::PublishEvent::FramingFailed).
/// - **Transport**: [`TransportError`] via [`PublishEvent::ConnectFailed`](crate::PublishEvent::ConnectFailed)
///   and [`PublishEvent::SendFailed`](crate::PublishEvent::SendFailed).
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Underlying I/O error (worker thread spawn, file access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// [`PublishConfig::validate`](crate::PublishConfig::validate) rejected a field.
    #[error("invalid config: {field}: {reason}")]
    InvalidConfig {
        field: &'static str,
        reason: String,
    },

    /// The dispatch worker panicked; its transport went down with it.
    #[error("dispatch worker panicked")]
    WorkerPanicked,

    /// The transport was lost to an earlier worker failure.
    #[error("transport unavailable after an earlier worker failure")]
    TransportUnavailable,
}

impl PublishError {
    pub(crate) fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}

/// An encoder buffer that could not be framed.
///
/// The unit is dropped; publishing continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// Zero-length buffer.
    #[error("empty buffer")]
    Empty,

    /// Buffer ends before the NAL header byte or a fixed-width field.
    #[error("buffer truncated: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    /// Video buffer does not begin with an Annex B start code.
    #[error("missing Annex B start code")]
    MissingStartCode,

    /// Start-code scan found no PPS behind the SPS.
    #[error("PPS not found in parameter-set buffer")]
    PpsNotFound,

    /// Parameter-set buffer whose first NAL is not an SPS.
    #[error("SPS not found in parameter-set buffer")]
    SpsNotFound,

    /// Audio buffer shorter than the 2-byte AAC config record.
    #[error("audio buffer of {0} bytes is shorter than an AAC config record")]
    AudioTooShort(usize),
}

/// Negative status returned by the native transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("transport returned status {code}")]
pub struct TransportError {
    pub code: i32,
}

impl TransportError {
    pub fn new(code: i32) -> Self {
        Self { code }
    }

    /// Map a raw native status to a result: negative is failure.
    ///
    /// ```
    /// use publish::TransportError;
    ///
    /// assert!(TransportError::check(0).is_ok());
    /// assert!(TransportError::check(17).is_ok());
    /// assert_eq!(TransportError::check(-3), Err(TransportError::new(-3)));
    /// ```
    pub fn check(status: i32) -> std::result::Result<(), TransportError> {
        if status < 0 {
            Err(Self::new(status))
        } else {
            Ok(())
        }
    }
}

/// Convenience alias for `Result<T, PublishError>`.
pub type Result<T> = std::result::Result<T, PublishError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_display() {
        let err = PublishError::invalid_config("fps", "must be positive");
        assert_eq!(err.to_string(), "invalid config: fps: must be positive");
    }

    #[test]
    fn truncated_display() {
        let err = FramingError::Truncated {
            needed: 13,
            actual: 6,
        };
        assert_eq!(err.to_string(), "buffer truncated: need 13 bytes, got 6");
    }

    #[test]
    fn audio_too_short_display() {
        let err = FramingError::AudioTooShort(1);
        assert!(err.to_string().starts_with("audio buffer of 1 bytes"));
    }

    #[test]
    fn transport_error_check_zero_is_ok() {
        assert_eq!(TransportError::check(0), Ok(()));
        assert_eq!(TransportError::check(-1).unwrap_err().code, -1);
    }
}
