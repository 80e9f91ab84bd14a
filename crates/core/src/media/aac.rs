use super::{ClassifiedFrame, EncodedUnit};
use crate::error::FramingError;

/// Size of an AudioSpecificConfig for AAC-LC (ISO 14496-3 §1.6.2.1):
/// 5 bits object type, 4 bits frequency index, 4 bits channel config.
pub const AUDIO_SPECIFIC_CONFIG_LEN: usize = 2;

/// AAC encoder-output classifier.
///
/// The encoder emits its codec-config record once, as a buffer of exactly
/// [`AUDIO_SPECIFIC_CONFIG_LEN`] bytes, before any raw (ADTS-less) frame.
/// Every other buffer is a raw frame and is forwarded whole.
#[derive(Debug, Clone, Copy, Default)]
pub struct AacDemuxer;

impl AacDemuxer {
    pub fn classify(&self, unit: &EncodedUnit) -> Result<ClassifiedFrame, FramingError> {
        let timestamp_ms = unit.timestamp_ms();
        match unit.data.len() {
            len if len < AUDIO_SPECIFIC_CONFIG_LEN => Err(FramingError::AudioTooShort(len)),
            AUDIO_SPECIFIC_CONFIG_LEN => {
                tracing::debug!(spec = ?unit.data.as_ref(), "AAC config record");
                Ok(ClassifiedFrame::AudioSync {
                    spec: unit.data.clone(),
                    timestamp_ms,
                })
            }
            _ => Ok(ClassifiedFrame::AudioData {
                frame: unit.data.clone(),
                timestamp_ms,
            }),
        }
    }
}
