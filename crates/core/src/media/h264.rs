use bytes::Bytes;

use super::{ClassifiedFrame, EncodedUnit};
use crate::config::PpsPolicy;
use crate::error::FramingError;

const START_CODE_4: [u8; 4] = [0, 0, 0, 1];
const START_CODE_3: [u8; 3] = [0, 0, 1];

/// Bytes behind the SPS in the fixed-width layout: start code + 4-byte PPS.
const FIXED_PPS_TAIL: usize = START_CODE_4.len() + FIXED_PPS_LEN;
const FIXED_PPS_LEN: usize = 4;

/// H.264 NAL unit type (ITU-T H.264 Table 7-1), low five bits of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalType {
    Slice,
    SliceDpa,
    SliceDpb,
    SliceDpc,
    SliceIdr,
    Sei,
    Sps,
    Pps,
    Aud,
    Filler,
    Other(u8),
}

impl NalType {
    pub fn from_header(header: u8) -> Self {
        match header & 0x1f {
            1 => Self::Slice,
            2 => Self::SliceDpa,
            3 => Self::SliceDpb,
            4 => Self::SliceDpc,
            5 => Self::SliceIdr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            12 => Self::Filler,
            other => Self::Other(other),
        }
    }

    /// Slice types forwarded to the transport as video data.
    pub fn is_slice(self) -> bool {
        matches!(self, Self::Slice | Self::SliceIdr)
    }
}

/// Length of the start code at the head of `data`.
///
/// Byte 2 decides: `0x01` means a 3-byte code (`00 00 01`), anything else
/// a 4-byte code (`00 00 00 01`). The prefix must then match exactly.
pub fn start_code_len(data: &[u8]) -> Result<usize, FramingError> {
    if data.is_empty() {
        return Err(FramingError::Empty);
    }
    if data.len() < START_CODE_3.len() {
        return Err(FramingError::Truncated {
            needed: START_CODE_3.len(),
            actual: data.len(),
        });
    }

    if data[2] == 0x01 {
        if data[..3] == START_CODE_3 {
            return Ok(3);
        }
        return Err(FramingError::MissingStartCode);
    }

    if data.len() < START_CODE_4.len() {
        return Err(FramingError::Truncated {
            needed: START_CODE_4.len(),
            actual: data.len(),
        });
    }
    if data[..4] == START_CODE_4 {
        Ok(4)
    } else {
        Err(FramingError::MissingStartCode)
    }
}

/// One NAL unit located inside an Annex B buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    /// Offset of this NAL's start code within the scanned buffer.
    pub offset: usize,
    /// NAL bytes without the start code (header byte first).
    pub payload: Bytes,
}

impl NalUnit {
    pub fn nal_type(&self) -> Option<NalType> {
        self.payload.first().copied().map(NalType::from_header)
    }
}

/// Extract NAL units from an H.264 Annex B bitstream.
///
/// Scans for start codes (both 4-byte `00 00 00 01` and 3-byte
/// `00 00 01`) and returns the NAL data between them, excluding
/// the start codes themselves. Payloads share the input allocation.
///
/// The start code length is tracked per-NAL to ensure boundaries
/// between adjacent NALs are computed correctly when mixed 3-byte
/// and 4-byte start codes appear.
pub fn extract_nal_units(data: &Bytes) -> Vec<NalUnit> {
    let mut nal_units = Vec::new();
    let mut i = 0usize;

    // (nal_data_start_index, start_code_length)
    let mut start_entries: Vec<(usize, usize)> = Vec::new();

    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == START_CODE_4 {
            start_entries.push((i + 4, 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == START_CODE_3 {
            start_entries.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    for (idx, &(start, sc_len)) in start_entries.iter().enumerate() {
        let end = match start_entries.get(idx + 1) {
            Some(&(next_start, next_sc_len)) => next_start - next_sc_len,
            None => data.len(),
        };

        if start < end {
            nal_units.push(NalUnit {
                offset: start - sc_len,
                payload: data.slice(start..end),
            });
        }
    }

    nal_units
}

/// H.264 encoder-output classifier.
///
/// Each encoder buffer is expected to hold either the codec configuration
/// (SPS immediately followed by PPS) or a single slice NAL:
///
/// ```text
/// parameter sets:  [00 00 00 01][SPS ...][00 00 00 01][PPS]
/// slice:           [00 00 00 01][NAL hdr][slice data ...]
/// ```
///
/// How the PPS is located is governed by [`PpsPolicy`]:
///
/// - [`PpsPolicy::FixedWidth`]: the PPS is the trailing 4 bytes behind a
///   4-byte start code, as emitted by the hardware encoders this pipeline
///   was built against. The SPS is everything between the leading start
///   code and that tail (`size - 12` bytes for a 4-byte leading code).
/// - [`PpsPolicy::ScanStartCode`]: NAL boundaries are found by scanning
///   for start codes, so PPS of any length is handled.
///
/// Slices (type 1 and 5) are forwarded whole, start code included. Every
/// other NAL type is dropped.
#[derive(Debug, Clone, Default)]
pub struct H264Demuxer {
    pps_policy: PpsPolicy,
}

impl H264Demuxer {
    pub fn new(pps_policy: PpsPolicy) -> Self {
        Self { pps_policy }
    }

    pub fn pps_policy(&self) -> PpsPolicy {
        self.pps_policy
    }

    pub fn classify(&self, unit: &EncodedUnit) -> Result<Vec<ClassifiedFrame>, FramingError> {
        let data = &unit.data;
        let offset = start_code_len(data)?;
        let header = *data.get(offset).ok_or(FramingError::Truncated {
            needed: offset + 1,
            actual: data.len(),
        })?;
        let nal_type = NalType::from_header(header);
        let timestamp_ms = unit.timestamp_ms();

        tracing::trace!(
            ?nal_type,
            start_code = offset,
            size = data.len(),
            timestamp_ms,
            "video unit"
        );

        match nal_type {
            NalType::Sps => match self.pps_policy {
                PpsPolicy::FixedWidth => {
                    Self::fixed_width_parameter_sets(data, offset, timestamp_ms).map(|f| vec![f])
                }
                PpsPolicy::ScanStartCode => Self::scanned_parameter_sets(data, timestamp_ms),
            },
            t if t.is_slice() => Ok(vec![ClassifiedFrame::VideoData {
                nal: data.clone(),
                keyframe: t == NalType::SliceIdr,
                timestamp_ms,
            }]),
            _ => Ok(Vec::new()),
        }
    }

    fn fixed_width_parameter_sets(
        data: &Bytes,
        offset: usize,
        timestamp_ms: i64,
    ) -> Result<ClassifiedFrame, FramingError> {
        // At least one SPS byte between the two start codes.
        let needed = offset + 1 + FIXED_PPS_TAIL;
        if data.len() < needed {
            return Err(FramingError::Truncated {
                needed,
                actual: data.len(),
            });
        }

        // The second start code is skipped unread, as the encoder lays it out.
        let sps_end = data.len() - FIXED_PPS_TAIL;
        let pps_start = data.len() - FIXED_PPS_LEN;
        let sps = data.slice(offset..sps_end);
        let pps = data.slice(pps_start..);
        tracing::debug!(sps_len = sps.len(), pps_len = pps.len(), "parameter sets");

        Ok(ClassifiedFrame::VideoSync {
            sps,
            pps,
            timestamp_ms,
        })
    }

    fn scanned_parameter_sets(
        data: &Bytes,
        timestamp_ms: i64,
    ) -> Result<Vec<ClassifiedFrame>, FramingError> {
        let nals = extract_nal_units(data);

        let sps = nals
            .first()
            .filter(|nal| nal.nal_type() == Some(NalType::Sps))
            .ok_or(FramingError::SpsNotFound)?;
        let pps = nals
            .iter()
            .skip(1)
            .find(|nal| nal.nal_type() == Some(NalType::Pps))
            .ok_or(FramingError::PpsNotFound)?;

        tracing::debug!(
            sps_len = sps.payload.len(),
            pps_len = pps.payload.len(),
            nal_count = nals.len(),
            "parameter sets"
        );

        let mut frames = vec![ClassifiedFrame::VideoSync {
            sps: sps.payload.clone(),
            pps: pps.payload.clone(),
            timestamp_ms,
        }];

        // Some encoders prepend parameter sets to the first IDR.
        if let Some(slice) = nals
            .iter()
            .find(|nal| nal.nal_type().is_some_and(NalType::is_slice))
        {
            frames.push(ClassifiedFrame::VideoData {
                nal: data.slice(slice.offset..),
                keyframe: slice.nal_type() == Some(NalType::SliceIdr),
                timestamp_ms,
            });
        }

        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parameter-set buffer captured from a hardware encoder.
    const PARAMETER_SETS: [u8; 25] = [
        0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0xC0, 0x0D, 0xDA, 0x05, 0x82, 0x5A, 0x01, 0xE1, 0x10,
        0x8D, 0x40, 0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x06, 0xE2,
    ];

    fn unit(data: &[u8], timestamp_us: i64) -> EncodedUnit {
        EncodedUnit::new(data.to_vec(), timestamp_us)
    }

    fn fixed() -> H264Demuxer {
        H264Demuxer::new(PpsPolicy::FixedWidth)
    }

    fn scanning() -> H264Demuxer {
        H264Demuxer::new(PpsPolicy::ScanStartCode)
    }

    // --- Start codes ---

    #[test]
    fn start_code_4byte() {
        assert_eq!(start_code_len(&[0, 0, 0, 1, 0x65]), Ok(4));
    }

    #[test]
    fn start_code_3byte() {
        assert_eq!(start_code_len(&[0, 0, 1, 0x65]), Ok(3));
    }

    #[test]
    fn start_code_missing() {
        assert_eq!(
            start_code_len(&[0xFF, 0, 0, 1, 0x65]),
            Err(FramingError::MissingStartCode)
        );
        assert_eq!(
            start_code_len(&[1, 0, 1, 0x65]),
            Err(FramingError::MissingStartCode)
        );
    }

    #[test]
    fn start_code_short_buffers() {
        assert_eq!(start_code_len(&[]), Err(FramingError::Empty));
        assert!(matches!(
            start_code_len(&[0, 0]),
            Err(FramingError::Truncated { needed: 3, .. })
        ));
        assert!(matches!(
            start_code_len(&[0, 0, 0]),
            Err(FramingError::Truncated { needed: 4, .. })
        ));
    }

    #[test]
    fn nal_type_from_header_masks_nri() {
        assert_eq!(NalType::from_header(0x67), NalType::Sps);
        assert_eq!(NalType::from_header(0x68), NalType::Pps);
        assert_eq!(NalType::from_header(0x65), NalType::SliceIdr);
        assert_eq!(NalType::from_header(0x41), NalType::Slice);
        assert_eq!(NalType::from_header(0x0C), NalType::Filler);
        assert_eq!(NalType::from_header(0x0E), NalType::Other(14));
    }

    // --- NAL extraction ---

    #[test]
    fn extract_two_nals_4byte_sc() {
        let mut data = vec![0, 0, 0, 1, 0x67, 0x42];
        data.extend_from_slice(&[0, 0, 0, 1, 0x68, 0xCE]);
        let nals = extract_nal_units(&Bytes::from(data));
        assert_eq!(nals.len(), 2);
        assert_eq!(nals[0].payload.as_ref(), &[0x67, 0x42]);
        assert_eq!(nals[0].offset, 0);
        assert_eq!(nals[1].payload.as_ref(), &[0x68, 0xCE]);
        assert_eq!(nals[1].offset, 6);
    }

    #[test]
    fn extract_mixed_start_codes() {
        let mut data = vec![0, 0, 0, 1, 0x67, 0x42];
        data.extend_from_slice(&[0, 0, 1, 0x68, 0xCE]);
        let nals = extract_nal_units(&Bytes::from(data));
        assert_eq!(nals.len(), 2);
        assert_eq!(nals[1].payload.as_ref(), &[0x68, 0xCE]);
        assert_eq!(nals[1].offset, 6);
        assert_eq!(nals[1].nal_type(), Some(NalType::Pps));
    }

    #[test]
    fn extract_no_start_code() {
        assert!(extract_nal_units(&Bytes::from_static(&[0xFF, 0xFE])).is_empty());
    }

    // --- Fixed-width parameter sets ---

    #[test]
    fn fixed_width_splits_24_byte_buffer() {
        let frames = fixed().classify(&unit(&PARAMETER_SETS[..24], 0)).unwrap();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            ClassifiedFrame::VideoSync { sps, pps, .. } => {
                assert_eq!(sps.len(), 12);
                assert_eq!(sps.as_ref(), &PARAMETER_SETS[4..16]);
                assert_eq!(pps.as_ref(), &PARAMETER_SETS[20..24]);
            }
            other => panic!("expected VideoSync, got {other:?}"),
        }
    }

    #[test]
    fn fixed_width_splits_full_capture() {
        let frames = fixed().classify(&unit(&PARAMETER_SETS, 0)).unwrap();
        match &frames[0] {
            ClassifiedFrame::VideoSync { sps, pps, .. } => {
                assert_eq!(sps.as_ref(), &PARAMETER_SETS[4..17]);
                assert_eq!(pps.as_ref(), &[0x68, 0xCE, 0x06, 0xE2]);
            }
            other => panic!("expected VideoSync, got {other:?}"),
        }
    }

    #[test]
    fn fixed_width_sps_starts_after_3byte_start_code() {
        let data = [
            0x00, 0x00, 0x01, 0x67, 0x42, 0xC0, 0x0D, 0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x06,
            0xE2,
        ];
        let frames = fixed().classify(&unit(&data, 0)).unwrap();
        match &frames[0] {
            ClassifiedFrame::VideoSync { sps, pps, .. } => {
                // size - 11 bytes: the SPS header byte is kept, not skipped.
                assert_eq!(sps.as_ref(), &[0x67, 0x42, 0xC0, 0x0D]);
                assert_eq!(pps.as_ref(), &[0x68, 0xCE, 0x06, 0xE2]);
            }
            other => panic!("expected VideoSync, got {other:?}"),
        }
    }

    #[test]
    fn fixed_width_too_short_is_truncated() {
        let data = [0, 0, 0, 1, 0x67, 0, 0, 0, 1, 0x68];
        assert!(matches!(
            fixed().classify(&unit(&data, 0)),
            Err(FramingError::Truncated { needed: 13, .. })
        ));
    }

    #[test]
    fn sync_timestamp_truncates_to_millis() {
        let frames = fixed().classify(&unit(&PARAMETER_SETS, 66_999)).unwrap();
        assert_eq!(frames[0].timestamp_ms(), 66);
    }

    // --- Scanned parameter sets ---

    #[test]
    fn scan_matches_fixed_width_on_encoder_layout() {
        let u = unit(&PARAMETER_SETS, 0);
        assert_eq!(
            fixed().classify(&u).unwrap(),
            scanning().classify(&u).unwrap()
        );
    }

    #[test]
    fn scan_finds_long_pps() {
        let data = [
            &[0u8, 0, 0, 1, 0x67, 0x64, 0x00, 0x28, 0xAC][..],
            &[0, 0, 0, 1, 0x68, 0xEE, 0x3C, 0xB0, 0x01, 0x02][..],
        ]
        .concat();
        let frames = scanning().classify(&unit(&data, 0)).unwrap();
        match &frames[0] {
            ClassifiedFrame::VideoSync { sps, pps, .. } => {
                assert_eq!(sps.as_ref(), &[0x67, 0x64, 0x00, 0x28, 0xAC]);
                assert_eq!(pps.as_ref(), &[0x68, 0xEE, 0x3C, 0xB0, 0x01, 0x02]);
            }
            other => panic!("expected VideoSync, got {other:?}"),
        }

        // The fixed layout would cut the same buffer differently.
        assert_ne!(fixed().classify(&unit(&data, 0)).unwrap(), frames);
    }

    #[test]
    fn scan_splits_parameter_sets_and_idr() {
        let data = [
            &[0u8, 0, 0, 1, 0x67, 0x42, 0x00, 0x1e][..],
            &[0, 0, 0, 1, 0x68, 0xce, 0x38, 0x80, 0x11][..],
            &[0, 0, 1, 0x65, 0x88, 0x00][..],
        ]
        .concat();
        let frames = scanning().classify(&unit(&data, 0)).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_sync());
        match &frames[1] {
            ClassifiedFrame::VideoData { nal, keyframe, .. } => {
                assert!(keyframe);
                assert_eq!(nal.as_ref(), &[0, 0, 1, 0x65, 0x88, 0x00]);
            }
            other => panic!("expected VideoData, got {other:?}"),
        }
    }

    #[test]
    fn scan_without_pps_fails() {
        let data = [0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1e];
        assert_eq!(
            scanning().classify(&unit(&data, 0)).unwrap_err(),
            FramingError::PpsNotFound
        );
    }

    // --- Slices ---

    #[test]
    fn idr_slice_is_keyframe_with_whole_buffer() {
        let data = [0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00];
        let frames = fixed().classify(&unit(&data, 40_000)).unwrap();
        assert_eq!(
            frames,
            vec![ClassifiedFrame::VideoData {
                nal: Bytes::copy_from_slice(&data),
                keyframe: true,
                timestamp_ms: 40,
            }]
        );
    }

    #[test]
    fn non_idr_slice_is_not_keyframe() {
        let frames = fixed()
            .classify(&unit(&[0, 0, 0, 1, 0x41, 0x9A], 0))
            .unwrap();
        assert!(matches!(
            frames[0],
            ClassifiedFrame::VideoData {
                keyframe: false,
                ..
            }
        ));
    }

    #[test]
    fn three_and_four_byte_start_codes_agree_on_type() {
        let four = fixed()
            .classify(&unit(&[0, 0, 0, 1, 0x65, 0xAA], 0))
            .unwrap();
        let three = fixed().classify(&unit(&[0, 0, 1, 0x65, 0xAA], 0)).unwrap();
        assert_eq!(four[0].kind(), three[0].kind());
        assert!(matches!(three[0], ClassifiedFrame::VideoData { keyframe: true, .. }));
    }

    #[test]
    fn unforwarded_nal_types_are_dropped() {
        for header in [0x02, 0x03, 0x04, 0x06, 0x09, 0x0C] {
            let frames = fixed()
                .classify(&unit(&[0, 0, 0, 1, header, 0xFF], 0))
                .unwrap();
            assert!(frames.is_empty(), "NAL header {header:#04x} forwarded");
        }
    }

    #[test]
    fn start_code_without_header_is_truncated() {
        assert_eq!(
            fixed().classify(&unit(&[0, 0, 0, 1], 0)).unwrap_err(),
            FramingError::Truncated {
                needed: 5,
                actual: 4
            }
        );
    }
}
