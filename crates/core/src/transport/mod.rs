//! Media-ingest transport boundary.
//!
//! The RTMP handshake, chunking and socket I/O live in a native transport
//! outside this crate. The pipeline sees it only through [`Transport`],
//! whose calls mirror the native entry points one to one:
//!
//! ```text
//! connect(url, w, h, timeout)         -> handle | negative status
//! send_sync_video(handle, sps, pps, ts)
//! send_video_data(handle, data, ts)
//! send_sync_audio(handle, spec)
//! send_audio_data(handle, data, ts)
//! disconnect(handle)
//! ```
//!
//! Every call is made from the single dispatch worker thread, so
//! implementations need `Send` but never `Sync`, and never see two calls
//! at once. Lengths are carried by the slices.

use std::fmt;

use crate::error::TransportError;

/// Opaque connection identifier returned by [`Transport::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportHandle(pub u64);

impl fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Arguments to [`Transport::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub timeout_ms: i32,
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Native RTMP-style publish transport.
///
/// Adapters over C entry points that return raw status codes can use
/// [`TransportError::check`] to map them.
pub trait Transport: Send {
    /// Open a publish connection and complete the handshake.
    fn connect(&mut self, params: &ConnectParams) -> TransportResult<TransportHandle>;

    /// Send the AVC sequence header built from SPS and PPS.
    fn send_sync_video(
        &mut self,
        handle: TransportHandle,
        sps: &[u8],
        pps: &[u8],
        timestamp_ms: i64,
    ) -> TransportResult<()>;

    /// Send one H.264 NAL unit.
    fn send_video_data(
        &mut self,
        handle: TransportHandle,
        data: &[u8],
        timestamp_ms: i64,
    ) -> TransportResult<()>;

    /// Send the AAC sequence header (AudioSpecificConfig).
    fn send_sync_audio(&mut self, handle: TransportHandle, spec: &[u8]) -> TransportResult<()>;

    /// Send one raw AAC frame.
    fn send_audio_data(
        &mut self,
        handle: TransportHandle,
        data: &[u8],
        timestamp_ms: i64,
    ) -> TransportResult<()>;

    /// Close the connection. The handle is not used again.
    fn disconnect(&mut self, handle: TransportHandle) -> TransportResult<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self, params: &ConnectParams) -> TransportResult<TransportHandle> {
        (**self).connect(params)
    }

    fn send_sync_video(
        &mut self,
        handle: TransportHandle,
        sps: &[u8],
        pps: &[u8],
        timestamp_ms: i64,
    ) -> TransportResult<()> {
        (**self).send_sync_video(handle, sps, pps, timestamp_ms)
    }

    fn send_video_data(
        &mut self,
        handle: TransportHandle,
        data: &[u8],
        timestamp_ms: i64,
    ) -> TransportResult<()> {
        (**self).send_video_data(handle, data, timestamp_ms)
    }

    fn send_sync_audio(&mut self, handle: TransportHandle, spec: &[u8]) -> TransportResult<()> {
        (**self).send_sync_audio(handle, spec)
    }

    fn send_audio_data(
        &mut self,
        handle: TransportHandle,
        data: &[u8],
        timestamp_ms: i64,
    ) -> TransportResult<()> {
        (**self).send_audio_data(handle, data, timestamp_ms)
    }

    fn disconnect(&mut self, handle: TransportHandle) -> TransportResult<()> {
        (**self).disconnect(handle)
    }
}
