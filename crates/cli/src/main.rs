use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use clap::Parser;
use publish::media::h264::{NalType, extract_nal_units};
use publish::{
    ConnectParams, PpsPolicy, PublishConfig, PublishEvent, Publisher, SessionState, Transport,
    TransportHandle, TransportResult, VideoSize, event_callback,
};

#[derive(Parser)]
#[command(
    name = "publish-replay",
    about = "Replay an H.264 Annex B file through the publish pipeline"
)]
struct Args {
    /// Annex B elementary stream (.h264)
    input: PathBuf,

    /// Ingest URL
    #[arg(long, short, default_value = "rtmp://127.0.0.1:1935/live/stream")]
    url: String,

    /// Frame rate used to derive timestamps
    #[arg(long, default_value_t = 30)]
    fps: u32,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Locate the PPS by scanning for its start code instead of assuming
    /// the fixed 4-byte layout
    #[arg(long)]
    scan_pps: bool,

    /// Pace frames at the configured frame rate
    #[arg(long)]
    realtime: bool,
}

/// Transport that logs every call instead of talking to a server.
#[derive(Default)]
struct LogTransport {
    connections: u64,
    bytes: usize,
}

impl Transport for LogTransport {
    fn connect(&mut self, params: &ConnectParams) -> TransportResult<TransportHandle> {
        self.connections += 1;
        let handle = TransportHandle(self.connections);
        tracing::info!(
            url = %params.url,
            width = params.width,
            height = params.height,
            %handle,
            "connect"
        );
        Ok(handle)
    }

    fn send_sync_video(
        &mut self,
        handle: TransportHandle,
        sps: &[u8],
        pps: &[u8],
        timestamp_ms: i64,
    ) -> TransportResult<()> {
        self.bytes += sps.len() + pps.len();
        tracing::info!(%handle, sps = sps.len(), pps = pps.len(), timestamp_ms, "video sync");
        Ok(())
    }

    fn send_video_data(
        &mut self,
        handle: TransportHandle,
        data: &[u8],
        timestamp_ms: i64,
    ) -> TransportResult<()> {
        self.bytes += data.len();
        tracing::debug!(%handle, bytes = data.len(), timestamp_ms, "video data");
        Ok(())
    }

    fn send_sync_audio(&mut self, handle: TransportHandle, spec: &[u8]) -> TransportResult<()> {
        self.bytes += spec.len();
        tracing::info!(%handle, ?spec, "audio sync");
        Ok(())
    }

    fn send_audio_data(
        &mut self,
        handle: TransportHandle,
        data: &[u8],
        timestamp_ms: i64,
    ) -> TransportResult<()> {
        self.bytes += data.len();
        tracing::debug!(%handle, bytes = data.len(), timestamp_ms, "audio data");
        Ok(())
    }

    fn disconnect(&mut self, handle: TransportHandle) -> TransportResult<()> {
        tracing::info!(%handle, total_bytes = self.bytes, "disconnect");
        Ok(())
    }
}

/// Regroup an elementary stream into encoder-style output buffers: each
/// SPS joined with the PPS after it, every other NAL on its own.
fn encoder_buffers(stream: &Bytes) -> Vec<(Bytes, bool)> {
    let mut buffers = Vec::new();
    let mut pending_sps: Option<Bytes> = None;

    for nal in extract_nal_units(stream) {
        match nal.nal_type() {
            Some(NalType::Sps) => pending_sps = Some(nal.payload),
            Some(NalType::Pps) => {
                if let Some(sps) = pending_sps.take() {
                    let mut buf = BytesMut::with_capacity(8 + sps.len() + nal.payload.len());
                    buf.put_slice(&[0, 0, 0, 1]);
                    buf.put_slice(&sps);
                    buf.put_slice(&[0, 0, 0, 1]);
                    buf.put_slice(&nal.payload);
                    buffers.push((buf.freeze(), false));
                }
            }
            Some(nal_type) => {
                let mut buf = BytesMut::with_capacity(4 + nal.payload.len());
                buf.put_slice(&[0, 0, 0, 1]);
                buf.put_slice(&nal.payload);
                buffers.push((buf.freeze(), nal_type.is_slice()));
            }
            None => {}
        }
    }
    buffers
}

fn wait_for(publisher: &Publisher, done: impl Fn(SessionState) -> bool) -> SessionState {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let state = publisher.state();
        if done(state) || Instant::now() >= deadline {
            return state;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let stream = match std::fs::read(&args.input) {
        Ok(data) => Bytes::from(data),
        Err(e) => {
            eprintln!("Failed to read {}: {}", args.input.display(), e);
            std::process::exit(1);
        }
    };

    let config = PublishConfig {
        url: args.url.clone(),
        fps: args.fps,
        pps_policy: if args.scan_pps {
            PpsPolicy::ScanStartCode
        } else {
            PpsPolicy::FixedWidth
        },
        ..PublishConfig::default()
    };

    let events = event_callback(|event| match event {
        PublishEvent::StateChanged { from, to, .. } => {
            tracing::info!(?from, ?to, "session state")
        }
        other => tracing::warn!(event = ?other, "publish event"),
    });

    let publisher = match Publisher::with_config_and_events(LogTransport::default(), config, events)
    {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = publisher.start_publish(VideoSize::new(args.width, args.height)) {
        eprintln!("Failed to start publishing: {}", e);
        std::process::exit(1);
    }
    if wait_for(&publisher, |s| s != SessionState::Connecting) != SessionState::Publishing {
        eprintln!("Connection to {} failed", args.url);
        std::process::exit(1);
    }

    let frame_interval = Duration::from_secs(1) / args.fps;
    let mut frame_index: i64 = 0;
    for (buffer, is_slice) in encoder_buffers(&stream) {
        let timestamp_us = frame_index * 1_000_000 / i64::from(args.fps);
        publisher.push_video(buffer, timestamp_us);
        if is_slice {
            frame_index += 1;
            if args.realtime {
                thread::sleep(frame_interval);
            }
        }
    }

    publisher.stop_publish();
    wait_for(&publisher, |s| s == SessionState::Stopped);
    if let Err(e) = publisher.release() {
        eprintln!("Release failed: {}", e);
    }

    let stats = publisher.stats();
    println!(
        "{} frames: {} enqueued, {} sent, {} dropped, {} framing errors, {} send failures",
        frame_index,
        stats.frames_enqueued,
        stats.frames_sent,
        stats.frames_dropped,
        stats.framing_errors,
        stats.send_failures
    );
}
