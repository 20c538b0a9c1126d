// crates/playout-sink-ts/src/sink.rs
//
// `OutputSink` implementation backed by a dedicated mux thread. The tick
// thread must never block on encoder/muxer I/O (see
// playout_engine::sink::OutputSink's contract), so every frame handed to
// `consume_video`/`consume_audio` is copied into an owned message and pushed
// through a bounded crossbeam channel with `try_send`; a full channel means
// the mux thread has fallen behind and the frame is dropped, counted, and
// logged rather than stalling the clock.
//
// One channel carries both video and audio messages so the mux thread
// writes packets in the same interleaved order the tick thread produced
// them — the same ordering guarantee the batch exporter gets for free from
// its single demuxer packet loop.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, TrySendError};
use playout_core::RationalFps;
use playout_engine::sink::{AudioFrame, OutputSink, SinkStatus, VideoFrame};

use crate::encoder::TsEncoder;

const CHANNEL_CAPACITY: usize = 64;

enum Msg {
    Video { yuv: Vec<u8>, pts_90k: i64 },
    Audio { samples: Vec<i16>, channels: u16 },
    Stop,
}

/// The engine's `VideoFrame`/`AudioFrame::pts_us` is wall-clock microseconds
/// (`OutputClock::frame_index_to_pts_90k` rescaled to µs before it reaches the
/// sink boundary); the muxer's stream timebase here is 90 kHz, so every PTS
/// is rescaled back on the way in.
fn pts_us_to_90k(pts_us: i64) -> i64 {
    pts_us * 90 / 1000
}

fn status_to_u8(s: SinkStatus) -> u8 {
    match s {
        SinkStatus::Idle => 0,
        SinkStatus::Starting => 1,
        SinkStatus::Running => 2,
        SinkStatus::Backpressure => 3,
        SinkStatus::Error => 4,
        SinkStatus::Stopping => 5,
        SinkStatus::Stopped => 6,
    }
}

fn u8_to_status(v: u8) -> SinkStatus {
    match v {
        1 => SinkStatus::Starting,
        2 => SinkStatus::Running,
        3 => SinkStatus::Backpressure,
        4 => SinkStatus::Error,
        5 => SinkStatus::Stopping,
        6 => SinkStatus::Stopped,
        _ => SinkStatus::Idle,
    }
}

/// Continuous MPEG-TS output sink: one channel's worth of H.264 + AAC,
/// muxed on its own thread.
pub struct MpegTsSink {
    path: PathBuf,
    width: u32,
    height: u32,
    fps: RationalFps,
    sample_rate: u32,
    channels: u16,
    bitrate_bps: u32,
    gop_size: u32,
    tx: Option<Sender<Msg>>,
    worker: Option<JoinHandle<()>>,
    status: Arc<AtomicU8>,
    pub dropped_video_frames: Arc<std::sync::atomic::AtomicU64>,
    pub dropped_audio_blocks: Arc<std::sync::atomic::AtomicU64>,
}

impl MpegTsSink {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        path: PathBuf,
        width: u32,
        height: u32,
        fps: RationalFps,
        sample_rate: u32,
        channels: u16,
        bitrate_bps: u32,
        gop_size: u32,
    ) -> Self {
        Self {
            path,
            width,
            height,
            fps,
            sample_rate,
            channels,
            bitrate_bps,
            gop_size,
            tx: None,
            worker: None,
            status: Arc::new(AtomicU8::new(status_to_u8(SinkStatus::Idle))),
            dropped_video_frames: Arc::new(std::sync::atomic::AtomicU64::new(0)),
            dropped_audio_blocks: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }
}

impl OutputSink for MpegTsSink {
    fn start(&mut self) {
        let (tx, rx) = crossbeam_channel::bounded::<Msg>(CHANNEL_CAPACITY);
        let status = Arc::clone(&self.status);
        status.store(status_to_u8(SinkStatus::Starting), Ordering::Release);

        let path = self.path.clone();
        let (width, height, fps, sample_rate, channels, bitrate_bps, gop_size) =
            (self.width, self.height, self.fps, self.sample_rate, self.channels, self.bitrate_bps, self.gop_size);

        let worker = std::thread::Builder::new()
            .name("playout-ts-mux".into())
            .spawn(move || {
                let mut encoder = match TsEncoder::open(&path, width, height, fps, sample_rate, channels, bitrate_bps, gop_size) {
                    Ok(enc) => enc,
                    Err(e) => {
                        log::error!("ts sink: failed to open '{}': {e}", path.display());
                        status.store(status_to_u8(SinkStatus::Error), Ordering::Release);
                        return;
                    }
                };
                status.store(status_to_u8(SinkStatus::Running), Ordering::Release);

                for msg in rx.iter() {
                    match msg {
                        Msg::Video { yuv, pts_90k } => {
                            if let Err(e) = encoder.push_video(&yuv, pts_90k) {
                                log::error!("ts sink: video encode failed: {e}");
                                status.store(status_to_u8(SinkStatus::Error), Ordering::Release);
                            }
                        }
                        Msg::Audio { samples, channels } => {
                            if let Err(e) = encoder.push_audio(&samples, channels) {
                                log::error!("ts sink: audio encode failed: {e}");
                                status.store(status_to_u8(SinkStatus::Error), Ordering::Release);
                            }
                        }
                        Msg::Stop => break,
                    }
                }

                status.store(status_to_u8(SinkStatus::Stopping), Ordering::Release);
                if let Err(e) = encoder.finish() {
                    log::error!("ts sink: finalize failed: {e}");
                    status.store(status_to_u8(SinkStatus::Error), Ordering::Release);
                } else {
                    status.store(status_to_u8(SinkStatus::Stopped), Ordering::Release);
                }
            })
            .expect("spawn ts mux thread");

        self.tx = Some(tx);
        self.worker = Some(worker);
    }

    fn stop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Msg::Stop);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn consume_video(&mut self, frame: VideoFrame<'_>) {
        let Some(tx) = &self.tx else { return };
        let msg = Msg::Video { yuv: frame.yuv.to_vec(), pts_90k: pts_us_to_90k(frame.pts_us) };
        if let Err(TrySendError::Full(_)) = tx.try_send(msg) {
            self.dropped_video_frames.fetch_add(1, Ordering::Relaxed);
            self.status.store(status_to_u8(SinkStatus::Backpressure), Ordering::Release);
        }
    }

    fn consume_audio(&mut self, frame: AudioFrame<'_>) {
        let Some(tx) = &self.tx else { return };
        let msg = Msg::Audio { samples: frame.samples.to_vec(), channels: frame.channels };
        if let Err(TrySendError::Full(_)) = tx.try_send(msg) {
            self.dropped_audio_blocks.fetch_add(1, Ordering::Relaxed);
            self.status.store(status_to_u8(SinkStatus::Backpressure), Ordering::Release);
        }
    }

    fn status(&self) -> SinkStatus {
        u8_to_status(self.status.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_u8() {
        for s in [
            SinkStatus::Idle,
            SinkStatus::Starting,
            SinkStatus::Running,
            SinkStatus::Backpressure,
            SinkStatus::Error,
            SinkStatus::Stopping,
            SinkStatus::Stopped,
        ] {
            assert_eq!(u8_to_status(status_to_u8(s)), s);
        }
    }

    #[test]
    fn new_sink_starts_idle_with_no_drops() {
        let sink = MpegTsSink::new(PathBuf::from("/tmp/does-not-matter.ts"), 640, 480, RationalFps::new(30, 1), 48_000, 2, 6_000_000, 60);
        assert_eq!(sink.status(), SinkStatus::Idle);
        assert_eq!(sink.dropped_video_frames.load(Ordering::Relaxed), 0);
    }
}
