// crates/playout-media/src/seam_preparer.rs
//
// SeamPreparer (the same mechanism serves as the block-level
// ProducerPreloader — both prime one TickProducer off the tick thread for
// a segment). Grounded in this workspace's background-worker shape (see
// `worker::MediaWorker`'s gatekeeper-thread pattern: spawn a thread, do the
// work, publish the result under a mutex, let the caller poll/take it).
//
// Pad segments are never preloaded (SPEC_FULL.md §4.4) — the engine
// constructs their synchronous pad source directly and never calls
// `start_preload` for them.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use playout_core::block::{Segment, SegmentId};

use crate::decode::SegmentDecoder;
use crate::error::MediaError;
use crate::lookahead::{AudioLookaheadBuffer, VideoLookaheadBuffer};
use crate::tick_producer::{postprocess_video_frame, TickProducer};

struct Shared {
    result: Mutex<Option<Result<TickProducer, MediaError>>>,
    cancelled: AtomicBool,
}

pub struct SeamPreparer {
    width: u32,
    height: u32,
    sample_rate: u32,
    channels: u16,
    video_capacity_frames: usize,
    audio_high_water_ms: u32,
    shared: Option<Arc<Shared>>,
    worker: Option<JoinHandle<()>>,
    /// Test-only hook (SPEC_FULL.md §9 open question, resolved in
    /// DESIGN.md): present in every build, but `None` in production —
    /// nothing in the shipping CLI ever calls `set_injected_delay`.
    injected_delay: Option<Duration>,
}

impl SeamPreparer {
    pub fn new(
        width: u32,
        height: u32,
        sample_rate: u32,
        channels: u16,
        video_capacity_frames: usize,
        audio_high_water_ms: u32,
    ) -> Self {
        Self {
            width,
            height,
            sample_rate,
            channels,
            video_capacity_frames,
            audio_high_water_ms,
            shared: None,
            worker: None,
            injected_delay: None,
        }
    }

    pub fn set_injected_delay(&mut self, delay: Option<Duration>) {
        self.injected_delay = delay;
    }

    /// Non-blocking. Cancels any in-flight preload first.
    pub fn start_preload(&mut self, segment: Segment, segment_id: SegmentId, asset_path: PathBuf) {
        self.cancel();

        let shared = Arc::new(Shared {
            result: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        });
        self.shared = Some(shared.clone());

        let (width, height, sample_rate, channels, video_capacity_frames, audio_high_water_ms) = (
            self.width,
            self.height,
            self.sample_rate,
            self.channels,
            self.video_capacity_frames,
            self.audio_high_water_ms,
        );
        let delay = self.injected_delay;

        let worker_shared = shared.clone();
        let handle = std::thread::spawn(move || {
            if let Some(d) = delay {
                std::thread::sleep(d);
            }
            if worker_shared.cancelled.load(Ordering::Acquire) {
                return;
            }

            let result = prepare(
                &segment,
                segment_id,
                &asset_path,
                width,
                height,
                sample_rate,
                channels,
                video_capacity_frames,
                audio_high_water_ms,
            );

            if worker_shared.cancelled.load(Ordering::Acquire) {
                return;
            }
            *worker_shared.result.lock().unwrap() = Some(result);
        });
        self.worker = Some(handle);
    }

    /// `true` only once the first frame is decoded and the producer is
    /// armed; `false` during decode and on failure (a failed preload
    /// leaves `IsReady` false forever for that preload — the caller falls
    /// back to pad and must call `start_preload` again for the next
    /// attempt).
    pub fn is_ready(&self) -> bool {
        match &self.shared {
            Some(shared) => matches!(
                shared.result.lock().unwrap().as_ref(),
                Some(Ok(_))
            ),
            None => false,
        }
    }

    /// `true` if the in-flight preload has concluded in failure — the
    /// engine logs `ASSET_MISSING`/`ASSET_ERROR`/`DECODE_ERROR` once and
    /// stays on pad.
    pub fn failed(&self) -> Option<MediaError> {
        match &self.shared {
            Some(shared) => match shared.result.lock().unwrap().as_ref() {
                Some(Err(e)) => Some(e.clone()),
                _ => None,
            },
            None => None,
        }
    }

    /// Non-blocking; returns ownership exactly once. After it returns a
    /// producer the preparer is idle again.
    pub fn take_producer(&mut self) -> Option<TickProducer> {
        let shared = self.shared.as_ref()?;
        let mut guard = shared.result.lock().unwrap();
        if matches!(guard.as_ref(), Some(Ok(_))) {
            let producer = guard.take().unwrap().ok();
            drop(guard);
            self.reset();
            return producer;
        }
        None
    }

    /// Idempotent. Joins the worker if running and discards any in-flight
    /// result.
    pub fn cancel(&mut self) {
        if let Some(shared) = &self.shared {
            shared.cancelled.store(true, Ordering::Release);
        }
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.shared = None;
    }

    fn reset(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.shared = None;
    }
}

impl Drop for SeamPreparer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[allow(clippy::too_many_arguments)]
fn prepare(
    segment: &Segment,
    segment_id: SegmentId,
    asset_path: &std::path::Path,
    width: u32,
    height: u32,
    sample_rate: u32,
    channels: u16,
    video_capacity_frames: usize,
    audio_high_water_ms: u32,
) -> Result<TickProducer, MediaError> {
    let mut decoder = SegmentDecoder::open(
        asset_path,
        segment.asset_start_offset_ms,
        width,
        height,
        sample_rate,
        channels,
    )?;

    let fade_in_duration_ms = match segment.transition_in {
        playout_core::block::TransitionType::Fade { duration_ms } => duration_ms,
        playout_core::block::TransitionType::None => 0,
    };
    let fade_out_duration_ms = match segment.transition_out {
        playout_core::block::TransitionType::Fade { duration_ms } => duration_ms,
        playout_core::block::TransitionType::None => 0,
    };

    let mut first_frame = decoder
        .next_video_frame()?
        .ok_or_else(|| MediaError::DecodeError {
            asset_uri: asset_path.display().to_string(),
            message: "asset produced no frames".into(),
        })?;
    postprocess_video_frame(
        &mut first_frame,
        width,
        height,
        fade_in_duration_ms,
        fade_out_duration_ms,
        segment.segment_duration_ms,
    );

    let video_buf = Arc::new(VideoLookaheadBuffer::new(video_capacity_frames));
    let audio_buf = Arc::new(AudioLookaheadBuffer::new(channels, sample_rate, audio_high_water_ms));
    video_buf.push(crate::decode::DecodedVideoFrame {
        yuv: first_frame.yuv,
        content_time_ms: first_frame.content_time_ms,
    });

    Ok(TickProducer::spawn(
        segment, segment_id, decoder, video_buf, audio_buf,
    ))
}

#[cfg(test)]
mod tests {
    // `prepare` requires a real media file; exercised by integration tests
    // with fixture clips. `cancel`/`is_ready` state transitions without a
    // real decoder are covered by playout-engine's deterministic tests,
    // which use the injected-delay hook to race a cancel against a
    // still-running preload.
}
