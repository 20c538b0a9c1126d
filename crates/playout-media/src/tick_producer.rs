// crates/playout-media/src/tick_producer.rs
//
// TickProducer: owns exactly one decoder for one segment, plus the
// background fill thread that keeps its lookahead buffers topped up.
// Mirrors this workspace's existing background-worker shape (see
// `worker::MediaWorker`'s dedicated playback thread) but decodes into
// bounded lookahead buffers instead of sending frames over a result
// channel, and never reopens or reseeks its decoder mid-segment.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use playout_core::block::{Segment, SegmentId, TransitionType};
use playout_core::fade::{self, Q16_ONE};
use playout_core::loudness;
use playout_core::RationalFps;

use crate::decode::SegmentDecoder;
use crate::lookahead::{AudioLookaheadBuffer, VideoLookaheadBuffer};

/// Video low-water mark: the fill thread tops the buffer back up once depth
/// falls below this many frames.
const VIDEO_LOW_WATER_FRAMES: usize = 8;
/// Audio low-water mark, in milliseconds.
const AUDIO_LOW_WATER_MS: u32 = 300;
/// Fill-thread idle poll interval when both buffers are already full.
const FILL_IDLE_POLL: std::time::Duration = std::time::Duration::from_millis(2);
/// Frames of audio pulled from the decoder per fill-thread iteration.
const AUDIO_PULL_FRAMES: usize = 512;

pub struct TickVideoFrame {
    pub yuv: Vec<u8>,
    pub content_time_ms: i64,
}

/// Owns one decoder for one segment. Constructed fully primed (first video
/// frame already in `video_buf`) by `SeamPreparer`/`ProducerPreloader`.
pub struct TickProducer {
    segment_id: SegmentId,
    source_fps: Option<RationalFps>,
    gain_linear: f32,
    fade_in_duration_ms: i64,
    fade_out_duration_ms: i64,
    segment_duration_ms: i64,
    video_buf: Arc<VideoLookaheadBuffer>,
    audio_buf: Arc<AudioLookaheadBuffer>,
    exhausted: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    fill_thread: Option<JoinHandle<()>>,
    /// Content-time of the most recently *pushed* video frame, so the
    /// engine can still report the fade state before the first pop.
    last_pushed_content_ms: Arc<AtomicI64>,
}

impl TickProducer {
    /// Spawns the fill thread and takes ownership of `decoder`, which must
    /// already have produced its first frame into `video_buf` (the
    /// "primed" obligation SeamPreparer enforces before handing a producer
    /// over).
    pub fn spawn(
        segment: &Segment,
        segment_id: SegmentId,
        mut decoder: SegmentDecoder,
        video_buf: Arc<VideoLookaheadBuffer>,
        audio_buf: Arc<AudioLookaheadBuffer>,
    ) -> Self {
        let source_fps = decoder.source_fps();
        let exhausted = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let last_pushed_content_ms = Arc::new(AtomicI64::new(0));

        let gain_linear = loudness::gain_db_to_linear(segment.gain_db);
        let fade_in_duration_ms = match segment.transition_in {
            TransitionType::Fade { duration_ms } => duration_ms,
            TransitionType::None => 0,
        };
        let fade_out_duration_ms = match segment.transition_out {
            TransitionType::Fade { duration_ms } => duration_ms,
            TransitionType::None => 0,
        };
        let segment_duration_ms = segment.segment_duration_ms;

        let thread_video_buf = video_buf.clone();
        let thread_audio_buf = audio_buf.clone();
        let thread_exhausted = exhausted.clone();
        let thread_shutdown = shutdown.clone();
        let thread_last_pushed = last_pushed_content_ms.clone();

        let fill_thread = std::thread::spawn(move || {
            fill_loop(
                &mut decoder,
                &thread_video_buf,
                &thread_audio_buf,
                &thread_exhausted,
                &thread_shutdown,
                &thread_last_pushed,
                fade_in_duration_ms,
                fade_out_duration_ms,
                segment_duration_ms,
                gain_linear,
            )
        });

        Self {
            segment_id,
            source_fps,
            gain_linear,
            fade_in_duration_ms,
            fade_out_duration_ms,
            segment_duration_ms,
            video_buf,
            audio_buf,
            exhausted,
            shutdown,
            fill_thread: Some(fill_thread),
            last_pushed_content_ms,
        }
    }

    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// The decoded asset's own average frame rate, when the container
    /// declared one — feeds `Cadence::reset` so advance/repeat classifies
    /// against the real source rate instead of assuming it matches output.
    pub fn source_fps(&self) -> Option<RationalFps> {
        self.source_fps
    }

    /// `TryGetFrame()` — returns a fully postprocessed frame, or `None`
    /// once the segment's content is exhausted. Never self-advances; the
    /// tick loop decides what happens next.
    pub fn try_get_frame(&self) -> Option<TickVideoFrame> {
        self.video_buf.try_pop()
    }

    pub fn pop_audio(&self, nb_frames: usize) -> Vec<i16> {
        self.audio_buf.try_pop(nb_frames)
    }

    pub fn video_depth_frames(&self) -> usize {
        self.video_buf.depth_frames()
    }

    pub fn audio_depth_ms(&self) -> u64 {
        self.audio_buf.depth_ms()
    }

    pub fn video_underflow_count(&self) -> u64 {
        self.video_buf.underflow_count()
    }

    pub fn audio_underflow_count(&self) -> u64 {
        self.audio_buf.underflow_count()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire) && self.video_buf.depth_frames() == 0
    }

    pub fn last_pushed_content_ms(&self) -> i64 {
        self.last_pushed_content_ms.load(Ordering::Relaxed)
    }

    pub fn gain_linear(&self) -> f32 {
        self.gain_linear
    }
}

impl Drop for TickProducer {
    /// Deferred fill threads are joined off the tick thread (the caller
    /// decides when — typically after the seam that replaces this
    /// producer) but the producer itself always joins on drop so no thread
    /// is ever leaked.
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.fill_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Attenuate one decoded video frame's fade/envelope in place. Shared by
/// the fill thread (every subsequent frame) and `SeamPreparer` (the first
/// frame, decoded synchronously so "ready" means a frame is already
/// sitting in the lookahead buffer).
pub(crate) fn postprocess_video_frame(
    frame: &mut crate::decode::DecodedVideoFrame,
    out_w: u32,
    out_h: u32,
    fade_in_duration_ms: i64,
    fade_out_duration_ms: i64,
    segment_duration_ms: i64,
) {
    let alpha = fade::combined_alpha_q16(
        frame.content_time_ms,
        segment_duration_ms,
        fade_in_duration_ms,
        fade_out_duration_ms,
    );
    if alpha < Q16_ONE {
        fade::attenuate_yuv_toward_black(&mut frame.yuv, out_w, out_h, alpha);
    }
}

/// Apply loudness gain and fade envelope to a block of audio samples.
pub(crate) fn postprocess_audio_samples(
    samples: &mut [i16],
    content_time_ms: i64,
    fade_in_duration_ms: i64,
    fade_out_duration_ms: i64,
    segment_duration_ms: i64,
    gain_linear: f32,
) {
    if gain_linear != 1.0 {
        loudness::apply_gain_s16(samples, gain_linear);
    }
    let alpha = fade::combined_alpha_q16(
        content_time_ms,
        segment_duration_ms,
        fade_in_duration_ms,
        fade_out_duration_ms,
    );
    if alpha < Q16_ONE {
        fade::attenuate_audio_toward_silence(samples, alpha);
    }
}

#[allow(clippy::too_many_arguments)]
fn fill_loop(
    decoder: &mut SegmentDecoder,
    video_buf: &VideoLookaheadBuffer,
    audio_buf: &AudioLookaheadBuffer,
    exhausted: &AtomicBool,
    shutdown: &AtomicBool,
    last_pushed_content_ms: &AtomicI64,
    fade_in_duration_ms: i64,
    fade_out_duration_ms: i64,
    segment_duration_ms: i64,
    gain_linear: f32,
) {
    let (out_w, out_h) = decoder.out_dims();
    loop {
        if shutdown.load(Ordering::Acquire) {
            return;
        }

        let mut did_work = false;

        if video_buf.depth_frames() < VIDEO_LOW_WATER_FRAMES && !exhausted.load(Ordering::Acquire) {
            match decoder.next_video_frame() {
                Ok(Some(mut frame)) => {
                    postprocess_video_frame(
                        &mut frame,
                        out_w,
                        out_h,
                        fade_in_duration_ms,
                        fade_out_duration_ms,
                        segment_duration_ms,
                    );
                    last_pushed_content_ms.store(frame.content_time_ms, Ordering::Relaxed);
                    video_buf.push(crate::decode::DecodedVideoFrame {
                        yuv: frame.yuv,
                        content_time_ms: frame.content_time_ms,
                    });
                    did_work = true;
                }
                Ok(None) => {
                    exhausted.store(true, Ordering::Release);
                }
                Err(e) => {
                    log::warn!("segment decode error, treating as exhausted: {e}");
                    exhausted.store(true, Ordering::Release);
                }
            }
        }

        if decoder.has_audio() && decoder.audio_available_frames() < AUDIO_PULL_FRAMES * 2 {
            // Audio shares the demuxer with video; the video pull above
            // already drains interleaved audio packets into the decoder's
            // internal fifo. Here we just move ready samples into the
            // lookahead buffer, applying the same gain/fade envelope.
            let content_ms = last_pushed_content_ms.load(Ordering::Relaxed);
            let mut samples = decoder.pop_audio(AUDIO_PULL_FRAMES);
            if !samples.is_empty() {
                postprocess_audio_samples(
                    &mut samples,
                    content_ms,
                    fade_in_duration_ms,
                    fade_out_duration_ms,
                    segment_duration_ms,
                    gain_linear,
                );
                audio_buf.push(&samples);
                did_work = true;
            }
        }

        if !did_work {
            if exhausted.load(Ordering::Acquire) {
                return;
            }
            std::thread::sleep(FILL_IDLE_POLL);
        }
    }
}

#[cfg(test)]
mod tests {
    // TickProducer::spawn requires a real SegmentDecoder (a real media
    // file); exercised by playout-media's integration tests with fixture
    // clips. Pure-logic fade/gain math is covered in playout-core.
}
