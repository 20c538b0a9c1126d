// crates/playout-engine/src/frame_source.rs
//
// `FrameSource` is the tick loop's view of "a thing that can hand me the
// next video frame and some audio samples" — implemented by the real
// `TickProducer` (content) and by `PadSource` (the session's pad template,
// advanced per tick). Grounded in the original engine's IProducer/
// ITickProducer split (see its StubProducer test fixture): giving the tick
// loop a narrow trait instead of the concrete decoder type is what makes the
// seam/fence/cadence logic testable without real media.

use playout_core::block::SegmentId;
use playout_core::fade::{self, Q16_ONE};
use playout_core::loudness;
use playout_core::pad::PadProducer;
use playout_core::RationalFps;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use playout_media::TickProducer;

pub struct FrameOut {
    pub yuv: Vec<u8>,
    pub content_time_ms: i64,
}

/// Narrow view the tick loop needs from either a real decoder-backed
/// producer or the pad source. `&self` throughout — `TickProducer`'s
/// buffers are already interior-mutable (lock-free SPSC), and `PadSource`
/// uses an atomic tick counter for the same reason: the tick thread never
/// needs `&mut` to pop from either.
pub trait FrameSource: Send {
    fn segment_id(&self) -> SegmentId;
    fn try_get_frame(&self) -> Option<FrameOut>;
    fn pop_audio(&self, nb_frames: usize) -> Vec<i16>;
    fn video_depth_frames(&self) -> usize;
    fn audio_depth_ms(&self) -> u64;
    fn is_exhausted(&self) -> bool;
    fn is_pad(&self) -> bool {
        false
    }
    /// The source's own frame rate, when known. `None` for pad (it has no
    /// asset of its own) and for a decoded asset whose container declared
    /// no average frame rate — either way the caller falls back to the
    /// output fps, which makes `Cadence` advance every tick (unity).
    fn source_fps(&self) -> Option<RationalFps> {
        None
    }
    /// Cumulative lookahead-buffer underflow counts for this source alone
    /// (reset to 0 with every new producer). Pad never underflows — its
    /// buffer is unbounded by construction — so the default of 0 is exact,
    /// not a placeholder.
    fn video_underflow_count(&self) -> u64 {
        0
    }
    fn audio_underflow_count(&self) -> u64 {
        0
    }
}

pub struct TickProducerSource {
    inner: TickProducer,
}

impl TickProducerSource {
    pub fn new(inner: TickProducer) -> Self {
        Self { inner }
    }
}

impl FrameSource for TickProducerSource {
    fn segment_id(&self) -> SegmentId {
        self.inner.segment_id()
    }

    fn try_get_frame(&self) -> Option<FrameOut> {
        self.inner.try_get_frame().map(|f| FrameOut {
            yuv: f.yuv,
            content_time_ms: f.content_time_ms,
        })
    }

    fn pop_audio(&self, nb_frames: usize) -> Vec<i16> {
        self.inner.pop_audio(nb_frames)
    }

    fn video_depth_frames(&self) -> usize {
        self.inner.video_depth_frames()
    }

    fn audio_depth_ms(&self) -> u64 {
        self.inner.audio_depth_ms()
    }

    fn is_exhausted(&self) -> bool {
        self.inner.is_exhausted()
    }

    fn source_fps(&self) -> Option<RationalFps> {
        self.inner.source_fps()
    }

    fn video_underflow_count(&self) -> u64 {
        self.inner.video_underflow_count()
    }

    fn audio_underflow_count(&self) -> u64 {
        self.inner.audio_underflow_count()
    }
}

/// A pad segment is never preloaded — it's built synchronously from the
/// session's immutable `PadProducer` plus this segment's declared duration
/// and fade/gain (SPEC_FULL.md §4.4). It never exhausts on its own; the tick
/// loop retires it only at the segment's planned seam frame.
pub struct PadSource {
    pad: Arc<PadProducer>,
    segment_id: SegmentId,
    fade_in_duration_ms: i64,
    fade_out_duration_ms: i64,
    segment_duration_ms: i64,
    gain_linear: f32,
    /// Advances by one frame's worth of ms every `try_get_frame` call —
    /// pad has no decoder to report its own content time.
    content_time_ms: AtomicI64,
    frame_duration_ms: i64,
}

impl PadSource {
    pub fn new(
        pad: Arc<PadProducer>,
        segment_id: SegmentId,
        fade_in_duration_ms: i64,
        fade_out_duration_ms: i64,
        segment_duration_ms: i64,
        gain_linear: f32,
        frame_duration_ms: i64,
    ) -> Self {
        Self {
            pad,
            segment_id,
            fade_in_duration_ms,
            fade_out_duration_ms,
            segment_duration_ms,
            gain_linear,
            content_time_ms: AtomicI64::new(0),
            frame_duration_ms: frame_duration_ms.max(1),
        }
    }
}

impl FrameSource for PadSource {
    fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    fn try_get_frame(&self) -> Option<FrameOut> {
        let content_time_ms = self
            .content_time_ms
            .fetch_add(self.frame_duration_ms, Ordering::Relaxed);
        let mut yuv = self.pad.black_frame().to_vec();
        let alpha = fade::combined_alpha_q16(
            content_time_ms,
            self.segment_duration_ms,
            self.fade_in_duration_ms,
            self.fade_out_duration_ms,
        );
        if alpha < Q16_ONE {
            fade::attenuate_yuv_toward_black(&mut yuv, self.pad.width(), self.pad.height(), alpha);
        }
        Some(FrameOut {
            yuv,
            content_time_ms,
        })
    }

    fn pop_audio(&self, nb_frames: usize) -> Vec<i16> {
        let content_time_ms = self.content_time_ms.load(Ordering::Relaxed);
        let mut samples = self.pad.silence(nb_frames).to_vec();
        if self.gain_linear != 1.0 {
            loudness::apply_gain_s16(&mut samples, self.gain_linear);
        }
        let alpha = fade::combined_alpha_q16(
            content_time_ms,
            self.segment_duration_ms,
            self.fade_in_duration_ms,
            self.fade_out_duration_ms,
        );
        if alpha < Q16_ONE {
            fade::attenuate_audio_toward_silence(&mut samples, alpha);
        }
        samples
    }

    fn video_depth_frames(&self) -> usize {
        // Pad is exempt from the video-depth eligibility gate (§4.5.2) —
        // report a depth that always satisfies it.
        usize::MAX
    }

    fn audio_depth_ms(&self) -> u64 {
        u64::MAX
    }

    fn is_exhausted(&self) -> bool {
        false
    }

    fn is_pad(&self) -> bool {
        true
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Deterministic stand-in for `TickProducer` — records calls, yields a
    /// scripted sequence of frames, never touches a real decoder. Mirrors
    /// the original engine's `StubProducer` test fixture.
    pub struct StubFrameSource {
        segment_id: SegmentId,
        frames: Mutex<std::collections::VecDeque<FrameOut>>,
        audio_samples_available: AtomicI64,
        exhausted_when_empty: bool,
    }

    impl StubFrameSource {
        pub fn new(segment_id: SegmentId, content_times_ms: Vec<i64>) -> Self {
            Self {
                segment_id,
                frames: Mutex::new(
                    content_times_ms
                        .into_iter()
                        .map(|ms| FrameOut {
                            yuv: vec![16u8; 8],
                            content_time_ms: ms,
                        })
                        .collect(),
                ),
                audio_samples_available: AtomicI64::new(i64::MAX),
                exhausted_when_empty: true,
            }
        }
    }

    impl FrameSource for StubFrameSource {
        fn segment_id(&self) -> SegmentId {
            self.segment_id
        }

        fn try_get_frame(&self) -> Option<FrameOut> {
            self.frames.lock().unwrap().pop_front()
        }

        fn pop_audio(&self, nb_frames: usize) -> Vec<i16> {
            vec![0i16; nb_frames * 2]
        }

        fn video_depth_frames(&self) -> usize {
            self.frames.lock().unwrap().len()
        }

        fn audio_depth_ms(&self) -> u64 {
            self.audio_samples_available.load(Ordering::Relaxed) as u64
        }

        fn is_exhausted(&self) -> bool {
            self.exhausted_when_empty && self.frames.lock().unwrap().is_empty()
        }
    }
}
