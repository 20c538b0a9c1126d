// crates/playout-engine/src/pipeline.rs
//
// PipelineManager: the tick loop. Grounded directly in the original
// PipelineManager's Run()/TryLoadLiveProducer/TryKickoffPreviewPreload/
// TAKE-at-commit structure, translated from dynamic_cast<ITickProducer*> +
// unique_ptr rotation into an owned `Box<dyn FrameSource>` slot the tick
// thread rotates by value.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use playout_core::block::{Segment, SegmentId, TransitionType};
use playout_core::pad::PadProducer;
use playout_core::{loudness, FedBlock, RationalFps};

use playout_media::lookahead::{AudioLookaheadBuffer, VideoLookaheadBuffer};
use playout_media::SeamPreparer;

use crate::clock::{OutputClock, TimeSource, WaitStrategy};
use crate::frame_source::{FrameSource, PadSource, TickProducerSource};
use crate::metrics::PipelineMetrics;
use crate::session::BlockPlanSessionContext;
use crate::sink::{AudioFrame, OutputSink, VideoFrame};

const VIDEO_LOOKAHEAD_CAPACITY_FRAMES: usize = 48;
const AUDIO_HIGH_WATER_MS: u32 = 1000;
const AUDIO_READY_MS: u64 = 500;

/// Asset URI resolution: this workspace resolves `asset_uri` directly as a
/// filesystem path (no remote-fetch layer — that's an external collaborator
/// per SPEC_FULL.md §1).
fn asset_path(asset_uri: &str) -> PathBuf {
    PathBuf::from(asset_uri)
}

/// What the preloader is currently working on, if anything.
enum PendingPreload {
    None,
    NextSegmentInBlock { segment_index: usize },
    FirstSegmentOfNextBlock,
}

struct ActiveBlockState {
    block: FedBlock,
    block_fence_frame: i64,
    remaining_block_frames: i64,
    active_segment_index: usize,
    /// Cumulative frame totals per segment, rebased to the block's
    /// activation frame. The last entry is forced to equal
    /// `block_fence_frame` (§4.5.3's "last segment's seam forced to
    /// block-kind" rule).
    planned_segment_seam_frames: Vec<i64>,
    /// The `SegmentId` actually allocated to each planned segment index,
    /// recorded the moment that segment becomes `live` — independent of
    /// whatever `self.live` holds at check time, so `check_origin` can
    /// compare the plan's record against the frame's own origin instead of
    /// against itself.
    segment_ids: Vec<Option<SegmentId>>,
}

pub struct PipelineManager<W: WaitStrategy, T: TimeSource> {
    ctx: Arc<BlockPlanSessionContext>,
    time_source: T,
    wait_strategy: W,
    clock: Option<OutputClock>,
    sink: Box<dyn OutputSink>,
    pad_producer: Arc<PadProducer>,
    seam_preparer: SeamPreparer,
    next_segment_id: u32,

    session_frame_index: i64,
    session_epoch_utc_ms: Option<i64>,
    block_state: Option<ActiveBlockState>,
    pending_preload: PendingPreload,

    live: Option<Box<dyn FrameSource>>,
    preview: Option<Box<dyn FrameSource>>,

    last_good_video_frame: Option<Vec<u8>>,
    cadence: Cadence,

    /// Underflow totals carried over from every source that has already
    /// been retired this session — `FrameSource::*_underflow_count` only
    /// reports the current source's own lifetime, so these absorb each
    /// outgoing source's count before it's dropped.
    video_underflow_base: u64,
    audio_underflow_base: u64,
    last_emit_instant: Option<Instant>,

    metrics: Arc<Mutex<PipelineMetrics>>,
    stop: Arc<AtomicBool>,
}

/// §4.5.4's advance/repeat classifier. `src_fps` is reset to whatever the
/// live source reports (the decoded asset's own average frame rate, via
/// `FrameSource::source_fps`), falling back to the output fps only when the
/// source doesn't know its own rate — a pad segment, or a container with no
/// declared average frame rate. A source slower than the output fps repeats
/// a tick's frame instead of advancing; one faster skips ahead.
struct Cadence {
    src_fps: RationalFps,
    out_fps: RationalFps,
    tick_in_segment: i64,
}

impl Cadence {
    fn unity(out_fps: RationalFps) -> Self {
        Self {
            src_fps: out_fps,
            out_fps,
            tick_in_segment: 0,
        }
    }

    fn reset(&mut self, src_fps: RationalFps) {
        self.src_fps = src_fps;
        self.tick_in_segment = 0;
    }

    /// `advance` iff `floor((T+1) * src_num * out_den / (out_num * src_den))
    /// > floor(T * ...)`.
    fn classify_advance(&mut self) -> bool {
        let t = self.tick_in_segment;
        let f = |t: i64| -> i64 {
            (t as i128 * self.src_fps.num as i128 * self.out_fps.den as i128
                / (self.out_fps.num as i128 * self.src_fps.den as i128)) as i64
        };
        let advance = f(t + 1) > f(t);
        self.tick_in_segment += 1;
        advance
    }
}

impl<W: WaitStrategy, T: TimeSource> PipelineManager<W, T> {
    pub fn new(
        ctx: Arc<BlockPlanSessionContext>,
        time_source: T,
        wait_strategy: W,
        sink: Box<dyn OutputSink>,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        let fps = ctx.fps;
        let max_samples_per_tick =
            (sample_rate as u64 * fps.den.max(1) / fps.num.max(1) + 8) as usize;
        let pad_producer = Arc::new(PadProducer::new(
            ctx.width,
            ctx.height,
            sample_rate,
            channels,
            max_samples_per_tick,
        ));
        let seam_preparer = SeamPreparer::new(
            ctx.width,
            ctx.height,
            sample_rate,
            channels,
            VIDEO_LOOKAHEAD_CAPACITY_FRAMES,
            AUDIO_HIGH_WATER_MS,
        );
        let mut metrics = PipelineMetrics::default();
        metrics.channel_id = ctx.channel_id.clone();

        Self {
            ctx,
            time_source,
            wait_strategy,
            clock: None,
            sink,
            pad_producer,
            seam_preparer,
            next_segment_id: 1,
            session_frame_index: 0,
            session_epoch_utc_ms: None,
            block_state: None,
            pending_preload: PendingPreload::None,
            live: None,
            preview: None,
            last_good_video_frame: None,
            cadence: Cadence::unity(fps),
            video_underflow_base: 0,
            audio_underflow_base: 0,
            last_emit_instant: None,
            metrics: Arc::new(Mutex::new(metrics)),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn snapshot_metrics(&self) -> PipelineMetrics {
        self.metrics.lock().unwrap().clone()
    }

    /// A clonable handle onto the live metrics, so a binary can retain
    /// read access after handing the manager itself off to the tick
    /// thread's `run()` (which holds `&mut self` for the session's
    /// duration).
    pub fn metrics_handle(&self) -> Arc<Mutex<PipelineMetrics>> {
        Arc::clone(&self.metrics)
    }

    pub fn generate_metrics_text(&self) -> String {
        self.metrics.lock().unwrap().generate_prometheus_text()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.ctx.request_stop();
    }

    fn alloc_segment_id(&mut self) -> SegmentId {
        let id = SegmentId(self.next_segment_id);
        self.next_segment_id += 1;
        id
    }

    fn fence_frame_for(&self, end_utc_ms: i64) -> i64 {
        let epoch = self.session_epoch_utc_ms.unwrap_or(end_utc_ms);
        let fps = self.ctx.fps;
        let delta_ms = (end_utc_ms - epoch) as i128;
        playout_core::rational::div_ceil_i128(delta_ms * fps.num as i128, fps.den as i128 * 1000)
            as i64
    }

    /// Runs the tick loop to completion (stop requested, or `max_ticks`
    /// reached in a bounded deterministic test). Production callers pass
    /// `None`.
    pub fn run(&mut self, max_ticks: Option<i64>) {
        self.stamp_session_start();
        self.sink.start();
        self.metrics.lock().unwrap().encoder_open_count += 1;
        loop {
            if self.ctx.stop_requested() || self.stop.load(Ordering::Acquire) {
                break;
            }
            if let Some(max) = max_ticks {
                if self.session_frame_index >= max {
                    break;
                }
            }
            self.tick();
        }
        self.sink.stop();
        self.metrics.lock().unwrap().encoder_close_count += 1;
    }

    /// Folds the outgoing live source's own underflow counts into the
    /// session-cumulative base before it's replaced or dropped — each
    /// `FrameSource` only ever reports its own lifetime count.
    fn retire_live(&mut self) {
        if let Some(live) = &self.live {
            self.video_underflow_base += live.video_underflow_count();
            self.audio_underflow_base += live.audio_underflow_count();
        }
    }

    fn block_fence_due(&self) -> bool {
        self.block_state
            .as_ref()
            .map(|s| self.session_frame_index >= s.block_fence_frame)
            .unwrap_or(false)
    }

    fn tick(&mut self) {
        if self.live.is_none() || self.block_fence_due() {
            self.try_load_live_block();
        }
        self.try_kickoff_preload();
        if let Some(clock) = &self.clock {
            clock.wait_for_frame(self.session_frame_index, &mut self.wait_strategy);
        }
        self.run_one_committed_tick();
    }

    /// §4.5 step 1 plus the block-fence rollover: pops the next queued
    /// block and establishes it as the active block, reusing an
    /// already-primed `FirstSegmentOfNextBlock` preview when one is ready.
    /// If called because the fence was reached and nothing is queued yet,
    /// drops into the `PADDED_GAP` regime instead of holding a stale block.
    fn try_load_live_block(&mut self) {
        let due_to_fence = self.block_fence_due();
        let Some(block) = self.ctx.try_pop_block() else {
            if due_to_fence {
                {
                    let mut metrics = self.metrics.lock().unwrap();
                    metrics.record_violation("FENCE_PRELOAD_MISS");
                    metrics.fence_pad_frames_total += 1;
                }
                self.block_state = None;
                self.live = None;
                self.preview = None;
                self.pending_preload = PendingPreload::None;
            }
            return;
        };

        if self.session_epoch_utc_ms.is_none() {
            self.session_epoch_utc_ms = Some(block.start_utc_ms);
            self.clock = Some(OutputClock::new(self.ctx.fps, Instant::now()));
        }
        let block_activation_frame = self.session_frame_index;
        let block_fence_frame = self.fence_frame_for(block.end_utc_ms);

        let mut cumulative = 0i64;
        let mut planned_segment_seam_frames = Vec::with_capacity(block.segments.len());
        for seg in &block.segments {
            cumulative += self.ctx.fps.frames_from_duration_ceil_ms(seg.segment_duration_ms);
            planned_segment_seam_frames.push(block_activation_frame + cumulative);
        }
        if let Some(last) = planned_segment_seam_frames.last_mut() {
            *last = block_fence_frame;
        }

        let first_segment = block.segments[0].clone();
        let reuse_preview = matches!(self.pending_preload, PendingPreload::FirstSegmentOfNextBlock)
            && self.preview.is_some()
            && !first_segment.is_pad();
        let live_source = if reuse_preview {
            self.preview.take().unwrap()
        } else {
            self.build_source(&first_segment, &block.block_id)
        };
        self.retire_live();
        self.live = Some(live_source);
        self.preview = None;
        self.pending_preload = PendingPreload::None;

        self.metrics.lock().unwrap().total_blocks_executed += 1;

        self.reset_cadence_for_live();
        let live_segment_id = self.live.as_ref().map(|l| l.segment_id());
        let mut segment_ids = vec![None; planned_segment_seam_frames.len()];
        if let Some(first) = segment_ids.first_mut() {
            *first = live_segment_id;
        }
        self.block_state = Some(ActiveBlockState {
            block,
            block_fence_frame,
            remaining_block_frames: block_fence_frame - block_activation_frame,
            active_segment_index: 0,
            planned_segment_seam_frames,
            segment_ids,
        });
        self.arm_next_preload();
    }

    /// Builds a `FrameSource` synchronously: pad segments always (never
    /// preloaded, SPEC_FULL.md §4.4), and content segments only when there
    /// was no primed preview to reuse (block-opening segment 0 — every
    /// later swap comes from `SeamPreparer`).
    fn build_source(&mut self, segment: &Segment, block_id: &str) -> Box<dyn FrameSource> {
        let segment_id = self.alloc_segment_id();
        if segment.is_pad() {
            let fade_in_ms = match segment.transition_in {
                TransitionType::Fade { duration_ms } => duration_ms,
                TransitionType::None => 0,
            };
            let fade_out_ms = match segment.transition_out {
                TransitionType::Fade { duration_ms } => duration_ms,
                TransitionType::None => 0,
            };
            let gain_linear = loudness::gain_db_to_linear(segment.gain_db);
            let frame_duration_ms = (self.ctx.fps.frame_duration_ns() / 1_000_000).max(1) as i64;
            return Box::new(PadSource::new(
                self.pad_producer.clone(),
                segment_id,
                fade_in_ms,
                fade_out_ms,
                segment.segment_duration_ms,
                gain_linear,
                frame_duration_ms,
            ));
        }

        let sample_rate = self.pad_producer.sample_rate();
        let channels = self.pad_producer.channels();
        match playout_media::SegmentDecoder::open(
            &asset_path(&segment.asset_uri),
            segment.asset_start_offset_ms,
            self.ctx.width,
            self.ctx.height,
            sample_rate,
            channels,
        ) {
            Ok(decoder) => {
                let video_buf = Arc::new(VideoLookaheadBuffer::new(VIDEO_LOOKAHEAD_CAPACITY_FRAMES));
                let audio_buf = Arc::new(AudioLookaheadBuffer::new(
                    channels,
                    sample_rate,
                    AUDIO_HIGH_WATER_MS,
                ));
                let producer = playout_media::TickProducer::spawn(
                    segment, segment_id, decoder, video_buf, audio_buf,
                );
                Box::new(TickProducerSource::new(producer))
            }
            Err(e) => {
                log::warn!(
                    "segment {} in block {} asset open failed, substituting pad: {e}",
                    segment_id.0,
                    block_id
                );
                self.metrics.lock().unwrap().record_violation(e_tag(&e));
                Box::new(PadSource::new(
                    self.pad_producer.clone(),
                    segment_id,
                    0,
                    0,
                    segment.segment_duration_ms,
                    1.0,
                    (self.ctx.fps.frame_duration_ns() / 1_000_000).max(1) as i64,
                ))
            }
        }
    }

    /// The segment that should become active at the next seam: either the
    /// next segment within the current block, or the first segment of the
    /// next queued block. Independent of whether a preload has been armed
    /// for it — used both to decide what to preload and, at the seam
    /// itself, to tell whether that segment is a pad (built synchronously,
    /// never through `SeamPreparer`).
    fn planned_next_segment(&self) -> Option<(Segment, String)> {
        let state = self.block_state.as_ref()?;
        let next_in_block = state.active_segment_index + 1;
        if next_in_block < state.block.segments.len() {
            Some((
                state.block.segments[next_in_block].clone(),
                state.block.block_id.clone(),
            ))
        } else {
            self.ctx
                .peek_block()
                .and_then(|b| b.segments.first().map(|s| (s.clone(), b.block_id.clone())))
        }
    }

    fn arm_next_preload(&mut self) {
        if self.preview.is_some() {
            return;
        }
        if self.block_state.is_none() {
            return;
        }
        let Some((seg, _block_id)) = self.planned_next_segment() else {
            return;
        };
        if seg.is_pad() {
            // Built synchronously at the seam instead.
            return;
        }

        let is_next_in_block = {
            let state = self.block_state.as_ref().unwrap();
            state.active_segment_index + 1 < state.block.segments.len()
        };
        let pending = if is_next_in_block {
            let segment_index = self.block_state.as_ref().unwrap().active_segment_index + 1;
            PendingPreload::NextSegmentInBlock { segment_index }
        } else {
            PendingPreload::FirstSegmentOfNextBlock
        };

        self.pending_preload = pending;
        let segment_id = self.alloc_segment_id();
        self.seam_preparer
            .start_preload(seg.clone(), segment_id, asset_path(&seg.asset_uri));
        self.metrics.lock().unwrap().next_preload_started_count += 1;
    }

    fn try_kickoff_preload(&mut self) {
        if matches!(self.pending_preload, PendingPreload::None) {
            self.arm_next_preload();
        }
        if self.seam_preparer.is_ready() {
            if let Some(producer) = self.seam_preparer.take_producer() {
                self.preview = Some(Box::new(TickProducerSource::new(producer)));
                self.metrics.lock().unwrap().next_preload_ready_count += 1;
            }
        } else if let Some(err) = self.seam_preparer.failed() {
            log::warn!("preload failed: {err}");
            self.metrics.lock().unwrap().next_preload_failed_count += 1;
            self.pending_preload = PendingPreload::None;
        }
    }

    /// Determines, for the current tick, which segment index should be
    /// active and whether that differs from the one currently active.
    fn classify_tick(&self) -> Option<(usize, bool)> {
        let state = self.block_state.as_ref()?;
        let tick = self.session_frame_index;
        let active_index = state
            .planned_segment_seam_frames
            .iter()
            .position(|&seam| seam > tick)
            .unwrap_or(state.planned_segment_seam_frames.len().saturating_sub(1));
        let is_segment_seam = active_index != state.active_segment_index;
        Some((active_index, is_segment_seam))
    }

    fn run_one_committed_tick(&mut self) {
        let Some((active_index, is_segment_seam)) = self.classify_tick() else {
            self.emit_padded_gap();
            return;
        };

        let mut took_seam = false;
        if is_segment_seam {
            let next_is_pad = self
                .planned_next_segment()
                .map(|(s, _)| s.is_pad())
                .unwrap_or(false);

            if next_is_pad {
                if let Some((segment, block_id)) = self.planned_next_segment() {
                    let pad_source = self.build_source(&segment, &block_id);
                    self.retire_live();
                    self.live = Some(pad_source);
                    self.reset_cadence_for_live();
                    took_seam = true;
                    let new_segment_id = self.live.as_ref().map(|l| l.segment_id());
                    if let Some(state) = &mut self.block_state {
                        state.active_segment_index = active_index;
                        if let Some(slot) = state.segment_ids.get_mut(active_index) {
                            *slot = new_segment_id;
                        }
                    }
                    self.metrics.lock().unwrap().source_swap_count += 1;
                    self.pending_preload = PendingPreload::None;
                    self.arm_next_preload();
                }
            } else if self.seam_eligible() {
                self.rotate_preview_into_live();
                took_seam = true;
                let new_segment_id = self.live.as_ref().map(|l| l.segment_id());
                if let Some(state) = &mut self.block_state {
                    state.active_segment_index = active_index;
                    if let Some(slot) = state.segment_ids.get_mut(active_index) {
                        *slot = new_segment_id;
                    }
                }
                self.metrics.lock().unwrap().source_swap_count += 1;
            } else {
                let mut metrics = self.metrics.lock().unwrap();
                metrics.record_violation("DEGRADED_TAKE_MODE");
                let exhausted = self.live.as_ref().map(|l| l.is_exhausted()).unwrap_or(true);
                if exhausted {
                    metrics.record_violation("CONTINUOUS_FRAME_AUTHORITY_VACUUM");
                    // The scheduled segment is gone and nothing primed could
                    // take its place — the plan's notion of "active segment"
                    // has been forced apart from what's actually live.
                    metrics.detach_count += 1;
                }
            }
        }

        let advance = took_seam || self.cadence.classify_advance();
        let (yuv, _content_time_ms, origin_segment_id, audio_samples) =
            self.pop_frame_and_audio(advance);

        let active_segment_id = self
            .block_state
            .as_ref()
            .and_then(|s| s.segment_ids.get(active_index).copied().flatten());
        self.check_origin(active_segment_id, origin_segment_id);
        self.emit(&yuv, &audio_samples);

        self.last_good_video_frame = Some(yuv);
        self.session_frame_index += 1;
        if let Some(state) = &mut self.block_state {
            state.remaining_block_frames -= 1;
        }
    }

    fn seam_eligible(&self) -> bool {
        let Some(preview) = &self.preview else {
            return false;
        };
        let video_ok = preview.is_pad() || preview.video_depth_frames() >= 1;
        let audio_ok = preview.audio_depth_ms() >= AUDIO_READY_MS;
        video_ok && audio_ok
    }

    fn rotate_preview_into_live(&mut self) {
        self.retire_live();
        self.live = self.preview.take();
        self.reset_cadence_for_live();
        self.arm_next_preload();
    }

    /// Feeds `Cadence` the new live source's own frame rate, falling back to
    /// the output fps (unity advance) when the source has none to report —
    /// a pad segment, or a decoded asset whose container declared no
    /// average frame rate.
    fn reset_cadence_for_live(&mut self) {
        let src_fps = self
            .live
            .as_ref()
            .and_then(|l| l.source_fps())
            .unwrap_or(self.ctx.fps);
        self.cadence.reset(src_fps);
    }

    fn audio_frames_per_tick(&self) -> usize {
        let fps = self.ctx.fps;
        let sample_rate = self.pad_producer.sample_rate() as u64;
        (sample_rate * fps.den / fps.num) as usize
    }

    fn pop_frame_and_audio(&mut self, advance: bool) -> (Vec<u8>, i64, SegmentId, Vec<i16>) {
        let audio_frame_count = self.audio_frames_per_tick();

        if let Some(live) = &self.live {
            let origin = live.segment_id();
            let audio = live.pop_audio(audio_frame_count);
            if advance {
                if let Some(frame) = live.try_get_frame() {
                    return (frame.yuv, frame.content_time_ms, origin, audio);
                }
            }
            if let Some(last) = &self.last_good_video_frame {
                return (last.clone(), 0, origin, audio);
            }
            return (self.pad_producer.black_frame().to_vec(), 0, origin, audio);
        }

        self.emit_pad_tuple(audio_frame_count)
    }

    fn emit_pad_tuple(&mut self, audio_frame_count: usize) -> (Vec<u8>, i64, SegmentId, Vec<i16>) {
        self.metrics.lock().unwrap().pad_frames_emitted_total += 1;
        (
            self.pad_producer.black_frame().to_vec(),
            0,
            SegmentId(0),
            self.pad_producer.silence(audio_frame_count).to_vec(),
        )
    }

    fn emit_padded_gap(&mut self) {
        let audio_frame_count = self.audio_frames_per_tick();
        let (yuv, _content_time_ms, _origin, audio) = self.emit_pad_tuple(audio_frame_count);
        self.emit(&yuv, &audio);
        self.last_good_video_frame = Some(yuv);
        self.session_frame_index += 1;
    }

    fn emit(&mut self, yuv: &[u8], audio: &[i16]) {
        let now = Instant::now();
        let pts_us = self
            .clock
            .as_ref()
            .map(|c| c.frame_index_to_pts_90k(self.session_frame_index) * 1000 / 90)
            .unwrap_or(0);
        self.sink.consume_video(VideoFrame {
            width: self.ctx.width,
            height: self.ctx.height,
            yuv,
            pts_us,
        });
        self.sink.consume_audio(AudioFrame {
            sample_rate: self.pad_producer.sample_rate(),
            channels: self.pad_producer.channels(),
            samples: audio,
            pts_us,
        });

        // Pad reports `usize::MAX`/`u64::MAX` depths (it never underflows, so
        // those fields are exempt from the eligibility gate) — not a real
        // depth to publish as a gauge, so buffer metrics only reflect a real
        // decoded source.
        let video_underflow_base = self.video_underflow_base;
        let audio_underflow_base = self.audio_underflow_base;
        let live_content = self.live.as_ref().filter(|l| !l.is_pad());
        let video_depth = live_content.map(|l| l.video_depth_frames());
        let audio_depth_ms = live_content.map(|l| l.audio_depth_ms());
        let video_underflows = live_content.map(|l| video_underflow_base + l.video_underflow_count());
        let audio_underflows = live_content.map(|l| audio_underflow_base + l.audio_underflow_count());
        let late = self
            .clock
            .as_ref()
            .map(|c| now > c.deadline_for(self.session_frame_index))
            .unwrap_or(false);
        let session_duration_ms = self.clock.as_ref().map(|c| c.elapsed_ms());
        let gap_us = self
            .last_emit_instant
            .map(|prev| now.duration_since(prev).as_micros() as i64);
        self.last_emit_instant = Some(now);

        let mut metrics = self.metrics.lock().unwrap();
        metrics.continuous_frames_emitted_total += 1;
        if late {
            metrics.late_ticks_total += 1;
        }
        if let Some(gap_us) = gap_us {
            metrics.sum_inter_frame_gap_us += gap_us;
            metrics.frame_gap_count += 1;
            metrics.max_inter_frame_gap_us = metrics.max_inter_frame_gap_us.max(gap_us);
        }
        if let Some(depth) = video_depth {
            metrics.video_buffer_depth_frames = depth as i32;
        }
        if let Some(depth_ms) = audio_depth_ms {
            metrics.audio_buffer_depth_ms = depth_ms as i32;
        }
        if let Some(underflows) = video_underflows {
            metrics.video_buffer_underflows = underflows as i64;
        }
        if let Some(underflows) = audio_underflows {
            metrics.audio_buffer_underflows = underflows as i64;
        }
        if let Some(duration_ms) = session_duration_ms {
            metrics.session_duration_ms = duration_ms;
        }
    }

    /// §4.5.1/§8's stale-bleed check: `active_segment_id` is the plan's own
    /// record of which `SegmentId` became live for the tick's classified
    /// segment index (stamped at the seam that activated it, not re-read
    /// from `self.live` here), compared against `origin_segment_id` — the
    /// id the frame actually came from, read independently in
    /// `pop_frame_and_audio`. A mismatch means the plan and the emitted
    /// frame disagree about which segment is authoritative.
    fn check_origin(&mut self, active_segment_id: Option<SegmentId>, origin_segment_id: SegmentId) {
        if let Some(active) = active_segment_id {
            if active != origin_segment_id && origin_segment_id != SegmentId(0) {
                self.metrics
                    .lock()
                    .unwrap()
                    .record_violation("AUTHORITY_ATOMIC_TRANSFER_VIOLATED");
            }
        }
    }

    /// Reads the wall clock once, at session start, to stamp
    /// `session_start_epoch_ms` into the metrics snapshot — the one place
    /// this engine consults its own `TimeSource` outside the deterministic
    /// clock wiring.
    fn stamp_session_start(&mut self) {
        let already_stamped = self.metrics.lock().unwrap().session_start_epoch_ms != 0;
        if !already_stamped {
            let now = self.time_source.now_utc_ms();
            self.metrics.lock().unwrap().session_start_epoch_ms = now;
        }
    }
}

fn e_tag(e: &playout_media::MediaError) -> &'static str {
    let converted: playout_core::BlockPlanError = e.clone().into();
    converted.tag()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{DeterministicTimeSource, DeterministicWaitStrategy};
    use crate::frame_source::test_support::StubFrameSource;
    use crate::sink::RecordingSink;

    fn ctx_640x480_30fps() -> Arc<BlockPlanSessionContext> {
        Arc::new(BlockPlanSessionContext::new(
            "ch1".into(),
            640,
            480,
            RationalFps::new(30, 1),
        ))
    }

    fn new_manager(
        ctx: Arc<BlockPlanSessionContext>,
    ) -> PipelineManager<DeterministicWaitStrategy, DeterministicTimeSource> {
        PipelineManager::new(
            ctx,
            DeterministicTimeSource::new(0),
            DeterministicWaitStrategy::new(),
            Box::new(RecordingSink::new()),
            48_000,
            2,
        )
    }

    #[test]
    fn padded_gap_emits_black_and_silence_when_queue_is_empty() {
        let ctx = ctx_640x480_30fps();
        let mut mgr = new_manager(ctx);
        mgr.run(Some(10));
        let metrics = mgr.snapshot_metrics();
        assert_eq!(metrics.pad_frames_emitted_total, 10);
        assert_eq!(metrics.continuous_frames_emitted_total, 10);
    }

    #[test]
    fn audio_frames_per_tick_matches_sample_rate_over_fps() {
        let ctx = ctx_640x480_30fps();
        let mgr = new_manager(ctx);
        assert_eq!(mgr.audio_frames_per_tick(), 1600);
    }

    #[test]
    fn fence_preload_miss_drops_to_padded_gap_when_queue_runs_dry() {
        // A block with no queued successor: once its frames are exhausted,
        // the manager must fall back to PADDED_GAP rather than holding a
        // stale block forever.
        let ctx = ctx_640x480_30fps();
        let mut mgr = new_manager(ctx);
        let segment_id = mgr.alloc_segment_id();
        mgr.live = Some(Box::new(StubFrameSource::new(segment_id, vec![0, 33, 66])));
        mgr.block_state = Some(ActiveBlockState {
            block: FedBlock {
                block_id: "b1".into(),
                channel_id: "ch1".into(),
                start_utc_ms: 0,
                end_utc_ms: 100,
                segments: vec![],
            },
            block_fence_frame: 3,
            remaining_block_frames: 3,
            active_segment_index: 0,
            planned_segment_seam_frames: vec![3],
            segment_ids: vec![Some(segment_id)],
        });
        mgr.session_frame_index = 3;
        mgr.tick();
        assert!(mgr.block_state.is_none());
        assert!(mgr.live.is_none());
        let metrics = mgr.snapshot_metrics();
        assert_eq!(metrics.violation_counts["FENCE_PRELOAD_MISS"], 1);
    }

    #[test]
    fn stamp_session_start_is_idempotent() {
        let ctx = ctx_640x480_30fps();
        let mut mgr = new_manager(ctx);
        mgr.stamp_session_start();
        let first = mgr.snapshot_metrics().session_start_epoch_ms;
        mgr.stamp_session_start();
        assert_eq!(mgr.snapshot_metrics().session_start_epoch_ms, first);
    }
}
