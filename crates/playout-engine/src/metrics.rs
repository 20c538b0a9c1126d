// crates/playout-engine/src/metrics.rs
//
// Passive observability, scraped via a text endpoint. Every counter here
// is read-only with respect to the tick loop: nothing in this file ever
// changes engine behavior, it only reports it.

use std::fmt::Write as _;

#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub session_start_epoch_ms: i64,
    pub session_duration_ms: i64,

    pub continuous_frames_emitted_total: i64,
    pub pad_frames_emitted_total: i64,

    pub source_swap_count: i32,
    pub total_blocks_executed: i32,

    pub next_preload_started_count: i32,
    pub next_preload_ready_count: i32,
    pub next_preload_failed_count: i32,
    pub fence_pad_frames_total: i64,

    pub late_ticks_total: i64,

    pub max_inter_frame_gap_us: i64,
    pub sum_inter_frame_gap_us: i64,
    pub frame_gap_count: i64,

    pub audio_buffer_depth_ms: i32,
    pub audio_buffer_underflows: i64,
    pub audio_buffer_samples_pushed: i64,
    pub audio_buffer_samples_popped: i64,

    pub video_buffer_depth_frames: i32,
    pub video_buffer_underflows: i64,
    pub video_buffer_frames_pushed: i64,
    pub video_buffer_frames_popped: i64,

    pub video_low_water_events: i64,
    pub audio_low_water_events: i64,

    pub detach_count: i32,

    pub encoder_open_count: i32,
    pub encoder_close_count: i32,

    /// Count of each `BlockPlanError::tag()` observed at runtime, keyed by
    /// the stable taxonomy string (§7). Validation-rejection tags never
    /// appear here — those never reach the tick loop.
    pub violation_counts: std::collections::BTreeMap<&'static str, i64>,

    pub channel_id: String,
    pub continuous_mode_active: bool,
}

impl PipelineMetrics {
    pub fn record_violation(&mut self, tag: &'static str) {
        *self.violation_counts.entry(tag).or_insert(0) += 1;
    }

    /// Prometheus text exposition. One gauge/counter block per field,
    /// labeled by channel.
    pub fn generate_prometheus_text(&self) -> String {
        let ch = &self.channel_id;
        let mut out = String::new();

        macro_rules! metric {
            ($name:expr, $kind:expr, $help:expr, $value:expr) => {
                let _ = writeln!(out, "# HELP {} {}", $name, $help);
                let _ = writeln!(out, "# TYPE {} {}", $name, $kind);
                let _ = writeln!(out, "{}{{channel=\"{}\"}} {}", $name, ch, $value);
                out.push('\n');
            };
        }

        metric!(
            "playout_session_duration_ms",
            "gauge",
            "Duration of the continuous output session",
            self.session_duration_ms
        );
        metric!(
            "playout_mode_active",
            "gauge",
            "Whether a continuous output session is running",
            if self.continuous_mode_active { 1 } else { 0 }
        );
        metric!(
            "playout_frames_emitted_total",
            "counter",
            "Total frames emitted in the session",
            self.continuous_frames_emitted_total
        );
        metric!(
            "playout_pad_frames_emitted_total",
            "counter",
            "Total pad frames emitted in the session",
            self.pad_frames_emitted_total
        );
        metric!(
            "playout_source_swap_count",
            "counter",
            "Source swap count (segment/block transitions)",
            self.source_swap_count
        );
        metric!(
            "playout_blocks_executed_total",
            "counter",
            "Total blocks executed",
            self.total_blocks_executed
        );
        metric!(
            "playout_next_preload_started_total",
            "counter",
            "Preloads started",
            self.next_preload_started_count
        );
        metric!(
            "playout_next_preload_ready_total",
            "counter",
            "Preloads ready at fence",
            self.next_preload_ready_count
        );
        metric!(
            "playout_next_preload_failed_total",
            "counter",
            "Preloads failed or not ready",
            self.next_preload_failed_count
        );
        metric!(
            "playout_fence_pad_frames_total",
            "counter",
            "Pad frames emitted at a fence because the next block was not ready",
            self.fence_pad_frames_total
        );
        metric!(
            "playout_late_ticks_total",
            "counter",
            "Ticks where monotonic now exceeded the deadline",
            self.late_ticks_total
        );
        metric!(
            "playout_max_inter_frame_gap_us",
            "gauge",
            "Maximum inter-frame gap in microseconds",
            self.max_inter_frame_gap_us
        );
        let mean_gap = if self.frame_gap_count > 0 {
            self.sum_inter_frame_gap_us as f64 / self.frame_gap_count as f64
        } else {
            0.0
        };
        metric!(
            "playout_mean_inter_frame_gap_us",
            "gauge",
            "Mean inter-frame gap in microseconds",
            mean_gap as i64
        );
        metric!(
            "playout_audio_buffer_depth_ms",
            "gauge",
            "Audio lookahead buffer depth in milliseconds",
            self.audio_buffer_depth_ms
        );
        metric!(
            "playout_audio_buffer_underflows",
            "counter",
            "Audio buffer underflow events",
            self.audio_buffer_underflows
        );
        metric!(
            "playout_video_buffer_depth_frames",
            "gauge",
            "Video lookahead buffer depth in frames",
            self.video_buffer_depth_frames
        );
        metric!(
            "playout_video_buffer_underflows",
            "counter",
            "Video buffer underflow events",
            self.video_buffer_underflows
        );
        metric!(
            "playout_detach_count",
            "counter",
            "Underflow-triggered session stops",
            self.detach_count
        );
        metric!(
            "playout_encoder_open_count",
            "counter",
            "Encoder open count (expected 1 per session)",
            self.encoder_open_count
        );
        metric!(
            "playout_encoder_close_count",
            "counter",
            "Encoder close count (expected 1 per session)",
            self.encoder_close_count
        );

        for (tag, count) in &self.violation_counts {
            let _ = writeln!(
                out,
                "# HELP playout_violation_total Contract violations by taxonomy tag"
            );
            let _ = writeln!(out, "# TYPE playout_violation_total counter");
            let _ = writeln!(
                out,
                "playout_violation_total{{channel=\"{ch}\",tag=\"{tag}\"}} {count}"
            );
            out.push('\n');
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prometheus_text_includes_channel_label() {
        let mut metrics = PipelineMetrics {
            channel_id: "ch7".into(),
            ..Default::default()
        };
        metrics.continuous_frames_emitted_total = 42;
        let text = metrics.generate_prometheus_text();
        assert!(text.contains("playout_frames_emitted_total{channel=\"ch7\"} 42"));
    }

    #[test]
    fn violation_counts_accumulate_by_tag() {
        let mut metrics = PipelineMetrics::default();
        metrics.record_violation("FENCE_PRELOAD_MISS");
        metrics.record_violation("FENCE_PRELOAD_MISS");
        metrics.record_violation("DEGRADED_TAKE_MODE");
        assert_eq!(metrics.violation_counts["FENCE_PRELOAD_MISS"], 2);
        assert_eq!(metrics.violation_counts["DEGRADED_TAKE_MODE"], 1);
    }
}
