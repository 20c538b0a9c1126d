// crates/playout-core/src/block.rs
//
// The scheduled-program data model: FedBlock, its ordered Segments, and the
// per-segment transition declaration. Validation runs once, at
// `EnqueueBlock` time — a rejected block never reaches the session queue.

use serde::{Deserialize, Serialize};

use crate::error::BlockPlanError;

/// Opaque, process-local identity for an active segment. Assigned by the
/// engine when a segment's TickProducer is constructed (not by the caller),
/// so it is comparable across blocks within one session without needing a
/// composite (block_id, segment_index) key on every hot-path comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SegmentId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentType {
    Content,
    Pad,
}

/// The only two transition kinds this engine honors. Unlike a dissolve
/// between two clips, `Fade` is a single-segment attenuation toward black
/// video and silent audio — see `crate::fade`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TransitionType {
    None,
    Fade { duration_ms: i64 },
}

impl Default for TransitionType {
    fn default() -> Self {
        TransitionType::None
    }
}

impl TransitionType {
    pub fn duration_ms(&self) -> i64 {
        match self {
            TransitionType::None => 0,
            TransitionType::Fade { duration_ms } => *duration_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub index: u32,
    pub segment_type: SegmentType,
    /// Empty for `SegmentType::Pad`.
    #[serde(default)]
    pub asset_uri: String,
    #[serde(default)]
    pub asset_start_offset_ms: i64,
    pub segment_duration_ms: i64,
    #[serde(default)]
    pub transition_in: TransitionType,
    #[serde(default)]
    pub transition_out: TransitionType,
    /// Loudness adjustment in dB; 0.0 means unity gain (no-op pass-through).
    #[serde(default)]
    pub gain_db: f32,
}

impl Segment {
    pub fn is_pad(&self) -> bool {
        matches!(self.segment_type, SegmentType::Pad)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FedBlock {
    pub block_id: String,
    pub channel_id: String,
    pub start_utc_ms: i64,
    pub end_utc_ms: i64,
    pub segments: Vec<Segment>,
}

impl FedBlock {
    pub fn span_ms(&self) -> i64 {
        self.end_utc_ms - self.start_utc_ms
    }

    pub fn segments_sum_ms(&self) -> i64 {
        self.segments.iter().map(|s| s.segment_duration_ms).sum()
    }

    /// Structural validation run once at `EnqueueBlock` time. Does not check
    /// staleness or contiguity against session state — the caller (the
    /// session context) checks those since they require knowing "now" and
    /// the previously enqueued block.
    pub fn validate(&self) -> Result<(), BlockPlanError> {
        let sum = self.segments_sum_ms();
        let span = self.span_ms();
        if sum != span {
            return Err(BlockPlanError::SegmentDurationMismatch {
                block_id: self.block_id.clone(),
                segments_sum_ms: sum,
                block_span_ms: span,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_segment(index: u32, duration_ms: i64) -> Segment {
        Segment {
            index,
            segment_type: SegmentType::Content,
            asset_uri: format!("file:///clip{index}.mp4"),
            asset_start_offset_ms: 0,
            segment_duration_ms: duration_ms,
            transition_in: TransitionType::None,
            transition_out: TransitionType::None,
            gain_db: 0.0,
        }
    }

    #[test]
    fn validate_accepts_matching_sum() {
        let block = FedBlock {
            block_id: "b1".into(),
            channel_id: "ch1".into(),
            start_utc_ms: 0,
            end_utc_ms: 5000,
            segments: vec![content_segment(0, 2000), content_segment(1, 3000)],
        };
        assert!(block.validate().is_ok());
    }

    #[test]
    fn validate_rejects_mismatched_sum() {
        let block = FedBlock {
            block_id: "b1".into(),
            channel_id: "ch1".into(),
            start_utc_ms: 0,
            end_utc_ms: 5000,
            segments: vec![content_segment(0, 2000)],
        };
        let err = block.validate().unwrap_err();
        assert_eq!(err.tag(), "SEGMENT_DURATION_MISMATCH");
    }

    #[test]
    fn transition_default_is_none() {
        assert_eq!(TransitionType::default(), TransitionType::None);
        assert_eq!(TransitionType::default().duration_ms(), 0);
    }
}
