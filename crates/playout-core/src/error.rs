// crates/playout-core/src/error.rs
//
// The error taxonomy is split into two groups by how the engine handles
// them (see SPEC_FULL.md §7):
//
//   - validation errors reject a block before it ever enters the session
//     queue, and are returned as `Err` from `EnqueueBlock`.
//   - runtime conditions are observed by the tick loop, handled locally via
//     the fallback rules, and surfaced only through metrics counters and a
//     log-once-per-kind line — never returned as `Err` to a caller, since
//     the tick loop has no caller to return to.
//
// Both live in one enum so a single log call site / metrics tag table can
// match on `BlockPlanError` regardless of which group produced it.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockPlanError {
    #[error("block {block_id} rejected: end_utc_ms {end_utc_ms} <= session now {now_utc_ms}")]
    StaleBlockFromCore {
        block_id: String,
        end_utc_ms: i64,
        now_utc_ms: i64,
    },

    #[error(
        "block {block_id} segment duration mismatch: segments sum to {segments_sum_ms} ms, \
         block spans {block_span_ms} ms"
    )]
    SegmentDurationMismatch {
        block_id: String,
        segments_sum_ms: i64,
        block_span_ms: i64,
    },

    #[error(
        "block {block_id} not contiguous with previous block {previous_block_id}: \
         previous ends at {previous_end_utc_ms}, this starts at {start_utc_ms}"
    )]
    BlockNotContiguous {
        block_id: String,
        previous_block_id: String,
        previous_end_utc_ms: i64,
        start_utc_ms: i64,
    },

    #[error("duplicate block id {block_id}")]
    DuplicateBlock { block_id: String },

    #[error("asset missing: {asset_uri}")]
    AssetMissing { asset_uri: String },

    #[error("asset error opening {asset_uri}: {message}")]
    AssetError { asset_uri: String, message: String },

    #[error("decode error on {asset_uri}: {message}")]
    DecodeError { asset_uri: String, message: String },

    #[error(
        "asset_start_offset_ms {offset_ms} exceeds asset duration {asset_duration_ms} for {asset_uri}"
    )]
    OffsetExceedsAsset {
        asset_uri: String,
        offset_ms: i64,
        asset_duration_ms: i64,
    },

    #[error("fence reached for block {block_id} but next block's preview was not ready")]
    FencePreloadMiss { block_id: String },

    #[error("fence reached with pad active but audio source was null (should be unreachable)")]
    FenceAudioPad,

    #[error("degraded TAKE mode engaged: holding last good frame until incoming source primes")]
    DegradedTakeMode,

    #[error(
        "authority transfer violated at tick {tick}: frame origin_segment_id {origin_segment_id} \
         != active_segment_id {active_segment_id}"
    )]
    AuthorityAtomicTransferViolated {
        tick: i64,
        origin_segment_id: u32,
        active_segment_id: u32,
    },

    #[error("frame authority vacuum at tick {tick}: active source empty and successor not eligible")]
    ContinuousFrameAuthorityVacuum { tick: i64 },

    #[error("session terminated: {reason}")]
    SessionTerminated { reason: String },
}

impl BlockPlanError {
    /// Stable tag used as the log-once-per-kind key and as the metrics
    /// violation-counter label. Distinct from `Display`, which carries
    /// per-occurrence detail.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::StaleBlockFromCore { .. } => "STALE_BLOCK_FROM_CORE",
            Self::SegmentDurationMismatch { .. } => "SEGMENT_DURATION_MISMATCH",
            Self::BlockNotContiguous { .. } => "BLOCK_NOT_CONTIGUOUS",
            Self::DuplicateBlock { .. } => "DUPLICATE_BLOCK",
            Self::AssetMissing { .. } => "ASSET_MISSING",
            Self::AssetError { .. } => "ASSET_ERROR",
            Self::DecodeError { .. } => "DECODE_ERROR",
            Self::OffsetExceedsAsset { .. } => "OFFSET_EXCEEDS_ASSET",
            Self::FencePreloadMiss { .. } => "FENCE_PRELOAD_MISS",
            Self::FenceAudioPad => "FENCE_AUDIO_PAD",
            Self::DegradedTakeMode => "DEGRADED_TAKE_MODE",
            Self::AuthorityAtomicTransferViolated { .. } => "AUTHORITY_ATOMIC_TRANSFER_VIOLATED",
            Self::ContinuousFrameAuthorityVacuum { .. } => "CONTINUOUS_FRAME_AUTHORITY_VACUUM",
            Self::SessionTerminated { .. } => "SESSION_TERMINATED",
        }
    }

    /// Whether this condition aborts the session outright. Only an
    /// unrecoverable decode error with no pad fallback available does.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionTerminated { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stable_taxonomy_names() {
        let e = BlockPlanError::DuplicateBlock {
            block_id: "b1".into(),
        };
        assert_eq!(e.tag(), "DUPLICATE_BLOCK");
        assert!(!e.is_fatal());
    }

    #[test]
    fn session_terminated_is_fatal() {
        let e = BlockPlanError::SessionTerminated {
            reason: "decode error with no pad fallback".into(),
        };
        assert!(e.is_fatal());
    }
}
