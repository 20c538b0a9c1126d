// crates/playout-core/src/fingerprint.rs
//
// Seam-verification fingerprinting: a CRC32 of the leading bytes of a
// frame's Y plane plus identifying metadata, used to prove that no pad
// frame leaked into the K-frame window around a block boundary.

use crate::block::SegmentId;

pub const FINGERPRINT_Y_BYTES: usize = 4096;

#[inline]
pub fn crc32_prefix(y_plane_prefix: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&y_plane_prefix[..y_plane_prefix.len().min(FINGERPRINT_Y_BYTES)]);
    hasher.finalize()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFingerprint {
    pub session_frame_index: i64,
    pub origin_segment_id: SegmentId,
    pub is_pad: bool,
    pub y_crc32: u32,
}

impl FrameFingerprint {
    pub fn capture(
        session_frame_index: i64,
        origin_segment_id: SegmentId,
        is_pad: bool,
        yuv_frame: &[u8],
    ) -> Self {
        let y_crc32 = crc32_prefix(yuv_frame);
        Self {
            session_frame_index,
            origin_segment_id,
            is_pad,
            y_crc32,
        }
    }
}

/// Result of comparing the last K fingerprints of an outgoing block against
/// the first K fingerprints of the incoming block. A "seamless" proof is
/// `pad_frames_in_window == 0`.
#[derive(Debug, Clone)]
pub struct BoundaryReport {
    pub window_size: usize,
    pub outgoing_tail: Vec<FrameFingerprint>,
    pub incoming_head: Vec<FrameFingerprint>,
    pub pad_frames_in_window: usize,
}

impl BoundaryReport {
    pub fn build(
        outgoing_tail: Vec<FrameFingerprint>,
        incoming_head: Vec<FrameFingerprint>,
    ) -> Self {
        let pad_frames_in_window = outgoing_tail
            .iter()
            .chain(incoming_head.iter())
            .filter(|f| f.is_pad)
            .count();
        Self {
            window_size: outgoing_tail.len().max(incoming_head.len()),
            outgoing_tail,
            incoming_head,
            pad_frames_in_window,
        }
    }

    pub fn is_seamless(&self) -> bool {
        self.pad_frames_in_window == 0
    }

    /// Human-readable summary for log lines / CLI diagnostics.
    pub fn render(&self) -> String {
        format!(
            "BoundaryReport[window={}, pad_frames_in_window={}, seamless={}]",
            self.window_size,
            self.pad_frames_in_window,
            self.is_seamless()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(i: i64, seg: u32, pad: bool) -> FrameFingerprint {
        FrameFingerprint {
            session_frame_index: i,
            origin_segment_id: SegmentId(seg),
            is_pad: pad,
            y_crc32: 0,
        }
    }

    #[test]
    fn seamless_window_has_no_pad_frames() {
        let outgoing = vec![fp(0, 1, false), fp(1, 1, false)];
        let incoming = vec![fp(2, 2, false), fp(3, 2, false)];
        let report = BoundaryReport::build(outgoing, incoming);
        assert!(report.is_seamless());
        assert_eq!(report.pad_frames_in_window, 0);
    }

    #[test]
    fn pad_frame_in_window_is_detected() {
        let outgoing = vec![fp(0, 1, false), fp(1, 1, true)];
        let incoming = vec![fp(2, 2, false)];
        let report = BoundaryReport::build(outgoing, incoming);
        assert!(!report.is_seamless());
        assert_eq!(report.pad_frames_in_window, 1);
    }

    #[test]
    fn crc32_prefix_is_stable_for_same_bytes() {
        let buf = vec![42u8; 8192];
        assert_eq!(crc32_prefix(&buf), crc32_prefix(&buf));
    }

    #[test]
    fn crc32_prefix_only_considers_leading_bytes() {
        let mut a = vec![1u8; FINGERPRINT_Y_BYTES];
        let mut b = a.clone();
        a.extend_from_slice(&[9u8; 100]);
        b.extend_from_slice(&[255u8; 100]);
        assert_eq!(crc32_prefix(&a), crc32_prefix(&b));
    }
}
