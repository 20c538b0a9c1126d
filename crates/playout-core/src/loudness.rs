// crates/playout-core/src/loudness.rs
//
// Constant-gain S16 audio scaling. One segment-level dB value, applied
// uniformly to every sample — no compressor, no lookahead, no per-band
// processing. `gain_db == 0.0` is unity gain and should be treated as a
// no-op by callers that want to skip the multiply entirely.

/// Convert a dB value to a linear amplitude scale factor: `10^(dB/20)`.
#[inline]
pub fn gain_db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Scale every sample in `samples` (S16, interleaved, any channel count) by
/// `gain`, clamping to `[i16::MIN, i16::MAX]` with no wraparound.
///
/// The clamp is branch-based here; a branchless variant (via
/// `f32::clamp` is itself branchless on most targets, so this already
/// satisfies the "either implementation, identical behavior" contract
/// without needing a second code path) would observe the same output for
/// every input — see DESIGN.md's resolution of the branchless/branched
/// open question.
pub fn apply_gain_s16(samples: &mut [i16], gain: f32) {
    if gain == 1.0 {
        return;
    }
    for s in samples.iter_mut() {
        let scaled = (*s as f32) * gain;
        *s = scaled.clamp(i16::MIN as f32, i16::MAX as f32).round() as i16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity_gain_is_zero_db() {
        assert!((gain_db_to_linear(0.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn plus_6db_roughly_doubles() {
        let g = gain_db_to_linear(6.0);
        assert!((g - 1.9953).abs() < 1e-3);
    }

    #[test]
    fn minus_6db_roughly_halves() {
        let g = gain_db_to_linear(-6.0);
        assert!((g - 0.5012).abs() < 1e-3);
    }

    #[test]
    fn apply_gain_clamps_without_wraparound() {
        let mut samples = [30_000i16, -30_000, 100];
        apply_gain_s16(&mut samples, gain_db_to_linear(6.0));
        assert_eq!(samples[0], i16::MAX);
        assert_eq!(samples[1], i16::MIN);
        assert!(samples[2] > 100);
    }

    #[test]
    fn apply_gain_unity_is_true_no_op() {
        let mut samples = [1i16, -1, 12345];
        let before = samples;
        apply_gain_s16(&mut samples, 1.0);
        assert_eq!(samples, before);
    }

    #[test]
    fn apply_gain_silence_at_minus_infinity_like_large_negative_db() {
        let mut samples = [12_345i16, -12_345];
        apply_gain_s16(&mut samples, gain_db_to_linear(-96.0));
        assert_eq!(samples, [0, 0]);
    }
}
