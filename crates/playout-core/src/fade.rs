// crates/playout-core/src/fade.rs
//
// Fade-in/fade-out postprocessing. Unlike `transitions` in the teacher this
// workspace was built from, a fade here is a single-segment attenuation
// toward black video and silent audio — there is no second clip to dissolve
// into. The fade alpha is fixed-point (Q16) rather than floating point
// because `TickProducer::try_get_frame` runs on the hot path alongside the
// rest of the tick loop's integer-only math.

pub const Q16_ONE: u32 = 1 << 16;

/// Broadcast black in YUV420P: Y = 16, U = V = 128 (not full-range 0/128/128).
pub const BLACK_Y: u8 = 16;
pub const NEUTRAL_CHROMA: u8 = 128;

/// Fade-in alpha at `content_time_ms` into the segment, ramping from 0 (the
/// **first** frame, per the alpha=0 obligation) to `Q16_ONE` at
/// `fade_duration_ms`. Alpha stays at `Q16_ONE` once the fade window has
/// elapsed.
#[inline]
pub fn fade_in_alpha_q16(content_time_ms: i64, fade_duration_ms: i64) -> u32 {
    if fade_duration_ms <= 0 || content_time_ms >= fade_duration_ms {
        return Q16_ONE;
    }
    if content_time_ms <= 0 {
        return 0;
    }
    ((content_time_ms as i128 * Q16_ONE as i128) / fade_duration_ms as i128) as u32
}

/// Fade-out alpha, ramping from `Q16_ONE` down to 0 over the last
/// `fade_duration_ms` of a segment of total length `segment_duration_ms`.
/// The **last** frame (`content_time_ms == segment_duration_ms`, or later)
/// must land at exactly 0.
#[inline]
pub fn fade_out_alpha_q16(
    content_time_ms: i64,
    segment_duration_ms: i64,
    fade_duration_ms: i64,
) -> u32 {
    if fade_duration_ms <= 0 {
        return Q16_ONE;
    }
    let fade_start_ms = segment_duration_ms - fade_duration_ms;
    if content_time_ms <= fade_start_ms {
        return Q16_ONE;
    }
    if content_time_ms >= segment_duration_ms {
        return 0;
    }
    let remaining_ms = segment_duration_ms - content_time_ms;
    ((remaining_ms as i128 * Q16_ONE as i128) / fade_duration_ms as i128) as u32
}

/// Combine an (optional) fade-in and an (optional) fade-out alpha for the
/// same frame: whichever fade is active at this content-time wins. Segments
/// with no fade declared pass `fade_duration_ms <= 0` for both, which
/// always yields `Q16_ONE` (fully visible / fully audible).
#[inline]
pub fn combined_alpha_q16(
    content_time_ms: i64,
    segment_duration_ms: i64,
    fade_in_duration_ms: i64,
    fade_out_duration_ms: i64,
) -> u32 {
    let a_in = fade_in_alpha_q16(content_time_ms, fade_in_duration_ms);
    let a_out = fade_out_alpha_q16(content_time_ms, segment_duration_ms, fade_out_duration_ms);
    a_in.min(a_out)
}

#[inline]
fn blend_toward_q16(value: u8, target: u8, alpha_q16: u32) -> u8 {
    // alpha_q16 == 0 -> target; alpha_q16 == Q16_ONE -> value.
    let a = alpha_q16.min(Q16_ONE) as i64;
    let v = value as i64;
    let t = target as i64;
    (t + (v - t) * a / Q16_ONE as i64) as u8
}

/// Attenuate a packed YUV420P buffer (`[Y: w*h][U: w/2*h/2][V: w/2*h/2]`)
/// toward broadcast black in place. `alpha_q16 = Q16_ONE` is a no-op;
/// `alpha_q16 = 0` produces the pad producer's exact black-frame bytes.
pub fn attenuate_yuv_toward_black(buf: &mut [u8], width: u32, height: u32, alpha_q16: u32) {
    if alpha_q16 >= Q16_ONE {
        return;
    }
    let y_len = (width * height) as usize;
    let uv_len = ((width / 2) * (height / 2)) as usize;
    debug_assert_eq!(buf.len(), y_len + uv_len * 2);

    for b in &mut buf[..y_len] {
        *b = blend_toward_q16(*b, BLACK_Y, alpha_q16);
    }
    for b in &mut buf[y_len..y_len + uv_len * 2] {
        *b = blend_toward_q16(*b, NEUTRAL_CHROMA, alpha_q16);
    }
}

/// Attenuate interleaved S16 audio toward silence in place.
/// `alpha_q16 = Q16_ONE` is a no-op; `alpha_q16 = 0` yields exact silence.
pub fn attenuate_audio_toward_silence(samples: &mut [i16], alpha_q16: u32) {
    if alpha_q16 >= Q16_ONE {
        return;
    }
    let a = alpha_q16.min(Q16_ONE) as i64;
    for s in samples.iter_mut() {
        *s = ((*s as i64) * a / Q16_ONE as i64) as i16;
    }
}

/// Mean luma of the Y plane in a packed YUV420P buffer — used by tests to
/// assert "Y-mean <= broadcast-black threshold" for fade-in first frames.
pub fn y_plane_mean(buf: &[u8], width: u32, height: u32) -> f64 {
    let y_len = (width * height) as usize;
    let y = &buf[..y_len];
    y.iter().map(|&b| b as f64).sum::<f64>() / y_len as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fade_in_first_frame_alpha_is_zero() {
        assert_eq!(fade_in_alpha_q16(0, 500), 0);
    }

    #[test]
    fn fade_in_completes_at_duration() {
        assert_eq!(fade_in_alpha_q16(500, 500), Q16_ONE);
        assert_eq!(fade_in_alpha_q16(600, 500), Q16_ONE);
    }

    #[test]
    fn fade_in_midpoint_is_half() {
        let a = fade_in_alpha_q16(250, 500);
        assert!((a as i64 - (Q16_ONE / 2) as i64).abs() <= 1);
    }

    #[test]
    fn fade_out_last_frame_alpha_is_zero() {
        assert_eq!(fade_out_alpha_q16(5000, 5000, 500), 0);
    }

    #[test]
    fn fade_out_before_window_is_full() {
        assert_eq!(fade_out_alpha_q16(1000, 5000, 500), Q16_ONE);
    }

    #[test]
    fn no_fade_is_always_full() {
        assert_eq!(fade_in_alpha_q16(0, 0), Q16_ONE);
        assert_eq!(fade_out_alpha_q16(0, 5000, 0), Q16_ONE);
    }

    #[test]
    fn attenuate_yuv_zero_alpha_matches_black_frame() {
        let width = 4;
        let height = 2;
        let mut buf = vec![200u8; (width * height + 2 * (width / 2) * (height / 2)) as usize];
        attenuate_yuv_toward_black(&mut buf, width, height, 0);
        let y_len = (width * height) as usize;
        assert!(buf[..y_len].iter().all(|&b| b == BLACK_Y));
        assert!(buf[y_len..].iter().all(|&b| b == NEUTRAL_CHROMA));
    }

    #[test]
    fn attenuate_yuv_full_alpha_is_noop() {
        let width = 4;
        let height = 2;
        let mut buf = vec![200u8; (width * height + 2 * (width / 2) * (height / 2)) as usize];
        let before = buf.clone();
        attenuate_yuv_toward_black(&mut buf, width, height, Q16_ONE);
        assert_eq!(buf, before);
    }

    #[test]
    fn attenuate_audio_zero_alpha_is_silence() {
        let mut samples = [12_345i16, -12_345, 1];
        attenuate_audio_toward_silence(&mut samples, 0);
        assert_eq!(samples, [0, 0, 0]);
    }

    #[test]
    fn y_plane_mean_black_frame_is_sixteen() {
        let width = 4;
        let height = 2;
        let y_len = (width * height) as usize;
        let mut buf = vec![BLACK_Y; y_len + 2 * (width / 2 * height / 2) as usize];
        for b in &mut buf[y_len..] {
            *b = NEUTRAL_CHROMA;
        }
        assert_eq!(y_plane_mean(&buf, width, height), 16.0);
    }
}
