// crates/playout-engine/src/clock.rs
//
// The wait-strategy and time-source boundaries (SPEC_FULL.md §9): each has a
// production variant and a deterministic test variant, decoupling "sleep
// until a deadline" from the deadline math itself. `OutputClock` is generic
// over both so the tick loop carries zero vtable calls on its hot path.

use std::time::{Duration, Instant};

use playout_core::RationalFps;

/// `NowUtcMs` — wall-clock UTC milliseconds, used only to map
/// `FedBlock::end_utc_ms` onto a session frame index at block load; never
/// consulted on the per-tick hot path.
pub trait TimeSource: Send {
    fn now_utc_ms(&self) -> i64;
}

pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_utc_ms(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as i64
    }
}

/// Deterministic clock for tests: starts at a fixed UTC and only advances
/// when told to, so block-fence arithmetic is reproducible.
pub struct DeterministicTimeSource {
    now_ms: std::sync::atomic::AtomicI64,
}

impl DeterministicTimeSource {
    pub fn new(start_utc_ms: i64) -> Self {
        Self {
            now_ms: std::sync::atomic::AtomicI64::new(start_utc_ms),
        }
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms
            .fetch_add(delta_ms, std::sync::atomic::Ordering::Relaxed);
    }
}

impl TimeSource for DeterministicTimeSource {
    fn now_utc_ms(&self) -> i64 {
        self.now_ms.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// `WaitUntil` — decouples sleeping from deadline math.
pub trait WaitStrategy: Send {
    fn wait_until(&mut self, deadline: Instant);
}

pub struct RealtimeWaitStrategy;

impl WaitStrategy for RealtimeWaitStrategy {
    fn wait_until(&mut self, deadline: Instant) {
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

/// Advances a virtual clock by exactly one frame per call; never sleeps.
/// Tests use this to drive the tick loop at full speed while still exercising
/// the real deadline-accounting arithmetic.
pub struct DeterministicWaitStrategy {
    calls: u64,
}

impl DeterministicWaitStrategy {
    pub fn new() -> Self {
        Self { calls: 0 }
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for DeterministicWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for DeterministicWaitStrategy {
    fn wait_until(&mut self, _deadline: Instant) {
        self.calls += 1;
    }
}

/// Exact rational frame timing anchored to a session-start monotonic instant.
pub struct OutputClock {
    fps: RationalFps,
    session_start: Instant,
}

impl OutputClock {
    pub fn new(fps: RationalFps, session_start: Instant) -> Self {
        Self { fps, session_start }
    }

    /// `DeadlineFor(N)` = `session_start + N * frame_duration`, computed from
    /// the exact nanosecond duration — no float round-off, no accumulated
    /// per-frame rounding.
    pub fn deadline_for(&self, tick: i64) -> Instant {
        let duration_ns = self.fps.duration_from_frames_ns(tick);
        self.session_start + Duration::from_nanos(duration_ns as u64)
    }

    pub fn frame_index_to_pts_90k(&self, tick: i64) -> i64 {
        self.fps.frame_index_to_pts_90k(tick)
    }

    pub fn wait_for_frame(&self, tick: i64, strategy: &mut dyn WaitStrategy) {
        strategy.wait_until(self.deadline_for(tick));
    }

    pub fn fps(&self) -> RationalFps {
        self.fps
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.session_start.elapsed().as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_spacing_matches_frame_duration_within_one_ns() {
        let fps = RationalFps::NTSC_30;
        let clock = OutputClock::new(fps, Instant::now());
        let d0 = clock.deadline_for(0);
        let d1 = clock.deadline_for(1);
        let spacing = d1 - d0;
        let expected = Duration::from_nanos(fps.frame_duration_ns() as u64);
        let diff = if spacing > expected {
            spacing - expected
        } else {
            expected - spacing
        };
        assert!(diff <= Duration::from_nanos(1));
    }

    #[test]
    fn accumulated_drift_is_zero_over_100k_ticks() {
        let fps = RationalFps::NTSC_30;
        let clock = OutputClock::new(fps, Instant::now());
        let n = 100_000i64;
        let got = clock.deadline_for(n) - clock.deadline_for(0);
        let expected_ns = fps.duration_from_frames_ns(n);
        assert_eq!(got, Duration::from_nanos(expected_ns as u64));
    }

    #[test]
    fn deterministic_wait_strategy_never_sleeps_but_counts_calls() {
        let fps = RationalFps::NTSC_30;
        let clock = OutputClock::new(fps, Instant::now());
        let mut strategy = DeterministicWaitStrategy::new();
        for tick in 0..10 {
            clock.wait_for_frame(tick, &mut strategy);
        }
        assert_eq!(strategy.calls(), 10);
    }
}
