// crates/playout-media/src/lookahead.rs
//
// Bounded, single-producer/single-consumer lookahead buffers. Video is
// frame-granular (crossbeam_channel gives us a ready-made bounded SPSC ring
// with a non-blocking `try_recv` and a `len()` depth query — exactly the
// contract this needs). Audio is sample-granular — the tick loop wants an
// arbitrary sample count per pop, not whole frames — so it is backed by a
// Mutex<VecDeque> with its own high-water-mark gate instead.
//
// Contract (SPEC_FULL.md §4.2): push blocks only beyond the high-water
// mark; pop never blocks; underflow is counted, never silently retried.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::decode::DecodedVideoFrame;

pub struct VideoLookaheadBuffer {
    tx: Sender<DecodedVideoFrame>,
    rx: Receiver<DecodedVideoFrame>,
    pushed: AtomicU64,
    popped: AtomicU64,
    underflows: AtomicU64,
}

impl VideoLookaheadBuffer {
    pub fn new(capacity_frames: usize) -> Self {
        let (tx, rx) = bounded(capacity_frames.max(1));
        Self {
            tx,
            rx,
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            underflows: AtomicU64::new(0),
        }
    }

    /// Blocks only once the ring is at capacity — called from the fill
    /// thread only.
    pub fn push(&self, frame: DecodedVideoFrame) {
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.pushed.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(frame)) => {
                // Ring is at capacity; a genuine blocking push (fill thread
                // only ever calls this when the low-water mark has already
                // been crossed, so this should be rare).
                if self.tx.send(frame).is_ok() {
                    self.pushed.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Never blocks. `None` both on empty *and* on underflow — the caller
    /// distinguishes by checking `depth_frames()` first if it cares.
    pub fn try_pop(&self) -> Option<DecodedVideoFrame> {
        match self.rx.try_recv() {
            Ok(frame) => {
                self.popped.fetch_add(1, Ordering::Relaxed);
                Some(frame)
            }
            Err(_) => {
                self.underflows.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn depth_frames(&self) -> usize {
        self.rx.len()
    }

    pub fn underflow_count(&self) -> u64 {
        self.underflows.load(Ordering::Relaxed)
    }

    pub fn pushed_count(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    pub fn popped_count(&self) -> u64 {
        self.popped.load(Ordering::Relaxed)
    }
}

struct AudioInner {
    samples: VecDeque<i16>,
}

pub struct AudioLookaheadBuffer {
    inner: Mutex<AudioInner>,
    not_full: Condvar,
    channels: u16,
    sample_rate: u32,
    high_water_samples: usize,
    underflows: AtomicU64,
}

impl AudioLookaheadBuffer {
    /// `high_water_ms` bounds the buffered depth; push blocks beyond it.
    pub fn new(channels: u16, sample_rate: u32, high_water_ms: u32) -> Self {
        let high_water_samples =
            (sample_rate as u64 * high_water_ms as u64 / 1000) as usize * channels as usize;
        Self {
            inner: Mutex::new(AudioInner {
                samples: VecDeque::new(),
            }),
            not_full: Condvar::new(),
            channels,
            sample_rate,
            high_water_samples,
            underflows: AtomicU64::new(0),
        }
    }

    /// `interleaved` is S16 interleaved house-format audio. Blocks (fill
    /// thread only) while the buffer is at or above the high-water mark.
    pub fn push(&self, interleaved: &[i16]) {
        let mut guard = self.inner.lock().unwrap();
        while guard.samples.len() >= self.high_water_samples {
            guard = self.not_full.wait(guard).unwrap();
        }
        guard.samples.extend(interleaved.iter().copied());
    }

    /// Never blocks. Returns up to `nb_frames` frames worth of interleaved
    /// samples (`nb_frames * channels`); fewer (possibly zero) if
    /// underrun, which counts as an underflow.
    pub fn try_pop(&self, nb_frames: usize) -> Vec<i16> {
        let want = nb_frames * self.channels as usize;
        let mut guard = self.inner.lock().unwrap();
        let take = want.min(guard.samples.len());
        if take < want {
            self.underflows.fetch_add(1, Ordering::Relaxed);
        }
        let out: Vec<i16> = guard.samples.drain(..take).collect();
        self.not_full.notify_one();
        out
    }

    pub fn depth_frames(&self) -> usize {
        self.inner.lock().unwrap().samples.len() / self.channels.max(1) as usize
    }

    pub fn depth_ms(&self) -> u64 {
        self.depth_frames() as u64 * 1000 / self.sample_rate.max(1) as u64
    }

    pub fn underflow_count(&self) -> u64 {
        self.underflows.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vframe(ms: i64) -> DecodedVideoFrame {
        DecodedVideoFrame {
            yuv: vec![],
            content_time_ms: ms,
        }
    }

    #[test]
    fn video_push_pop_preserves_order() {
        let buf = VideoLookaheadBuffer::new(4);
        buf.push(vframe(0));
        buf.push(vframe(33));
        assert_eq!(buf.depth_frames(), 2);
        assert_eq!(buf.try_pop().unwrap().content_time_ms, 0);
        assert_eq!(buf.try_pop().unwrap().content_time_ms, 33);
        assert_eq!(buf.depth_frames(), 0);
    }

    #[test]
    fn video_pop_on_empty_counts_underflow_and_never_blocks() {
        let buf = VideoLookaheadBuffer::new(4);
        assert!(buf.try_pop().is_none());
        assert_eq!(buf.underflow_count(), 1);
    }

    #[test]
    fn audio_push_pop_round_trips() {
        let buf = AudioLookaheadBuffer::new(2, 48_000, 1000);
        buf.push(&[1, 2, 3, 4]); // 2 frames, stereo
        assert_eq!(buf.depth_frames(), 2);
        let out = buf.try_pop(2);
        assert_eq!(out, vec![1, 2, 3, 4]);
        assert_eq!(buf.depth_frames(), 0);
    }

    #[test]
    fn audio_partial_pop_counts_underflow() {
        let buf = AudioLookaheadBuffer::new(2, 48_000, 1000);
        buf.push(&[1, 2]); // 1 frame only
        let out = buf.try_pop(10);
        assert_eq!(out, vec![1, 2]);
        assert_eq!(buf.underflow_count(), 1);
    }

    #[test]
    fn audio_depth_ms_matches_sample_rate() {
        let buf = AudioLookaheadBuffer::new(2, 48_000, 2000);
        let frame: Vec<i16> = vec![0; 48_000 * 2]; // 1 second, stereo
        buf.push(&frame);
        assert_eq!(buf.depth_ms(), 1000);
    }
}
