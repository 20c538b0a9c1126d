// crates/playout-engine/src/session.rs
//
// BlockPlanSessionContext: the thread-safe handoff between the external
// controller (whatever hands FedBlocks to the engine) and the tick thread.
// Mirrors the original's mutex + condvar + stop-flag queue shape.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use playout_core::{BlockPlanError, FedBlock, RationalFps};

struct QueueState {
    blocks: VecDeque<FedBlock>,
}

pub struct BlockPlanSessionContext {
    pub channel_id: String,
    pub width: u32,
    pub height: u32,
    pub fps: RationalFps,
    queue: Mutex<QueueState>,
    queue_not_empty: Condvar,
    stop_requested: AtomicBool,
    /// Tracks the previous enqueued block's id/`end_utc_ms` so
    /// `enqueue_block` can enforce contiguity without a second lock.
    last_block: Mutex<Option<(String, i64)>>,
    seen_block_ids: Mutex<std::collections::HashSet<String>>,
}

impl BlockPlanSessionContext {
    pub fn new(channel_id: String, width: u32, height: u32, fps: RationalFps) -> Self {
        Self {
            channel_id,
            width,
            height,
            fps,
            queue: Mutex::new(QueueState {
                blocks: VecDeque::new(),
            }),
            queue_not_empty: Condvar::new(),
            stop_requested: AtomicBool::new(false),
            last_block: Mutex::new(None),
            seen_block_ids: Mutex::new(std::collections::HashSet::new()),
        }
    }

    /// Validates the block (duration sum, staleness vs `now_utc_ms`,
    /// contiguity with the previous enqueued block, duplicate id) and
    /// enqueues it only on success. Validation failures never enter the
    /// queue — per §7, these are the four variants returned as `Err`.
    pub fn enqueue_block(&self, block: FedBlock, now_utc_ms: i64) -> Result<(), BlockPlanError> {
        block.validate()?;

        if block.end_utc_ms <= now_utc_ms {
            return Err(BlockPlanError::StaleBlockFromCore {
                block_id: block.block_id.clone(),
                end_utc_ms: block.end_utc_ms,
                now_utc_ms,
            });
        }

        {
            let mut seen = self.seen_block_ids.lock().unwrap();
            if !seen.insert(block.block_id.clone()) {
                return Err(BlockPlanError::DuplicateBlock {
                    block_id: block.block_id.clone(),
                });
            }
        }

        {
            let mut last_block = self.last_block.lock().unwrap();
            if let Some((previous_block_id, previous_end_utc_ms)) = last_block.clone() {
                if block.start_utc_ms != previous_end_utc_ms {
                    return Err(BlockPlanError::BlockNotContiguous {
                        block_id: block.block_id.clone(),
                        previous_block_id,
                        previous_end_utc_ms,
                        start_utc_ms: block.start_utc_ms,
                    });
                }
            }
            *last_block = Some((block.block_id.clone(), block.end_utc_ms));
        }

        let mut state = self.queue.lock().unwrap();
        state.blocks.push_back(block);
        self.queue_not_empty.notify_one();
        Ok(())
    }

    /// Non-blocking. `None` if the queue is empty.
    pub fn try_pop_block(&self) -> Option<FedBlock> {
        self.queue.lock().unwrap().blocks.pop_front()
    }

    /// Peeks the next block without removing it (used to decide whether to
    /// start a preload).
    pub fn peek_block(&self) -> Option<FedBlock> {
        self.queue.lock().unwrap().blocks.front().cloned()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().blocks.len()
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.queue_not_empty.notify_all();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playout_core::block::{Segment, SegmentType, TransitionType};

    fn simple_block(id: &str, start: i64, end: i64) -> FedBlock {
        FedBlock {
            block_id: id.into(),
            channel_id: "ch1".into(),
            start_utc_ms: start,
            end_utc_ms: end,
            segments: vec![Segment {
                index: 0,
                segment_type: SegmentType::Content,
                asset_uri: "file:///a.mp4".into(),
                asset_start_offset_ms: 0,
                segment_duration_ms: end - start,
                transition_in: TransitionType::None,
                transition_out: TransitionType::None,
                gain_db: 0.0,
            }],
        }
    }

    #[test]
    fn stale_block_is_rejected_and_never_enqueued() {
        let ctx = BlockPlanSessionContext::new("ch1".into(), 640, 480, RationalFps::NTSC_30);
        let err = ctx
            .enqueue_block(simple_block("b1", 0, 1000), 5000)
            .unwrap_err();
        assert_eq!(err.tag(), "STALE_BLOCK_FROM_CORE");
        assert_eq!(ctx.queue_len(), 0);
    }

    #[test]
    fn duplicate_block_id_is_rejected() {
        let ctx = BlockPlanSessionContext::new("ch1".into(), 640, 480, RationalFps::NTSC_30);
        ctx.enqueue_block(simple_block("b1", 0, 1000), 0).unwrap();
        let err = ctx
            .enqueue_block(simple_block("b1", 1000, 2000), 0)
            .unwrap_err();
        assert_eq!(err.tag(), "DUPLICATE_BLOCK");
    }

    #[test]
    fn non_contiguous_block_is_rejected() {
        let ctx = BlockPlanSessionContext::new("ch1".into(), 640, 480, RationalFps::NTSC_30);
        ctx.enqueue_block(simple_block("b1", 0, 1000), 0).unwrap();
        let err = ctx
            .enqueue_block(simple_block("b2", 1500, 2500), 0)
            .unwrap_err();
        assert_eq!(err.tag(), "BLOCK_NOT_CONTIGUOUS");
    }

    #[test]
    fn contiguous_blocks_enqueue_in_order() {
        let ctx = BlockPlanSessionContext::new("ch1".into(), 640, 480, RationalFps::NTSC_30);
        ctx.enqueue_block(simple_block("b1", 0, 1000), 0).unwrap();
        ctx.enqueue_block(simple_block("b2", 1000, 2000), 0)
            .unwrap();
        assert_eq!(ctx.queue_len(), 2);
        assert_eq!(ctx.try_pop_block().unwrap().block_id, "b1");
        assert_eq!(ctx.try_pop_block().unwrap().block_id, "b2");
    }
}
