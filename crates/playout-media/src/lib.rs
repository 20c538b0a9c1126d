// crates/playout-media/src/lib.rs
//!
//! Decode and producer plumbing for one media asset at a time: the
//! per-segment decoder, bounded lookahead buffers, the background fill
//! thread that keeps them topped up, and the preloader that primes the next
//! producer off the tick thread. No tick loop, no session/block state, no
//! sink — see `playout-engine` for those.

pub mod decode;
pub mod error;
mod helpers; // internal — not pub, not re-exported
pub mod lookahead;
pub mod seam_preparer;
pub mod tick_producer;

pub use decode::{DecodedVideoFrame, SegmentDecoder};
pub use error::MediaError;
pub use lookahead::{AudioLookaheadBuffer, VideoLookaheadBuffer};
pub use seam_preparer::SeamPreparer;
pub use tick_producer::{TickProducer, TickVideoFrame};
