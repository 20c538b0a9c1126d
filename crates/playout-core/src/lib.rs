//! Domain types and pure math for the continuous-output playout engine:
//! rational frame timing, the block/segment data model and its validation,
//! loudness gain, fade postprocessing, the pad source, and seam
//! fingerprinting. No threading, no decode, no I/O — see `playout-media`
//! and `playout-engine` for those.

pub mod block;
pub mod error;
pub mod fade;
pub mod fingerprint;
pub mod helpers;
pub mod loudness;
pub mod pad;
pub mod rational;

pub use block::{FedBlock, Segment, SegmentId, SegmentType, TransitionType};
pub use error::BlockPlanError;
pub use rational::RationalFps;
