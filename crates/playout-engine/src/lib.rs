// crates/playout-engine/src/lib.rs
//!
//! The tick loop and its surrounding plumbing: the session's block queue,
//! the polymorphic clock/wait-strategy/time-source boundaries, the
//! `FrameSource` view of a live or preloading producer, the output sink
//! trait, and passive metrics. `playout-core` supplies the pure domain
//! types and math; `playout-media` supplies decode and buffering; this
//! crate wires them into the continuously-running pipeline described in
//! SPEC_FULL.md §4 and §9.

pub mod clock;
pub mod frame_source;
pub mod metrics;
pub mod pipeline;
pub mod session;
pub mod sink;

pub use clock::{DeterministicTimeSource, DeterministicWaitStrategy, OutputClock, RealtimeWaitStrategy, SystemTimeSource, TimeSource, WaitStrategy};
pub use frame_source::{FrameOut, FrameSource, PadSource, TickProducerSource};
pub use metrics::PipelineMetrics;
pub use pipeline::PipelineManager;
pub use session::BlockPlanSessionContext;
pub use sink::{AudioFrame, OutputSink, RecordingSink, SinkStatus, VideoFrame};
