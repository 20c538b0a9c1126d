// crates/playout-sink-ts/src/lib.rs
//!
//! A concrete `playout_engine::OutputSink`: continuous H.264/AAC MPEG-TS,
//! muxed on a dedicated thread so the tick thread's `consume_video`/
//! `consume_audio` calls never do encoder or file I/O themselves.

mod encoder;
pub mod error;
mod sink;

pub use error::SinkError;
pub use sink::MpegTsSink;
