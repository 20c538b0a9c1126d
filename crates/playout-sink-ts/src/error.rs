// crates/playout-sink-ts/src/error.rs
//
// Mirrors playout_media::MediaError's shape: a thiserror enum scoped to one
// crate's boundary, cloneable so it can be stashed and read back from the
// mux thread without re-locking the original ffmpeg error.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum SinkError {
    #[error("open output '{path}': {detail}")]
    OpenFailed { path: String, detail: String },

    #[error("{codec} encoder unavailable")]
    EncoderUnavailable { codec: &'static str },

    #[error("encoder init failed: {0}")]
    EncoderInit(String),

    #[error("write header failed: {0}")]
    HeaderWriteFailed(String),

    #[error("write packet failed: {0}")]
    PacketWriteFailed(String),

    #[error("mux thread terminated unexpectedly")]
    MuxThreadGone,
}
