// crates/playout-media/src/error.rs

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum MediaError {
    #[error("asset missing: {asset_uri}")]
    AssetMissing { asset_uri: String },

    #[error("asset error opening {asset_uri}: {message}")]
    AssetError { asset_uri: String, message: String },

    #[error("decode error on {asset_uri}: {message}")]
    DecodeError { asset_uri: String, message: String },

    #[error("asset_start_offset_ms {offset_ms} exceeds asset duration {asset_duration_ms} for {asset_uri}")]
    OffsetExceedsAsset {
        asset_uri: String,
        offset_ms: i64,
        asset_duration_ms: i64,
    },
}

impl From<MediaError> for playout_core::BlockPlanError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::AssetMissing { asset_uri } => {
                playout_core::BlockPlanError::AssetMissing { asset_uri }
            }
            MediaError::AssetError { asset_uri, message } => {
                playout_core::BlockPlanError::AssetError { asset_uri, message }
            }
            MediaError::DecodeError { asset_uri, message } => {
                playout_core::BlockPlanError::DecodeError { asset_uri, message }
            }
            MediaError::OffsetExceedsAsset {
                asset_uri,
                offset_ms,
                asset_duration_ms,
            } => playout_core::BlockPlanError::OffsetExceedsAsset {
                asset_uri,
                offset_ms,
                asset_duration_ms,
            },
        }
    }
}
