use keyframe_common::config::ConfigError;
use keyframe_common::encode::EncodeError;

use crate::source::SourceError;

/// Failure of a calibration, extraction or live-filter call.
///
/// Variants are kept distinct so callers can tell a misbehaving source
/// (`SourceSeek`) from malformed input (`DimensionMismatch`, `Config`).
#[derive(Debug, thiserror::Error)]
pub enum KeyframeError {
    #[error("frames differ in size: {left:?} vs {right:?}")]
    DimensionMismatch { left: (u32, u32), right: (u32, u32) },
    #[error("seek to {time:.3}s failed: {source}")]
    SourceSeek {
        time: f64,
        #[source]
        source: SourceError,
    },
    #[error("source reported an unusable duration: {0}")]
    InvalidDuration(f64),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("run cancelled")]
    Cancelled,
}
