use keyframe_common::Frame;

use crate::error::KeyframeError;

/// Push-driven scene-change filter interface.
///
/// Implementations receive decoded frames one at a time and decide whether
/// the frame represents a meaningful change from what they kept before.
pub trait FrameFilter: Send {
    /// Returns `Ok(true)` if this frame should be kept (scene changed).
    /// Returns `Ok(false)` to skip it (scene unchanged).
    fn should_store(&mut self, frame: &Frame) -> Result<bool, KeyframeError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
