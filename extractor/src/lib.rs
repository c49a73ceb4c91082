//! Keyframe selection over seekable video and live frame feeds.
//!
//! The seek-driven path is [`calibrate_threshold`] followed by
//! [`extract_frames`] (callbacks) or [`frame_stream`] (lazy events). The
//! push-driven path is [`LiveCaptureFilter`].

pub mod calibrate;
pub mod error;
pub mod filter;
pub mod metric;
pub mod session;
pub mod source;

pub use calibrate::{calibrate_threshold, Calibrator};
pub use error::KeyframeError;
pub use filter::{run_live_filter, FrameFilter, LiveCapture, LiveCaptureFilter, LiveStats};
pub use metric::dissimilarity;
pub use session::{
    extract_frames, frame_stream, AcceptedFrame, ExtractionEvent, ExtractionObserver,
    ExtractionSession,
};
pub use source::{FfmpegSource, MemorySource, SourceError, VideoSource};
