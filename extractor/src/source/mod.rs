pub mod ffmpeg;
pub mod memory;

use async_trait::async_trait;
use keyframe_common::frame::{Frame, FrameError};

use crate::error::KeyframeError;

pub use ffmpeg::{check_ffmpeg_available, FfmpegSource};
pub use memory::MemorySource;

/// A video that can be positioned at an arbitrary time and captured.
///
/// After `seek(t)` resolves successfully, `current_frame()` must reflect the
/// content at (or near) `t`. A session holds the source exclusively, so at
/// most one seek is ever in flight.
#[async_trait]
pub trait VideoSource: Send {
    /// Total length in seconds.
    fn duration(&self) -> f64;

    /// Resolve once the frame at `time` is ready for capture.
    async fn seek(&mut self, time: f64) -> Result<(), SourceError>;

    /// Capture the frame produced by the last successful seek.
    fn current_frame(&self) -> Result<Frame, SourceError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[async_trait]
impl<'a, S> VideoSource for &'a mut S
where
    S: VideoSource + ?Sized,
{
    fn duration(&self) -> f64 {
        (**self).duration()
    }

    async fn seek(&mut self, time: f64) -> Result<(), SourceError> {
        (**self).seek(time).await
    }

    fn current_frame(&self) -> Result<Frame, SourceError> {
        (**self).current_frame()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// The single suspension point of every run: seek, wait, capture.
pub async fn seek_and_capture<S>(source: &mut S, time: f64) -> Result<Frame, KeyframeError>
where
    S: VideoSource + ?Sized,
{
    source
        .seek(time)
        .await
        .map_err(|source| KeyframeError::SourceSeek { time, source })?;
    source
        .current_frame()
        .map_err(|source| KeyframeError::SourceSeek { time, source })
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to spawn {0}: {1}")]
    Spawn(&'static str, String),
    #[error("failed to probe source: {0}")]
    Probe(String),
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error("seek timeout of {0}s is out of range")]
    InvalidTimeout(f64),
    #[error("seek did not complete within {0:.1}s")]
    Timeout(f64),
    #[error("no frame captured yet")]
    NotReady,
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seek_and_capture_returns_frame() {
        let red = Frame::filled(2, 2, [255, 0, 0, 255]).unwrap();
        let mut source = MemorySource::new(10.0).with_frame(0.0, red.clone());
        let frame = seek_and_capture(&mut source, 4.0).await.unwrap();
        assert_eq!(frame, red);
    }

    #[tokio::test]
    async fn seek_failure_carries_time() {
        // No content before t=5.
        let mut source =
            MemorySource::new(10.0).with_frame(5.0, Frame::filled(2, 2, [0; 4]).unwrap());
        match seek_and_capture(&mut source, 1.0).await {
            Err(KeyframeError::SourceSeek { time, .. }) => assert_eq!(time, 1.0),
            other => panic!("expected seek error, got {other:?}"),
        }
    }

    async fn seek_once<S: VideoSource>(mut source: S) -> f64 {
        source.seek(1.0).await.unwrap();
        assert!(source.current_frame().is_ok());
        source.duration()
    }

    #[tokio::test]
    async fn mutable_reference_is_a_source() {
        let mut source =
            MemorySource::new(3.0).with_frame(0.0, Frame::filled(1, 1, [9, 9, 9, 255]).unwrap());
        assert_eq!(seek_once(&mut source).await, 3.0);
        assert_eq!(source.seek_history(), &[1.0]);
    }
}
