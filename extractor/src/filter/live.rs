use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{pin_mut, Stream, StreamExt};
use keyframe_common::config::LiveConfig;
use keyframe_common::encode::encode_jpeg;
use keyframe_common::Frame;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::traits::FrameFilter;
use crate::error::KeyframeError;
use crate::metric::dissimilarity;

/// Notification for one accepted live frame.
#[derive(Debug, Clone)]
pub struct LiveCapture {
    /// The accepted frame, JPEG-encoded at the filter's quality.
    pub jpeg: Bytes,
    /// Frames pushed so far, this one included.
    pub total: u64,
    /// Frames accepted so far, this one included.
    pub accepted: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveStats {
    pub total: u64,
    pub accepted: u64,
}

/// Scene-change filter for a live, non-seekable feed.
///
/// Unlike the seek-driven extractor, every push is compared against the
/// last *accepted* frame, so slow drift eventually crosses the threshold.
/// The first frame is accepted unconditionally.
pub struct LiveCaptureFilter {
    threshold: f64,
    jpeg_quality: u8,
    last_accepted: Option<Frame>,
    total: u64,
    accepted: u64,
}

impl LiveCaptureFilter {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            jpeg_quality: 80,
            last_accepted: None,
            total: 0,
            accepted: 0,
        }
    }

    pub fn from_config(config: &LiveConfig) -> Self {
        Self::new(config.threshold).with_jpeg_quality(config.jpeg_quality)
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Decide whether `frame` is kept, updating the counters and the
    /// reference frame. A frame whose size differs from the reference is
    /// counted in `total` and rejected with `DimensionMismatch`.
    pub fn filter_frame(&mut self, frame: &Frame) -> Result<bool, KeyframeError> {
        self.total += 1;
        let accepted = match &self.last_accepted {
            None => {
                debug!(total = self.total, "first live frame, accepting unconditionally");
                true
            }
            Some(reference) => {
                let score = dissimilarity(reference, frame)?;
                let accepted = score > self.threshold;
                debug!(
                    score = format!("{:.4}", score),
                    threshold = format!("{:.4}", self.threshold),
                    accepted,
                    "live comparison"
                );
                accepted
            }
        };
        if accepted {
            self.last_accepted = Some(frame.clone());
            self.accepted += 1;
        }
        Ok(accepted)
    }

    /// Filter `frame` and, if it is kept, encode it for the caller.
    pub fn push(&mut self, frame: &Frame) -> Result<Option<LiveCapture>, KeyframeError> {
        if !self.filter_frame(frame)? {
            return Ok(None);
        }
        let jpeg = encode_jpeg(frame, self.jpeg_quality)?;
        Ok(Some(LiveCapture {
            jpeg,
            total: self.total,
            accepted: self.accepted,
        }))
    }

    pub fn stats(&self) -> LiveStats {
        LiveStats {
            total: self.total,
            accepted: self.accepted,
        }
    }

    /// Forget the reference frame and zero the counters.
    pub fn reset(&mut self) {
        self.last_accepted = None;
        self.total = 0;
        self.accepted = 0;
    }
}

impl FrameFilter for LiveCaptureFilter {
    fn should_store(&mut self, frame: &Frame) -> Result<bool, KeyframeError> {
        self.filter_frame(frame)
    }

    fn name(&self) -> &str {
        "live"
    }
}

/// Feed `frames` through `filter`, sending every acceptance on `tx`.
///
/// Runs until the stream ends, the receiver is dropped, or `stop_flag` is
/// raised. Frames with the wrong size are logged and skipped; any other
/// failure ends the loop.
pub async fn run_live_filter<St>(
    frames: St,
    filter: &mut LiveCaptureFilter,
    tx: mpsc::Sender<LiveCapture>,
    stop_flag: Option<Arc<AtomicBool>>,
) -> Result<LiveStats, KeyframeError>
where
    St: Stream<Item = Frame>,
{
    pin_mut!(frames);
    info!(
        filter = filter.name(),
        threshold = format!("{:.4}", filter.threshold()),
        "live filter started"
    );

    while let Some(frame) = frames.next().await {
        if stop_flag.as_ref().is_some_and(|f| f.load(Ordering::Relaxed)) {
            info!("live filter stopped");
            break;
        }
        match filter.push(&frame) {
            Ok(Some(capture)) => {
                if tx.send(capture).await.is_err() {
                    info!("live capture receiver dropped, stopping");
                    break;
                }
            }
            Ok(None) => {}
            Err(KeyframeError::DimensionMismatch { left, right }) => {
                warn!(?left, ?right, "live frame size changed, skipping");
            }
            Err(e) => return Err(e),
        }
    }

    let stats = filter.stats();
    info!(total = stats.total, accepted = stats.accepted, "live filter finished");
    Ok(stats)
}
