use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::Stream;
use keyframe_common::config::ExtractionConfig;
use keyframe_common::Frame;
use tracing::{debug, info};

use crate::error::KeyframeError;
use crate::metric::dissimilarity;
use crate::source::{seek_and_capture, VideoSource};

/// A sampled frame judged distinct enough to keep.
#[derive(Debug, Clone)]
pub struct AcceptedFrame {
    /// 0-based position among this run's accepted frames.
    pub index: usize,
    /// Sample time the frame was captured at, in seconds.
    pub time_secs: f64,
    pub frame: Frame,
}

/// One item of an extraction run, in emission order.
#[derive(Debug, Clone)]
pub enum ExtractionEvent {
    /// Percentage of the source scanned so far, `0..=100`, non-decreasing.
    Progress(u8),
    Frame(AcceptedFrame),
    /// Terminal event; nothing follows it.
    Complete { accepted: usize },
}

/// Callbacks for [`extract_frames`], invoked synchronously from the
/// driving loop in the same order as [`ExtractionEvent`]s.
pub trait ExtractionObserver {
    fn on_progress(&mut self, _percent: u8) {}

    fn on_frame_accepted(&mut self, event: AcceptedFrame);

    fn on_complete(&mut self, _accepted: usize) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Sampling,
    Finishing,
    Done,
}

/// State of one seek-driven pass over a source.
///
/// Samples are taken at `k * capture_interval` for `k = 0, 1, 2, ...` while
/// the time stays within the duration and fewer than `max_output` frames
/// have been accepted. The first sample is always accepted; later samples
/// are accepted when their dissimilarity to the *previous sample* (accepted
/// or not) is strictly greater than the threshold. The run also stops once
/// consecutive rejections exceed `stagnation_limit`.
///
/// The session owns its source for the whole run and is not restartable.
pub struct ExtractionSession<S> {
    source: S,
    config: ExtractionConfig,
    threshold: f64,
    duration: f64,
    sample_index: u64,
    accepted: usize,
    consecutive_rejections: u32,
    last_frame: Option<Frame>,
    last_progress: Option<u8>,
    pending: VecDeque<ExtractionEvent>,
    phase: Phase,
    stop_flag: Option<Arc<AtomicBool>>,
}

impl<S: VideoSource> ExtractionSession<S> {
    /// Validate `config` and read the source duration. The threshold is the
    /// configured one, or the fixed default when none is set.
    pub fn new(source: S, config: &ExtractionConfig) -> Result<Self, KeyframeError> {
        config.validate()?;
        let duration = source.duration();
        if !(duration.is_finite() && duration >= 0.0) {
            return Err(KeyframeError::InvalidDuration(duration));
        }
        Ok(Self {
            source,
            threshold: config.threshold_or_default(),
            config: config.clone(),
            duration,
            sample_index: 0,
            accepted: 0,
            consecutive_rejections: 0,
            last_frame: None,
            last_progress: None,
            pending: VecDeque::new(),
            phase: Phase::Sampling,
            stop_flag: None,
        })
    }

    /// Override the acceptance threshold, e.g. with a calibrated one.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Abort with [`KeyframeError::Cancelled`] once `flag` is set. Checked
    /// before every event and around every seek.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop_flag = Some(flag);
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted
    }

    /// Samples captured so far.
    pub fn samples_taken(&self) -> u64 {
        self.sample_index
    }

    /// Advance the run to its next event. Returns `Ok(None)` after the
    /// terminal `Complete` event or after any error.
    pub async fn next_event(&mut self) -> Result<Option<ExtractionEvent>, KeyframeError> {
        loop {
            // Terminal events are queued before `Done`; drain them first.
            if self.phase == Phase::Done && self.pending.is_empty() {
                return Ok(None);
            }
            if self.is_stopped() {
                info!(
                    source = self.source.name(),
                    accepted = self.accepted,
                    samples = self.sample_index,
                    "extraction cancelled"
                );
                self.abandon();
                return Err(KeyframeError::Cancelled);
            }
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            match self.phase {
                Phase::Sampling => {
                    if let Err(e) = self.step().await {
                        self.abandon();
                        return Err(e);
                    }
                }
                Phase::Finishing => self.finish(),
                Phase::Done => {}
            }
        }
    }

    /// Drive the run to completion, reporting to `observer`. Returns the
    /// number of accepted frames.
    pub async fn run<O>(mut self, observer: &mut O) -> Result<usize, KeyframeError>
    where
        O: ExtractionObserver + ?Sized,
    {
        let mut total = 0;
        while let Some(event) = self.next_event().await? {
            match event {
                ExtractionEvent::Progress(percent) => observer.on_progress(percent),
                ExtractionEvent::Frame(accepted) => observer.on_frame_accepted(accepted),
                ExtractionEvent::Complete { accepted } => {
                    total = accepted;
                    observer.on_complete(accepted);
                }
            }
        }
        Ok(total)
    }

    /// Turn the session into a lazy stream of events. The stream ends after
    /// `Complete` or after yielding the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<ExtractionEvent, KeyframeError>> {
        futures_util::stream::try_unfold(self, |mut session| async move {
            let event = session.next_event().await?;
            Ok::<_, KeyframeError>(event.map(|e| (e, session)))
        })
    }

    async fn step(&mut self) -> Result<(), KeyframeError> {
        let time = self.sample_index as f64 * self.config.capture_interval_secs;
        if !(time <= self.duration) || self.accepted >= self.config.max_output {
            self.phase = Phase::Finishing;
            return Ok(());
        }

        let frame = seek_and_capture(&mut self.source, time).await?;
        if self.is_stopped() {
            return Ok(());
        }

        let accepted = match &self.last_frame {
            None => {
                debug!(time, "first sample, accepting unconditionally");
                true
            }
            Some(prev) => {
                let score = dissimilarity(prev, &frame)?;
                let accepted = score > self.threshold;
                debug!(
                    time,
                    score = format!("{:.4}", score),
                    threshold = format!("{:.4}", self.threshold),
                    accepted,
                    "sample comparison"
                );
                accepted
            }
        };

        if accepted {
            let index = self.accepted;
            self.accepted += 1;
            self.consecutive_rejections = 0;
            self.pending.push_back(ExtractionEvent::Frame(AcceptedFrame {
                index,
                time_secs: time,
                frame: frame.clone(),
            }));
        } else {
            self.consecutive_rejections += 1;
        }
        self.last_frame = Some(frame);

        let percent = progress_percent(time, self.duration);
        self.last_progress = Some(percent);
        self.pending.push_back(ExtractionEvent::Progress(percent));
        self.sample_index += 1;

        if self.consecutive_rejections > self.config.stagnation_limit {
            info!(
                time,
                rejections = self.consecutive_rejections,
                accepted = self.accepted,
                "source stagnant, stopping early"
            );
            self.phase = Phase::Finishing;
        }
        Ok(())
    }

    fn finish(&mut self) {
        if self.last_progress != Some(100) {
            self.last_progress = Some(100);
            self.pending.push_back(ExtractionEvent::Progress(100));
        }
        self.pending.push_back(ExtractionEvent::Complete {
            accepted: self.accepted,
        });
        self.last_frame = None;
        self.phase = Phase::Done;
        info!(
            source = self.source.name(),
            accepted = self.accepted,
            samples = self.sample_index,
            threshold = format!("{:.4}", self.threshold),
            "extraction complete"
        );
    }

    /// Drop everything not yet handed out; no further events follow.
    fn abandon(&mut self) {
        self.pending.clear();
        self.last_frame = None;
        self.phase = Phase::Done;
    }

    fn is_stopped(&self) -> bool {
        self.stop_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::Relaxed))
    }
}

/// `round(time / duration * 100)`; a zero-length source is fully scanned by
/// its only sample.
fn progress_percent(time: f64, duration: f64) -> u8 {
    if duration <= 0.0 {
        return 100;
    }
    (time / duration * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Run a full extraction pass over `source`, reporting to `observer`.
/// Returns the number of accepted frames.
pub async fn extract_frames<S, O>(
    source: S,
    config: &ExtractionConfig,
    observer: &mut O,
) -> Result<usize, KeyframeError>
where
    S: VideoSource,
    O: ExtractionObserver + ?Sized,
{
    ExtractionSession::new(source, config)?.run(observer).await
}

/// Lazy, finite, non-restartable event stream over `source`.
pub fn frame_stream<S>(
    source: S,
    config: &ExtractionConfig,
) -> Result<impl Stream<Item = Result<ExtractionEvent, KeyframeError>>, KeyframeError>
where
    S: VideoSource,
{
    Ok(ExtractionSession::new(source, config)?.into_stream())
}
