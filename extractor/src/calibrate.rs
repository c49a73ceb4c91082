//! Content-adaptive threshold from a sparse scan of the source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use keyframe_common::config::CalibrationConfig;
use keyframe_common::Frame;
use tracing::{debug, info, warn};

use crate::error::KeyframeError;
use crate::metric::dissimilarity;
use crate::source::{seek_and_capture, VideoSource};

/// Number of calibration samples for a source of `duration` seconds:
/// `floor(duration / seconds_per_sample)`, clamped to the configured bounds.
pub fn sample_count(duration: f64, config: &CalibrationConfig) -> usize {
    let raw = (duration / config.seconds_per_sample).floor();
    let raw = if raw.is_finite() && raw > 0.0 {
        raw as usize
    } else {
        0
    };
    raw.clamp(config.min_samples, config.max_samples)
}

/// Seek positions used for calibration, strictly increasing. A source with
/// no positive, finite duration has no sample points.
pub fn sample_times(duration: f64, config: &CalibrationConfig) -> Vec<f64> {
    if !(duration.is_finite() && duration > 0.0) {
        return Vec::new();
    }
    let n = sample_count(duration, config);
    let step = duration / n as f64;
    (0..n).map(|i| i as f64 * step).collect()
}

/// Lower median of `scores`, clamped to the configured threshold range.
/// Falls back to the default threshold when there are no scores.
pub fn threshold_from_scores(mut scores: Vec<f64>, config: &CalibrationConfig) -> f64 {
    if scores.is_empty() {
        return config.default_threshold;
    }
    scores.sort_by(f64::total_cmp);
    scores[scores.len() / 2].clamp(config.min_threshold, config.max_threshold)
}

/// Derives a threshold from the typical change between evenly spaced samples.
pub struct Calibrator {
    config: CalibrationConfig,
    stop_flag: Option<Arc<AtomicBool>>,
}

impl Calibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            stop_flag: None,
        }
    }

    /// Abort with [`KeyframeError::Cancelled`] once `flag` is set. Checked
    /// before every seek.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop_flag = Some(flag);
        self
    }

    pub async fn run<S>(&self, source: &mut S) -> Result<f64, KeyframeError>
    where
        S: VideoSource + ?Sized,
    {
        self.config.validate()?;

        let duration = source.duration();
        let times = sample_times(duration, &self.config);
        let mut scores = Vec::with_capacity(times.len().saturating_sub(1));
        let mut previous: Option<Frame> = None;

        for &time in &times {
            if self.is_stopped() {
                info!(source = source.name(), time, "calibration cancelled");
                return Err(KeyframeError::Cancelled);
            }
            let frame = seek_and_capture(source, time).await?;
            if let Some(prev) = &previous {
                let score = dissimilarity(prev, &frame)?;
                debug!(time, score = format!("{:.4}", score), "calibration sample");
                scores.push(score);
            }
            previous = Some(frame);
        }

        if scores.is_empty() {
            warn!(
                source = source.name(),
                duration,
                default = self.config.default_threshold,
                "no calibration samples, using default threshold"
            );
            return Ok(self.config.default_threshold);
        }

        let compared = scores.len();
        let threshold = threshold_from_scores(scores, &self.config);
        info!(
            source = source.name(),
            duration,
            samples = times.len(),
            compared,
            threshold = format!("{:.4}", threshold),
            "calibrated threshold"
        );
        Ok(threshold)
    }

    fn is_stopped(&self) -> bool {
        self.stop_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::Relaxed))
    }
}

/// Calibrate with the given policy and no cancellation.
pub async fn calibrate_threshold<S>(
    source: &mut S,
    config: &CalibrationConfig,
) -> Result<f64, KeyframeError>
where
    S: VideoSource + ?Sized,
{
    Calibrator::new(config.clone()).run(source).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, SourceError};
    use async_trait::async_trait;

    fn gray(v: u8) -> Frame {
        Frame::filled(4, 4, [v, v, v, 255]).unwrap()
    }

    /// A source whose brightness ramps by `step` every `period` seconds.
    fn ramp(duration: f64, period: f64, step: u8) -> MemorySource {
        let mut source = MemorySource::new(duration);
        let mut t = 0.0;
        let mut v: u8 = 0;
        while t <= duration {
            source = source.with_frame(t, gray(v));
            v = v.wrapping_add(step);
            t += period;
        }
        source
    }

    #[test]
    fn sample_count_is_clamped() {
        let config = CalibrationConfig::default();
        assert_eq!(sample_count(5.0, &config), 20);
        assert_eq!(sample_count(250.0, &config), 25);
        assert_eq!(sample_count(600.0, &config), 50);
        assert_eq!(sample_count(10_000.0, &config), 50);
        assert_eq!(sample_count(f64::NAN, &config), 20);
    }

    #[test]
    fn sample_times_are_evenly_spaced() {
        let config = CalibrationConfig::default();
        let times = sample_times(600.0, &config);
        assert_eq!(times.len(), 50);
        assert_eq!(times[0], 0.0);
        assert!(times.windows(2).all(|w| w[1] > w[0]));
        assert!((times[1] - 12.0).abs() < 1e-9);
        assert!(times.iter().all(|&t| t < 600.0));
    }

    #[test]
    fn zero_duration_has_no_sample_points() {
        let config = CalibrationConfig::default();
        assert!(sample_times(0.0, &config).is_empty());
        assert!(sample_times(-3.0, &config).is_empty());
        assert!(sample_times(f64::INFINITY, &config).is_empty());
    }

    #[test]
    fn lower_median_without_averaging() {
        let config = CalibrationConfig::default();
        // Sorted: 12, 20, 40, 50 -> index 2 -> 40 (not the 30 an average would give).
        assert_eq!(threshold_from_scores(vec![50.0, 12.0, 40.0, 20.0], &config), 40.0);
        assert_eq!(threshold_from_scores(vec![15.0, 25.0, 35.0], &config), 25.0);
    }

    #[test]
    fn median_is_clamped() {
        let config = CalibrationConfig::default();
        assert_eq!(threshold_from_scores(vec![0.0, 0.0, 1.0], &config), 10.0);
        assert_eq!(threshold_from_scores(vec![90.0, 95.0, 99.0], &config), 60.0);
    }

    #[test]
    fn empty_scores_use_default() {
        let config = CalibrationConfig::default();
        assert_eq!(threshold_from_scores(Vec::new(), &config), 30.0);
    }

    #[tokio::test]
    async fn zero_duration_source_defaults_to_30() {
        let mut source = MemorySource::new(0.0).with_frame(0.0, gray(0));
        let threshold = calibrate_threshold(&mut source, &CalibrationConfig::default())
            .await
            .unwrap();
        assert_eq!(threshold, 30.0);
        assert!(source.seek_history().is_empty());
    }

    #[tokio::test]
    async fn long_source_uses_fifty_samples_deterministically() {
        let config = CalibrationConfig::default();

        let mut first = ramp(600.0, 12.0, 9);
        let a = calibrate_threshold(&mut first, &config).await.unwrap();
        assert_eq!(first.seek_history().len(), 50);
        assert!(first.seek_history().windows(2).all(|w| w[1] > w[0]));

        let mut second = ramp(600.0, 12.0, 9);
        let b = calibrate_threshold(&mut second, &config).await.unwrap();
        assert_eq!(a.to_bits(), b.to_bits());
        assert!((10.0..=60.0).contains(&a));
    }

    #[tokio::test]
    async fn threshold_tracks_typical_change() {
        // Every consecutive sample differs by luminance 20 (approximately,
        // since the BT.709 weights sum to 1 only up to rounding).
        let mut source = ramp(600.0, 12.0, 20);
        let threshold = calibrate_threshold(&mut source, &CalibrationConfig::default())
            .await
            .unwrap();
        assert!((threshold - 20.0).abs() < 1e-6, "got {threshold}");
    }

    #[tokio::test]
    async fn static_source_clamps_to_minimum() {
        let mut source = MemorySource::new(120.0).with_frame(0.0, gray(128));
        let threshold = calibrate_threshold(&mut source, &CalibrationConfig::default())
            .await
            .unwrap();
        assert_eq!(threshold, 10.0);
    }

    #[tokio::test]
    async fn threshold_always_within_bounds() {
        let config = CalibrationConfig::default();
        for (duration, step) in [(30.0, 1u8), (200.0, 255), (45.5, 60), (900.0, 3)] {
            let mut source = ramp(duration, 1.0, step);
            let t = calibrate_threshold(&mut source, &config).await.unwrap();
            assert!((10.0..=60.0).contains(&t), "duration={duration} step={step} t={t}");
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl VideoSource for BrokenSource {
        fn duration(&self) -> f64 {
            100.0
        }

        async fn seek(&mut self, _time: f64) -> Result<(), SourceError> {
            Err(SourceError::Decode("corrupt stream".into()))
        }

        fn current_frame(&self) -> Result<Frame, SourceError> {
            Err(SourceError::NotReady)
        }
    }

    #[tokio::test]
    async fn seek_failure_aborts_without_retry() {
        let err = calibrate_threshold(&mut BrokenSource, &CalibrationConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, KeyframeError::SourceSeek { time, .. } if time == 0.0));
    }

    #[tokio::test]
    async fn stop_flag_cancels_before_first_seek() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut source = ramp(100.0, 5.0, 10);
        let err = Calibrator::new(CalibrationConfig::default())
            .with_stop_flag(flag)
            .run(&mut source)
            .await
            .unwrap_err();
        assert!(matches!(err, KeyframeError::Cancelled));
        assert!(source.seek_history().is_empty());
    }
}
