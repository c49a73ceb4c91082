mod keys;
mod manifest;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures_util::{pin_mut, Stream, StreamExt};
use keyframe_common::config::{Config, OutputConfig};
use keyframe_common::encode::{encode_jpeg, EncodeError};
use keyframe_extractor::source::check_ffmpeg_available;
use keyframe_extractor::{
    Calibrator, ExtractionEvent, ExtractionSession, FfmpegSource, KeyframeError, SourceError,
    VideoSource,
};
use manifest::Manifest;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to open source: {0}")]
    Source(#[from] SourceError),
    #[error(transparent)]
    Keyframe(#[from] KeyframeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("failed to write {0}: {1}")]
    Write(String, std::io::Error),
    #[error("failed to serialize manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        source = config.source.path.display().to_string(),
        interval_secs = config.extraction.capture_interval_secs,
        max_output = config.extraction.max_output,
        threshold = ?config.extraction.threshold,
        output = config.output.dir.display().to_string(),
        "starting keyframe extraction"
    );

    // Decoding fails without ffmpeg; warn early instead of on the first seek.
    check_ffmpeg_available().await;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current sample");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    if let Err(e) = run(&config, stop).await {
        error!(error = %e, "extraction failed");
        std::process::exit(1);
    }
}

async fn run(config: &Config, stop: Arc<AtomicBool>) -> Result<(), RunError> {
    let mut source = FfmpegSource::from_config(&config.source).await?;
    let source_name = source.name().to_string();

    let (threshold, calibrated) = match config.extraction.threshold {
        Some(t) => (t, false),
        None => {
            let t = Calibrator::new(config.calibration.clone())
                .with_stop_flag(Arc::clone(&stop))
                .run(&mut source)
                .await?;
            (t, true)
        }
    };

    let started = Utc::now();
    let out_dir = keys::run_dir(&config.output.dir, started);
    tokio::fs::create_dir_all(&out_dir)
        .await
        .map_err(|e| RunError::Write(out_dir.display().to_string(), e))?;

    let mut manifest = Manifest::new(
        &source_name,
        started,
        threshold,
        calibrated,
        &config.extraction,
    );

    let events = ExtractionSession::new(&mut source, &config.extraction)?
        .with_threshold(threshold)
        .with_stop_flag(stop)
        .into_stream();
    let outcome = write_frames(events, &out_dir, &config.output, &mut manifest).await;

    // The manifest is written for partial runs too, so kept frames stay indexed.
    if let Err(e) = &outcome {
        manifest.error = Some(e.to_string());
    }
    let manifest_path = manifest.write(&out_dir).await?;
    info!(
        dir = out_dir.display().to_string(),
        manifest = manifest_path.display().to_string(),
        frames = manifest.frames.len(),
        threshold = format!("{:.4}", threshold),
        "wrote run output"
    );
    outcome
}

async fn write_frames<St>(
    events: St,
    dir: &Path,
    output: &OutputConfig,
    manifest: &mut Manifest,
) -> Result<(), RunError>
where
    St: Stream<Item = Result<ExtractionEvent, KeyframeError>>,
{
    pin_mut!(events);
    while let Some(event) = events.next().await {
        match event? {
            ExtractionEvent::Progress(percent) => {
                debug!(percent, "extraction progress");
            }
            ExtractionEvent::Frame(accepted) => {
                let jpeg = encode_jpeg(&accepted.frame, output.jpeg_quality)?;
                let name =
                    keys::frame_file_name(&output.prefix, accepted.index, accepted.time_secs);
                let path = dir.join(&name);
                tokio::fs::write(&path, &jpeg)
                    .await
                    .map_err(|e| RunError::Write(path.display().to_string(), e))?;
                info!(
                    index = accepted.index,
                    time = accepted.time_secs,
                    file = %name,
                    bytes = jpeg.len(),
                    "keyframe saved"
                );
                manifest.push(accepted.index, accepted.time_secs, name);
            }
            ExtractionEvent::Complete { accepted } => {
                manifest.complete(accepted);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyframe_common::config::ExtractionConfig;
    use keyframe_common::Frame;
    use keyframe_extractor::{frame_stream, MemorySource};

    fn gray(v: u8) -> Frame {
        Frame::filled(8, 8, [v, v, v, 255]).unwrap()
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("keyframes-{tag}-{}", std::process::id()))
    }

    #[tokio::test]
    async fn writes_every_accepted_frame() {
        let dir = scratch_dir("write");
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let source = MemorySource::new(9.0)
            .with_frame(0.0, gray(0))
            .with_frame(3.0, gray(255))
            .with_frame(6.0, gray(0));
        let extraction = ExtractionConfig {
            threshold: Some(30.0),
            ..ExtractionConfig::default()
        };
        let mut manifest = Manifest::new("memory", Utc::now(), 30.0, false, &extraction);

        let events = frame_stream(source, &extraction).unwrap();
        write_frames(events, &dir, &OutputConfig::default(), &mut manifest)
            .await
            .unwrap();

        assert_eq!(manifest.accepted, Some(3));
        assert_eq!(manifest.frames.len(), 3);
        for entry in &manifest.frames {
            let bytes = tokio::fs::read(dir.join(&entry.file)).await.unwrap();
            assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        }

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn seek_failure_leaves_run_incomplete() {
        let dir = scratch_dir("partial");
        tokio::fs::create_dir_all(&dir).await.unwrap();

        // Nothing to show before t=1, so the very first seek fails.
        let source = MemorySource::new(6.0).with_frame(1.0, gray(0));
        let extraction = ExtractionConfig {
            threshold: Some(30.0),
            ..ExtractionConfig::default()
        };
        let mut manifest = Manifest::new("memory", Utc::now(), 30.0, false, &extraction);
        let events = frame_stream(source, &extraction).unwrap();
        let err = write_frames(events, &dir, &OutputConfig::default(), &mut manifest)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RunError::Keyframe(KeyframeError::SourceSeek { .. })
        ));
        assert!(manifest.frames.is_empty());
        assert!(manifest.accepted.is_none());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
