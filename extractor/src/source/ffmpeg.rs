use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use keyframe_common::config::SourceConfig;
use keyframe_common::frame::{Frame, CHANNELS};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{SourceError, VideoSource};

/// ffmpeg yields no frame when asked for a position at (or past) the very
/// end of the stream, so seeks are held back by this much.
const END_GUARD_SECS: f64 = 0.05;

/// Video file decoded one frame per seek by an `ffmpeg` subprocess.
///
/// Each seek spawns `ffmpeg -ss <t> -i <file> -frames:v 1` writing raw RGBA
/// to stdout. The child is killed if the seek future is dropped, so aborting
/// a run never leaves a decoder behind.
pub struct FfmpegSource {
    path: PathBuf,
    duration: f64,
    width: u32,
    height: u32,
    /// `Some` when frames are downscaled from the native size.
    scale: Option<(u32, u32)>,
    seek_timeout: Option<Duration>,
    current: Option<Frame>,
    label: String,
}

impl FfmpegSource {
    /// Probe `path` with ffprobe and prepare to decode it. With
    /// `analysis_width`, every captured frame is downscaled to that width
    /// (aspect kept), so both comparison and any encoded output use the
    /// smaller size. Widths at or above the native width are ignored.
    pub async fn open(
        path: impl Into<PathBuf>,
        analysis_width: Option<u32>,
    ) -> Result<Self, SourceError> {
        let path = path.into();
        let probe = probe(&path).await?;

        let scale = analysis_width
            .filter(|&w| w > 0 && w < probe.width)
            .map(|w| {
                let h = (probe.height as f64 * w as f64 / probe.width as f64).round() as u32;
                (w, h.max(1))
            });
        let (width, height) = scale.unwrap_or((probe.width, probe.height));

        info!(
            path = path.display().to_string(),
            duration = probe.duration,
            native_width = probe.width,
            native_height = probe.height,
            rotation = probe.rotation,
            width,
            height,
            "opened video source"
        );

        Ok(Self {
            label: path.display().to_string(),
            path,
            duration: probe.duration,
            width,
            height,
            scale,
            seek_timeout: None,
            current: None,
        })
    }

    pub async fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        let timeout = seek_timeout(config)?;
        let source = Self::open(&config.path, config.analysis_width).await?;
        Ok(match timeout {
            Some(limit) => source.with_seek_timeout(limit),
            None => source,
        })
    }

    /// Fail a seek with [`SourceError::Timeout`] if decoding takes longer.
    pub fn with_seek_timeout(mut self, timeout: Duration) -> Self {
        self.seek_timeout = Some(timeout);
        self
    }

    /// Size of captured frames after any downscale.
    pub fn frame_dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    async fn decode_at(&self, time: f64) -> Result<Frame, SourceError> {
        let position = time.min(self.duration - END_GUARD_SECS).max(0.0);
        let position_str = format!("{position:.3}");

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-v", "error", "-ss", position_str.as_str(), "-i"])
            .arg(&self.path)
            .args(["-frames:v", "1"]);
        if let Some((w, h)) = self.scale {
            cmd.args(["-vf", format!("scale={w}:{h}").as_str()]);
        }
        cmd.args(["-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = cmd
            .output()
            .await
            .map_err(|e| SourceError::Spawn("ffmpeg", e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::Decode(stderr.trim().to_string()));
        }

        let expected = self.width as usize * self.height as usize * CHANNELS;
        if output.stdout.len() < expected {
            return Err(SourceError::Decode(format!(
                "ffmpeg produced {} bytes at {position_str}s, expected {expected}",
                output.stdout.len()
            )));
        }

        let mut data = output.stdout;
        data.truncate(expected);
        debug!(time, position, bytes = expected, "decoded frame");
        Ok(Frame::new(self.width, self.height, data)?)
    }
}

#[async_trait]
impl VideoSource for FfmpegSource {
    fn duration(&self) -> f64 {
        self.duration
    }

    async fn seek(&mut self, time: f64) -> Result<(), SourceError> {
        // Drop the previous capture first so a failed seek can't be mistaken
        // for success by a later `current_frame()`.
        self.current = None;
        let frame = match self.seek_timeout {
            Some(limit) => tokio::time::timeout(limit, self.decode_at(time))
                .await
                .map_err(|_| SourceError::Timeout(limit.as_secs_f64()))??,
            None => self.decode_at(time).await?,
        };
        self.current = Some(frame);
        Ok(())
    }

    fn current_frame(&self) -> Result<Frame, SourceError> {
        self.current.clone().ok_or(SourceError::NotReady)
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// Probed stream facts. `width` and `height` are the displayed size, i.e.
/// after the rotation ffmpeg applies when decoding.
struct Probe {
    duration: f64,
    width: u32,
    height: u32,
    rotation: i32,
}

async fn probe(path: &Path) -> Result<Probe, SourceError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height:stream_tags=rotate:stream_side_data=rotation:format=duration",
            "-of",
            "default=noprint_wrappers=1",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| SourceError::Spawn("ffprobe", e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SourceError::Probe(stderr.trim().to_string()));
    }

    parse_probe(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `key=value` lines printed by ffprobe's default writer.
fn parse_probe(text: &str) -> Result<Probe, SourceError> {
    let mut duration = None;
    let mut width = None;
    let mut height = None;
    let mut rotation = 0i32;

    for line in text.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        match key {
            "duration" => duration = value.parse::<f64>().ok(),
            "width" => width = value.parse::<u32>().ok(),
            "height" => height = value.parse::<u32>().ok(),
            // Side data on newer builds, a stream tag on older ones.
            "rotation" | "TAG:rotate" => {
                if let Ok(deg) = value.trim().parse::<f64>() {
                    rotation = deg.round() as i32;
                }
            }
            _ => {}
        }
    }

    let duration = duration
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| SourceError::Probe("missing or invalid duration".into()))?;
    match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => {
            // ffmpeg autorotates on decode, so a quarter turn swaps the axes.
            let (width, height) = if rotation.rem_euclid(180) == 90 {
                (h, w)
            } else {
                (w, h)
            };
            Ok(Probe {
                duration,
                width,
                height,
                rotation,
            })
        }
        _ => Err(SourceError::Probe("no video stream dimensions".into())),
    }
}

/// Per-seek deadline from `config`, rejecting values `Duration` cannot hold.
fn seek_timeout(config: &SourceConfig) -> Result<Option<Duration>, SourceError> {
    config
        .seek_timeout_secs
        .map(|secs| {
            Duration::try_from_secs_f64(secs).map_err(|_| SourceError::InvalidTimeout(secs))
        })
        .transpose()
}

/// Check whether ffmpeg and ffprobe are on PATH. Logs a warning if not found.
pub async fn check_ffmpeg_available() {
    for tool in ["ffmpeg", "ffprobe"] {
        match Command::new(tool).arg("-version").output().await {
            Ok(out) if out.status.success() => {
                debug!(tool, "available");
            }
            Ok(_) => {
                warn!(tool, "returned non-zero for -version; decoding may fail");
            }
            Err(e) => {
                warn!(
                    tool,
                    error = %e,
                    "not found on PATH; video sources cannot be opened"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe_output() {
        let probe = parse_probe("width=1280\nheight=720\nduration=93.480000\n").unwrap();
        assert_eq!(probe.width, 1280);
        assert_eq!(probe.height, 720);
        assert!((probe.duration - 93.48).abs() < 1e-9);
    }

    #[test]
    fn probe_without_duration_fails() {
        assert!(matches!(
            parse_probe("width=640\nheight=480\nduration=N/A\n"),
            Err(SourceError::Probe(_))
        ));
    }

    #[test]
    fn probe_without_video_stream_fails() {
        assert!(matches!(
            parse_probe("duration=12.0\n"),
            Err(SourceError::Probe(_))
        ));
    }

    #[test]
    fn probe_ignores_noise_lines() {
        let probe =
            parse_probe("[STREAM]\nwidth=2\nheight=2\n[/STREAM]\nduration=0.5\n").unwrap();
        assert_eq!((probe.width, probe.height), (2, 2));
    }

    #[test]
    fn quarter_turn_swaps_dimensions() {
        let side_data =
            parse_probe("width=1920\nheight=1080\nrotation=-90\nduration=4.0\n").unwrap();
        assert_eq!((side_data.width, side_data.height), (1080, 1920));
        assert_eq!(side_data.rotation, -90);

        let tag = parse_probe("width=1920\nheight=1080\nTAG:rotate=270\nduration=4.0\n").unwrap();
        assert_eq!((tag.width, tag.height), (1080, 1920));
    }

    #[test]
    fn half_turn_keeps_dimensions() {
        let probe = parse_probe("width=640\nheight=480\nrotation=180\nduration=1.0\n").unwrap();
        assert_eq!((probe.width, probe.height), (640, 480));

        let unrotated = parse_probe("width=640\nheight=480\nduration=1.0\n").unwrap();
        assert_eq!(unrotated.rotation, 0);
    }

    fn source_config(seek_timeout_secs: Option<f64>) -> SourceConfig {
        SourceConfig {
            path: PathBuf::from("clip.mp4"),
            analysis_width: None,
            seek_timeout_secs,
        }
    }

    #[test]
    fn seek_timeout_conversion() {
        assert_eq!(seek_timeout(&source_config(None)).unwrap(), None);
        assert_eq!(
            seek_timeout(&source_config(Some(2.5))).unwrap(),
            Some(Duration::from_millis(2500))
        );
        assert!(matches!(
            seek_timeout(&source_config(Some(1e20))),
            Err(SourceError::InvalidTimeout(_))
        ));
    }

    #[tokio::test]
    async fn oversized_timeout_fails_before_probing() {
        let err = FfmpegSource::from_config(&source_config(Some(1e20)))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::InvalidTimeout(_)));
    }
}
