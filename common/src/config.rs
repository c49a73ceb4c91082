use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub path: PathBuf,
    /// Downscale captured frames to this width (aspect kept). This applies
    /// to comparison and to the saved keyframes alike. `None` keeps the
    /// native resolution.
    #[serde(default)]
    pub analysis_width: Option<u32>,
    /// Per-seek deadline. `None` waits for the source indefinitely.
    #[serde(default)]
    pub seek_timeout_secs: Option<f64>,
}

/// Policy for one seek-driven extraction pass.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    /// Temporal step between samples, in seconds.
    #[serde(default = "default_capture_interval")]
    pub capture_interval_secs: f64,
    /// Hard cap on accepted frames per run.
    #[serde(default = "default_max_output")]
    pub max_output: usize,
    /// The run stops once consecutive rejections exceed this count.
    #[serde(default = "default_stagnation_limit")]
    pub stagnation_limit: u32,
    /// Fixed acceptance threshold. When absent the caller calibrates one.
    #[serde(default)]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default = "default_seconds_per_sample")]
    pub seconds_per_sample: f64,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    #[serde(default = "default_min_threshold")]
    pub min_threshold: f64,
    #[serde(default = "default_max_threshold")]
    pub max_threshold: f64,
    /// Used when calibration collects no pairwise scores.
    #[serde(default = "default_threshold")]
    pub default_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_output_prefix")]
    pub prefix: String,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            capture_interval_secs: default_capture_interval(),
            max_output: default_max_output(),
            stagnation_limit: default_stagnation_limit(),
            threshold: None,
        }
    }
}

impl ExtractionConfig {
    /// Threshold to use for this run, falling back to the fixed default.
    pub fn threshold_or_default(&self) -> f64 {
        self.threshold.unwrap_or_else(default_threshold)
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            seconds_per_sample: default_seconds_per_sample(),
            min_samples: default_min_samples(),
            max_samples: default_max_samples(),
            min_threshold: default_min_threshold(),
            max_threshold: default_max_threshold(),
            default_threshold: default_threshold(),
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            prefix: default_output_prefix(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.extraction.validate()?;
        self.calibration.validate()?;
        check_quality("live.jpeg_quality", self.live.jpeg_quality)?;
        check_quality("output.jpeg_quality", self.output.jpeg_quality)?;
        if let Some(t) = self.source.seek_timeout_secs {
            if !(t.is_finite() && t > 0.0) || Duration::try_from_secs_f64(t).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "source.seek_timeout_secs must be a positive, representable duration, got {t}"
                )));
            }
        }
        if self.source.analysis_width == Some(0) {
            return Err(ConfigError::Invalid(
                "source.analysis_width must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl ExtractionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let step = self.capture_interval_secs;
        if !(step.is_finite() && step > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "extraction.capture_interval_secs must be positive, got {step}"
            )));
        }
        if let Some(t) = self.threshold {
            if !t.is_finite() || t < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "extraction.threshold must be a non-negative number, got {t}"
                )));
            }
        }
        Ok(())
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.seconds_per_sample.is_finite() && self.seconds_per_sample > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "calibration.seconds_per_sample must be positive, got {}",
                self.seconds_per_sample
            )));
        }
        if self.min_samples > self.max_samples {
            return Err(ConfigError::Invalid(format!(
                "calibration.min_samples ({}) exceeds max_samples ({})",
                self.min_samples, self.max_samples
            )));
        }
        if !(self.min_threshold <= self.max_threshold) {
            return Err(ConfigError::Invalid(format!(
                "calibration.min_threshold ({}) exceeds max_threshold ({})",
                self.min_threshold, self.max_threshold
            )));
        }
        Ok(())
    }
}

fn check_quality(field: &str, quality: u8) -> Result<(), ConfigError> {
    if (1..=100).contains(&quality) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{field} must be within 1..=100, got {quality}"
        )))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_capture_interval() -> f64 {
    3.0
}
fn default_max_output() -> usize {
    256
}
fn default_stagnation_limit() -> u32 {
    20
}
fn default_threshold() -> f64 {
    30.0
}
fn default_seconds_per_sample() -> f64 {
    10.0
}
fn default_min_samples() -> usize {
    20
}
fn default_max_samples() -> usize {
    50
}
fn default_min_threshold() -> f64 {
    10.0
}
fn default_max_threshold() -> f64 {
    60.0
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("keyframes")
}
fn default_output_prefix() -> String {
    "frame_".into()
}
fn default_log_level() -> String {
    "info".into()
}
