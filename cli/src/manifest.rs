use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use keyframe_common::config::ExtractionConfig;
use serde::Serialize;

use crate::RunError;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Summary of one run, written next to the extracted frames.
#[derive(Debug, Serialize)]
pub struct Manifest {
    pub source: String,
    pub started_at: String,
    pub threshold: f64,
    pub calibrated: bool,
    pub capture_interval_secs: f64,
    pub max_output: usize,
    /// `Some` once the run reached its terminal event.
    pub accepted: Option<usize>,
    pub frames: Vec<ManifestEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ManifestEntry {
    pub index: usize,
    pub time_secs: f64,
    pub file: String,
}

impl Manifest {
    pub fn new(
        source: &str,
        started: DateTime<Utc>,
        threshold: f64,
        calibrated: bool,
        extraction: &ExtractionConfig,
    ) -> Self {
        Self {
            source: source.to_string(),
            started_at: started.to_rfc3339(),
            threshold,
            calibrated,
            capture_interval_secs: extraction.capture_interval_secs,
            max_output: extraction.max_output,
            accepted: None,
            frames: Vec::new(),
            error: None,
        }
    }

    pub fn push(&mut self, index: usize, time_secs: f64, file: String) {
        self.frames.push(ManifestEntry {
            index,
            time_secs,
            file,
        });
    }

    pub fn complete(&mut self, accepted: usize) {
        self.accepted = Some(accepted);
    }

    pub async fn write(&self, dir: &Path) -> Result<PathBuf, RunError> {
        let path = dir.join(MANIFEST_FILE);
        let body = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| RunError::Write(path.display().to_string(), e))?;
        Ok(path)
    }
}
