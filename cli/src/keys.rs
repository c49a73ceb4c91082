use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%S%3fZ").to_string()
}

fn date_str(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d").to_string()
}

/// Directory for one extraction run.
/// e.g. "keyframes/2026-02-18/20260218T093000000Z"
pub fn run_dir(root: &Path, started: DateTime<Utc>) -> PathBuf {
    root.join(date_str(started)).join(fmt_ts(started))
}

/// File name for an accepted frame.
/// e.g. "frame_0003_12.000s.jpg"
pub fn frame_file_name(prefix: &str, index: usize, time_secs: f64) -> String {
    format!("{prefix}{index:04}_{time_secs:.3}s.jpg")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_run_dir_format() {
        let started = Utc.with_ymd_and_hms(2026, 2, 18, 9, 30, 0).unwrap();
        let dir = run_dir(Path::new("keyframes"), started);
        assert_eq!(
            dir,
            PathBuf::from("keyframes/2026-02-18/20260218T093000000Z")
        );
    }

    #[test]
    fn test_frame_file_name() {
        assert_eq!(frame_file_name("frame_", 3, 12.0), "frame_0003_12.000s.jpg");
        assert_eq!(frame_file_name("", 12345, 0.5), "12345_0.500s.jpg");
    }

    #[test]
    fn test_names_sort_by_index() {
        let mut names: Vec<String> = [10, 2, 7]
            .into_iter()
            .map(|i| frame_file_name("f", i, i as f64 * 3.0))
            .collect();
        names.sort();
        assert_eq!(names[0], "f0002_6.000s.jpg");
        assert_eq!(names[2], "f0010_30.000s.jpg");
    }
}
