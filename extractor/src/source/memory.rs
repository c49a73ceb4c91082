use async_trait::async_trait;
use keyframe_common::Frame;

use super::{SourceError, VideoSource};

/// Video held entirely in memory as a list of content changes.
///
/// Each `(start, frame)` entry is shown from `start` until the next entry.
/// Useful for pre-decoded clips and for driving the extractor in tests.
pub struct MemorySource {
    duration: f64,
    timeline: Vec<(f64, Frame)>,
    current: Option<Frame>,
    seeks: Vec<f64>,
}

impl MemorySource {
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            timeline: Vec::new(),
            current: None,
            seeks: Vec::new(),
        }
    }

    /// Show `frame` from `start` onward (until a later entry takes over).
    pub fn with_frame(mut self, start: f64, frame: Frame) -> Self {
        let pos = self.timeline.partition_point(|(t, _)| *t <= start);
        self.timeline.insert(pos, (start, frame));
        self
    }

    /// Times of every seek issued so far, in call order.
    pub fn seek_history(&self) -> &[f64] {
        &self.seeks
    }

    fn frame_at(&self, time: f64) -> Option<&Frame> {
        let pos = self.timeline.partition_point(|(t, _)| *t <= time);
        pos.checked_sub(1).map(|i| &self.timeline[i].1)
    }
}

#[async_trait]
impl VideoSource for MemorySource {
    fn duration(&self) -> f64 {
        self.duration
    }

    async fn seek(&mut self, time: f64) -> Result<(), SourceError> {
        self.seeks.push(time);
        let frame = self
            .frame_at(time)
            .cloned()
            .ok_or_else(|| SourceError::Decode(format!("no content at {time:.3}s")))?;
        self.current = Some(frame);
        Ok(())
    }

    fn current_frame(&self) -> Result<Frame, SourceError> {
        self.current.clone().ok_or(SourceError::NotReady)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(v: u8) -> Frame {
        Frame::filled(2, 2, [v, v, v, 255]).unwrap()
    }

    #[tokio::test]
    async fn picks_latest_entry_at_or_before_time() {
        let mut source = MemorySource::new(30.0)
            .with_frame(10.0, gray(2))
            .with_frame(0.0, gray(1))
            .with_frame(20.0, gray(3));

        for (t, expected) in [(0.0, 1), (9.99, 1), (10.0, 2), (25.0, 3), (30.0, 3)] {
            source.seek(t).await.unwrap();
            assert_eq!(source.current_frame().unwrap(), gray(expected), "t={t}");
        }
        assert_eq!(source.seek_history().len(), 5);
    }

    #[tokio::test]
    async fn capture_before_seek_is_not_ready() {
        let source = MemorySource::new(1.0).with_frame(0.0, gray(0));
        assert!(matches!(source.current_frame(), Err(SourceError::NotReady)));
    }
}
