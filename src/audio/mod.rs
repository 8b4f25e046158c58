pub mod extract;
pub mod segment;
pub mod silence;

pub use extract::{extract_audio, extract_audio_segment};
pub use segment::{
    cut_segments, partition, segment_audio, SegmentConfig, SegmentFile, SegmentPlan,
    SegmentRequest,
};
pub use silence::{detect_silences, detect_silences_in_samples, SilenceConfig};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metadata about a decoded audio file.
#[derive(Debug, Clone)]
pub struct AudioMetadata {
    pub duration: Duration,
    pub sample_rate: u32,
    pub channels: u16,
}

/// An interval where the signal stayed below the silence threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SilenceRange {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl SilenceRange {
    pub fn new(start_ms: u64, end_ms: u64) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn midpoint_ms(&self) -> f64 {
        (self.start_ms as f64 + self.end_ms as f64) / 2.0
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// One output cut of a segmented timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start_ms: u64,
    pub end_ms: u64,
    pub duration_ms: u64,
}

impl Segment {
    pub fn new(start_ms: u64, end_ms: u64) -> Self {
        Self {
            start_ms,
            end_ms,
            duration_ms: end_ms.saturating_sub(start_ms),
        }
    }

    pub fn start(&self) -> Duration {
        Duration::from_millis(self.start_ms)
    }

    pub fn end(&self) -> Duration {
        Duration::from_millis(self.end_ms)
    }
}
