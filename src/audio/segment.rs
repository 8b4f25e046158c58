//! Silence-aware partitioning of an audio timeline into N contiguous parts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{MontageError, Result};
use crate::fetch::{AssetFetcher, AssetKind};
use crate::render::FfmpegTools;

use super::extract::{extract_audio, extract_audio_segment};
use super::silence::{detect_silences, SilenceConfig};
use super::{Segment, SilenceRange};

/// How far a cut may move from the even-split point to reach a silence.
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    /// Fraction of the ideal segment length.
    pub tolerance_ratio: f64,
    /// Hard cap, whichever of the two is tighter wins.
    pub max_tolerance_ms: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            tolerance_ratio: 0.4,
            max_tolerance_ms: 2000,
        }
    }
}

impl SegmentConfig {
    fn tolerance_ms(&self, ideal_len_ms: f64) -> f64 {
        (ideal_len_ms * self.tolerance_ratio).min(self.max_tolerance_ms as f64)
    }
}

/// Split `[0, total_ms]` into `parts` contiguous segments, pulling each
/// internal cut to the midpoint of the nearest silence within tolerance.
///
/// Cuts are anchored on the even split `k * total / parts`. Among equally
/// close silences the one that starts first wins. The last segment always
/// ends at `total_ms`.
pub fn partition(
    total_ms: u64,
    parts: usize,
    silences: &[SilenceRange],
    config: &SegmentConfig,
) -> Vec<Segment> {
    if parts == 0 {
        return Vec::new();
    }

    let mut ordered = silences.to_vec();
    ordered.sort_by_key(|s| s.start_ms);

    let total = total_ms as f64;
    let ideal_len = total / parts as f64;
    let tolerance = config.tolerance_ms(ideal_len);

    let mut segments = Vec::with_capacity(parts);
    let mut current_start = 0u64;

    for k in 1..parts {
        let ideal_end = k as f64 * ideal_len;

        let mut best: Option<(f64, f64)> = None;
        for silence in &ordered {
            let mid = silence.midpoint_ms();
            let distance = (mid - ideal_end).abs();
            if distance > tolerance {
                continue;
            }
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, mid));
            }
        }

        let cut = match best {
            Some((_, mid)) => mid.round() as u64,
            None => ideal_end.round() as u64,
        };
        let cut = cut.clamp(current_start, total_ms);

        debug!(
            "Cut {}: ideal {:.0}ms, chosen {}ms ({})",
            k,
            ideal_end,
            cut,
            if best.is_some() { "silence" } else { "even" }
        );

        segments.push(Segment::new(current_start, cut));
        current_start = cut;
    }

    segments.push(Segment::new(current_start, total_ms));
    segments
}

/// Parameters of a `segment` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRequest {
    /// Local path or http(s) URL of the audio.
    pub source: String,
    pub parts: usize,
    pub min_silence_ms: u64,
    pub threshold_db: f64,
    /// When set, each segment is also written to its own file here.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl SegmentRequest {
    pub fn new(source: impl Into<String>, parts: usize, config: &Config) -> Self {
        Self {
            source: source.into(),
            parts,
            min_silence_ms: config.min_silence_ms,
            threshold_db: config.silence_threshold_db,
            output_dir: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.parts < 2 {
            return Err(MontageError::Validation(format!(
                "parts must be at least 2, got {}",
                self.parts
            )));
        }
        if self.min_silence_ms == 0 {
            return Err(MontageError::Validation(
                "minimum silence must be greater than 0 ms".to_string(),
            ));
        }
        if !self.threshold_db.is_finite() || self.threshold_db > 0.0 {
            return Err(MontageError::Validation(format!(
                "silence threshold must be a non-positive dBFS value, got {}",
                self.threshold_db
            )));
        }
        Ok(())
    }

    fn is_remote(&self) -> bool {
        self.source.starts_with("http://") || self.source.starts_with("https://")
    }
}

/// A segment written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentFile {
    pub index: usize,
    pub path: PathBuf,
}

/// Result of a `segment` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentPlan {
    pub total_ms: u64,
    pub silences: Vec<SilenceRange>,
    pub segments: Vec<Segment>,
    pub files: Vec<SegmentFile>,
}

/// Probe, decode, detect silences and partition an audio file, optionally
/// cutting the parts to disk.
pub async fn segment_audio(
    request: &SegmentRequest,
    config: &Config,
    fetcher: &dyn AssetFetcher,
) -> Result<SegmentPlan> {
    request.validate()?;

    std::fs::create_dir_all(&config.scratch_dir)?;
    let work_dir = tempfile::Builder::new()
        .prefix("segment-")
        .tempdir_in(&config.scratch_dir)?;

    let source: PathBuf = if request.is_remote() {
        fetcher
            .fetch(&request.source, AssetKind::Audio, work_dir.path(), "source")
            .await
            .map_err(|e| MontageError::fetch("audio", e))?
            .path
    } else {
        let path = PathBuf::from(&request.source);
        if !path.exists() {
            return Err(MontageError::FileNotFound(request.source.clone()));
        }
        path
    };

    let tools = FfmpegTools::from_config(config);
    let analysis_path = work_dir.path().join("analysis.wav");
    let metadata = extract_audio(&tools, &source, &analysis_path, config.reencode_timeout()).await?;
    let total_ms = metadata.duration.as_millis() as u64;

    let silence_config = SilenceConfig {
        threshold_db: request.threshold_db,
        min_silence: Duration::from_millis(request.min_silence_ms),
        ..Default::default()
    };
    let silences = detect_silences(&analysis_path, &silence_config)?;
    let segments = partition(total_ms, request.parts, &silences, &SegmentConfig::default());

    info!(
        "Split {:.1}s of audio into {} parts using {} detected silences",
        metadata.duration.as_secs_f64(),
        segments.len(),
        silences.len()
    );

    let files = match &request.output_dir {
        Some(dir) => cut_segments(&tools, &source, &segments, dir, config.reencode_timeout()).await?,
        None => Vec::new(),
    };

    Ok(SegmentPlan {
        total_ms,
        silences,
        segments,
        files,
    })
}

/// Write each non-empty segment of `source` to `output_dir/part_NNN.wav`.
pub async fn cut_segments(
    tools: &FfmpegTools,
    source: &Path,
    segments: &[Segment],
    output_dir: &Path,
    timeout: Duration,
) -> Result<Vec<SegmentFile>> {
    std::fs::create_dir_all(output_dir).map_err(|e| {
        MontageError::AudioExtraction(format!("Failed to create output directory: {e}"))
    })?;

    info!(
        "Cutting {} segments into {}",
        segments.len(),
        output_dir.display()
    );

    let mut files = Vec::with_capacity(segments.len());
    for (index, segment) in segments.iter().enumerate() {
        if segment.duration_ms == 0 {
            debug!("Skipping empty segment {}", index);
            continue;
        }
        let path = output_dir.join(format!("part_{:03}.wav", index + 1));
        extract_audio_segment(tools, source, &path, segment.start(), segment.end(), timeout).await?;
        files.push(SegmentFile { index, path });
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(segments: &[Segment]) -> Vec<(u64, u64)> {
        segments.iter().map(|s| (s.start_ms, s.end_ms)).collect()
    }

    fn assert_covers(segments: &[Segment], total_ms: u64, parts: usize) {
        assert_eq!(segments.len(), parts);
        assert_eq!(segments[0].start_ms, 0);
        assert_eq!(segments[parts - 1].end_ms, total_ms);
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end_ms, pair[1].start_ms);
        }
        for s in segments {
            assert!(s.start_ms <= s.end_ms);
            assert_eq!(s.duration_ms, s.end_ms - s.start_ms);
        }
    }

    #[test]
    fn test_worked_example() {
        let silences = vec![SilenceRange::new(24800, 25300), SilenceRange::new(74500, 75900)];
        let segments = partition(100_000, 4, &silences, &SegmentConfig::default());

        assert_eq!(
            bounds(&segments),
            vec![(0, 25050), (25050, 50000), (50000, 75200), (75200, 100_000)]
        );
    }

    #[test]
    fn test_even_split_without_silences() {
        let segments = partition(10_001, 3, &[], &SegmentConfig::default());
        assert_eq!(
            bounds(&segments),
            vec![(0, 3334), (3334, 6667), (6667, 10_001)]
        );
    }

    #[test]
    fn test_equidistant_tie_goes_to_earliest() {
        // Midpoints 9900 and 10100, both 100ms from the ideal cut at 10000
        let silences = vec![SilenceRange::new(10000, 10200), SilenceRange::new(9800, 10000)];
        for _ in 0..3 {
            let segments = partition(20_000, 2, &silences, &SegmentConfig::default());
            assert_eq!(bounds(&segments), vec![(0, 9900), (9900, 20_000)]);
        }
    }

    #[test]
    fn test_silence_outside_tolerance_ignored() {
        // ideal length 5000 -> tolerance min(2000, 2000)
        let silences = vec![SilenceRange::new(7000, 7400)];
        let segments = partition(10_000, 2, &silences, &SegmentConfig::default());
        assert_eq!(bounds(&segments), vec![(0, 5000), (5000, 10_000)]);
    }

    #[test]
    fn test_tolerance_capped_by_ratio() {
        // ideal length 1000 -> tolerance 400
        let silences = vec![SilenceRange::new(1400, 1600)];
        let segments = partition(2000, 2, &silences, &SegmentConfig::default());
        assert_eq!(bounds(&segments), vec![(0, 1000), (1000, 2000)]);

        let silences = vec![SilenceRange::new(1300, 1500)];
        let segments = partition(2000, 2, &silences, &SegmentConfig::default());
        assert_eq!(bounds(&segments), vec![(0, 1400), (1400, 2000)]);
    }

    #[test]
    fn test_zero_duration_gives_degenerate_segments() {
        let segments = partition(0, 3, &[SilenceRange::new(0, 0)], &SegmentConfig::default());
        assert_eq!(bounds(&segments), vec![(0, 0), (0, 0), (0, 0)]);
    }

    #[test]
    fn test_silence_reused_and_clamped() {
        let config = SegmentConfig {
            tolerance_ratio: 1.0,
            max_tolerance_ms: 2000,
        };
        let silences = vec![SilenceRange::new(4300, 4500)];
        let segments = partition(10_000, 4, &silences, &config);

        assert_covers(&segments, 10_000, 4);
        assert_eq!(
            bounds(&segments),
            vec![(0, 4400), (4400, 4400), (4400, 7500), (7500, 10_000)]
        );
    }

    #[test]
    fn test_always_contiguous_and_complete() {
        // Deterministic pseudo-random silences
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = move |bound: u64| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed % bound.max(1)
        };

        for total in [0u64, 1, 999, 12_345, 100_000, 3_600_000] {
            for parts in 2..=9 {
                let silences: Vec<SilenceRange> = (0..next(12))
                    .map(|_| {
                        let start = next(total + 1);
                        SilenceRange::new(start, (start + 300 + next(800)).min(total))
                    })
                    .collect();
                let segments = partition(total, parts, &silences, &SegmentConfig::default());
                assert_covers(&segments, total, parts);
            }
        }
    }

    #[test]
    fn test_request_validation() {
        let config = Config::default();
        let mut request = SegmentRequest::new("talk.mp3", 4, &config);
        assert!(request.validate().is_ok());
        assert_eq!(request.min_silence_ms, 300);

        request.parts = 1;
        assert!(request.validate().is_err());

        request.parts = 2;
        request.threshold_db = 6.0;
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_remote_detection() {
        let config = Config::default();
        assert!(SegmentRequest::new("https://cdn.example.com/a.mp3", 2, &config).is_remote());
        assert!(!SegmentRequest::new("/data/a.mp3", 2, &config).is_remote());
    }
}
