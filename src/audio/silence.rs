use std::path::Path;
use std::time::Duration;

use hound::WavReader;
use tracing::{debug, info};

use crate::error::{MontageError, Result};

use super::SilenceRange;

/// Parameters for silence detection.
#[derive(Debug, Clone)]
pub struct SilenceConfig {
    /// Level in dBFS below which a window counts as silent.
    pub threshold_db: f64,

    /// Shortest quiet run reported as a silence.
    pub min_silence: Duration,

    /// Analysis window length.
    pub window: Duration,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            threshold_db: -40.0,
            min_silence: Duration::from_millis(300),
            window: Duration::from_millis(10),
        }
    }
}

/// RMS level of a window in dBFS. Digital silence is negative infinity.
fn window_level_db(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return f64::NEG_INFINITY;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    let rms = (sum_squares / samples.len() as f64).sqrt();
    if rms == 0.0 {
        f64::NEG_INFINITY
    } else {
        20.0 * rms.log10()
    }
}

/// Detect silences in a mono or interleaved PCM WAV file.
pub fn detect_silences(audio_path: &Path, config: &SilenceConfig) -> Result<Vec<SilenceRange>> {
    let reader = WavReader::open(audio_path)
        .map_err(|e| MontageError::AudioExtraction(format!("Failed to open WAV file: {e}")))?;

    let spec = reader.spec();

    info!(
        "Analyzing audio: {} Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );

    let samples: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .into_samples::<i16>()
            .map(|s| s.unwrap_or(0))
            .collect(),
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| (s.unwrap_or(0.0) * i16::MAX as f32) as i16)
            .collect(),
    };

    let silences = detect_silences_in_samples(
        &samples,
        spec.sample_rate * u32::from(spec.channels.max(1)),
        config,
    );

    info!("Detected {} silences", silences.len());
    Ok(silences)
}

/// Detect silences in raw samples. `rate` is samples per second across all
/// channels, so interleaved input works unchanged.
pub fn detect_silences_in_samples(
    samples: &[i16],
    rate: u32,
    config: &SilenceConfig,
) -> Vec<SilenceRange> {
    if samples.is_empty() || rate == 0 {
        return vec![];
    }

    let window_size = ((rate as f64 * config.window.as_secs_f64()).round() as usize).max(1);
    let window_ms = window_size as f64 * 1000.0 / rate as f64;
    let total_ms = samples.len() as f64 * 1000.0 / rate as f64;
    let min_ms = config.min_silence.as_millis() as f64;

    debug!(
        "Silence analysis: {} samples, {} per window, threshold {} dBFS",
        samples.len(),
        window_size,
        config.threshold_db
    );

    let quiet: Vec<bool> = samples
        .chunks(window_size)
        .map(|w| window_level_db(w) < config.threshold_db)
        .collect();

    let mut silences = Vec::new();
    let mut run_start: Option<usize> = None;

    for (i, &is_quiet) in quiet.iter().chain(std::iter::once(&false)).enumerate() {
        match (is_quiet, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                let start_ms = start as f64 * window_ms;
                let end_ms = (i as f64 * window_ms).min(total_ms);
                if end_ms - start_ms >= min_ms {
                    silences.push(SilenceRange::new(
                        start_ms.round() as u64,
                        end_ms.round() as u64,
                    ));
                }
                run_start = None;
            }
            _ => {}
        }
    }

    silences
}
