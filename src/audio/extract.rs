use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{MontageError, Result};
use crate::render::FfmpegTools;

use super::AudioMetadata;

/// Sample rate used for silence analysis.
pub const ANALYSIS_SAMPLE_RATE: u32 = 16000;

/// Decode any audio or video file to mono 16-bit PCM WAV at 16kHz.
pub async fn extract_audio(
    tools: &FfmpegTools,
    input: &Path,
    output: &Path,
    timeout: Duration,
) -> Result<AudioMetadata> {
    if !input.exists() {
        return Err(MontageError::FileNotFound(input.display().to_string()));
    }

    info!("Extracting audio from {}", input.display());

    let duration = tools.probe_duration(input).await?;
    debug!("Input duration: {:?}", duration);

    let args = vec![
        "-i".to_string(),
        input.display().to_string(),
        "-vn".to_string(),
        "-acodec".to_string(),
        "pcm_s16le".to_string(),
        "-ar".to_string(),
        ANALYSIS_SAMPLE_RATE.to_string(),
        "-ac".to_string(),
        "1".to_string(),
        output.display().to_string(),
    ];
    tools.runner().with_timeout(timeout).run(&args).await?;

    if !output.exists() {
        return Err(MontageError::AudioExtraction(
            "Output file was not created".to_string(),
        ));
    }

    info!("Audio extracted to {}", output.display());

    Ok(AudioMetadata {
        duration,
        sample_rate: ANALYSIS_SAMPLE_RATE,
        channels: 1,
    })
}

/// Cut `[start, end)` out of `input` into a PCM WAV file, keeping the
/// source sample rate and channel layout.
pub async fn extract_audio_segment(
    tools: &FfmpegTools,
    input: &Path,
    output: &Path,
    start: Duration,
    end: Duration,
    timeout: Duration,
) -> Result<()> {
    if !input.exists() {
        return Err(MontageError::FileNotFound(input.display().to_string()));
    }

    let duration = end.saturating_sub(start);
    if duration.is_zero() {
        return Err(MontageError::AudioExtraction(
            "Segment duration is zero".to_string(),
        ));
    }

    let start_secs = format!("{:.3}", start.as_secs_f64());
    let duration_secs = format!("{:.3}", duration.as_secs_f64());

    debug!(
        "Extracting segment: start={}, duration={}",
        start_secs, duration_secs
    );

    let args = vec![
        "-ss".to_string(),
        start_secs,
        "-t".to_string(),
        duration_secs,
        "-i".to_string(),
        input.display().to_string(),
        "-vn".to_string(),
        "-acodec".to_string(),
        "pcm_s16le".to_string(),
        output.display().to_string(),
    ];
    tools
        .runner()
        .with_timeout(timeout)
        .with_expected_duration(duration)
        .run(&args)
        .await?;

    Ok(())
}
