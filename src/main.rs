use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use montage::audio::{segment_audio, SegmentPlan, SegmentRequest};
use montage::render::FfmpegTools;
use montage::{Config, FfmpegRenderer, HttpFetcher, Job, JobOrchestrator, JobRequest, JobStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "montage")]
#[command(version, about = "Compose videos and split audio with FFmpeg")]
#[command(
    long_about = "Run media composition jobs (concatenation, audio replacement, overlays, sound effects, slideshows) and split audio into parts at natural pauses."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a composition job described by a JSON file and wait for it
    Compose {
        /// Job description (JSON)
        spec: PathBuf,

        /// Print the final job record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Split an audio file into parts, cutting at silences where possible
    Segment {
        /// Local audio file or http(s) URL
        audio: String,

        /// Number of parts
        #[arg(short, long)]
        parts: usize,

        /// Shortest pause that counts as silence, in milliseconds
        #[arg(long)]
        min_silence_ms: Option<u64>,

        /// Level below which audio is silent, in dBFS
        #[arg(long, allow_hyphen_values = true)]
        threshold_db: Option<f64>,

        /// Write each part to this directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let config = Config::load().context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    match cli.command {
        Command::Compose { spec, json } => compose(&spec, config, json).await,
        Command::Segment {
            audio,
            parts,
            min_silence_ms,
            threshold_db,
            output_dir,
            json,
        } => {
            let mut request = SegmentRequest::new(audio, parts, &config);
            if let Some(ms) = min_silence_ms {
                request.min_silence_ms = ms;
            }
            if let Some(db) = threshold_db {
                request.threshold_db = db;
            }
            request.output_dir = output_dir;
            segment(request, &config, json).await
        }
    }
}

async fn check_ffmpeg(config: &Config) -> Result<()> {
    FfmpegTools::from_config(config).check().await.context(
        "FFmpeg not found. Install it with: brew install ffmpeg (macOS) or apt install ffmpeg (Linux)",
    )
}

async fn compose(spec: &Path, config: Config, json: bool) -> Result<()> {
    let raw = std::fs::read_to_string(spec)
        .with_context(|| format!("Failed to read job spec {}", spec.display()))?;
    let request: JobRequest = serde_json::from_str(&raw).context("Job spec is not valid JSON")?;

    check_ffmpeg(&config).await?;

    let fetcher = Arc::new(HttpFetcher::new(&config)?);
    let renderer = Arc::new(FfmpegRenderer::new(&config));
    let orchestrator = JobOrchestrator::new(fetcher, renderer, config);

    let id = orchestrator.submit(request)?;
    info!("Submitted job {}", id);

    let pb = if json {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb
    };

    let job = loop {
        let job = orchestrator
            .status(&id)
            .with_context(|| format!("Job {} disappeared", id))?;
        pb.set_position(u64::from(job.progress));
        pb.set_message(job.message.clone());
        if job.is_terminal() {
            break job;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };
    pb.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
    } else {
        print_job_summary(&job);
    }

    if job.status == JobStatus::Failed {
        anyhow::bail!(
            "Job {} failed: {}",
            job.id,
            job.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn segment(request: SegmentRequest, config: &Config, json: bool) -> Result<()> {
    check_ffmpeg(config).await?;

    let fetcher = HttpFetcher::new(config)?;
    let plan = segment_audio(&request, config, &fetcher).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_segment_summary(&plan);
    }
    Ok(())
}

fn print_job_summary(job: &Job) {
    println!();
    println!("═══════════════════════════════════════════════════════════════");
    println!("                      Composition {}", job.status);
    println!("═══════════════════════════════════════════════════════════════");
    println!();
    println!("  Job:        {}", job.id);
    if let Some(ref result) = job.result {
        println!("  Output:     {}", result.output_path.display());
        println!(
            "  Strategy:   {}{}",
            result.strategy,
            if result.fell_back { " (fallback)" } else { "" }
        );
    }
    if let Some(ref error) = job.error {
        println!("  Error:      {}", error);
    }
    if let Some(done) = job.completed_at {
        let elapsed = done.signed_duration_since(job.created_at);
        println!(
            "  Time:       {:.2}s",
            elapsed.num_milliseconds() as f64 / 1000.0
        );
    }
    println!();
    println!("═══════════════════════════════════════════════════════════════");
}

fn print_segment_summary(plan: &SegmentPlan) {
    println!();
    println!(
        "  {:.1}s of audio, {} silences detected",
        plan.total_ms as f64 / 1000.0,
        plan.silences.len()
    );
    println!();
    for (idx, seg) in plan.segments.iter().enumerate() {
        let file = plan
            .files
            .iter()
            .find(|f| f.index == idx)
            .map(|f| format!("  {}", f.path.display()))
            .unwrap_or_default();
        println!(
            "  {:>3}  {:>10.3}s - {:>10.3}s  ({:.3}s){}",
            idx + 1,
            seg.start_ms as f64 / 1000.0,
            seg.end_ms as f64 / 1000.0,
            seg.duration_ms as f64 / 1000.0,
            file
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_segment_with_negative_threshold() {
        let cli = Cli::try_parse_from([
            "montage",
            "segment",
            "talk.wav",
            "--parts",
            "4",
            "--threshold-db",
            "-35",
        ])
        .unwrap();

        match cli.command {
            Command::Segment {
                parts,
                threshold_db,
                min_silence_ms,
                ..
            } => {
                assert_eq!(parts, 4);
                assert_eq!(threshold_db, Some(-35.0));
                assert_eq!(min_silence_ms, None);
            }
            _ => panic!("expected segment command"),
        }
    }

    #[test]
    fn test_cli_parses_compose() {
        let cli = Cli::try_parse_from(["montage", "--verbose", "compose", "job.json", "--json"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Compose { json: true, .. }));
    }
}
