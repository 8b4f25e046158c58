use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{MontageError, Result};
use crate::fetch::{AssetFetcher, AssetKind};
use crate::job::{JobResult, ProgressReporter};
use crate::render::{
    render_with_fallback, select_strategy, EncodeOptions, RenderOverlay, RenderRequest,
    RenderSoundEffect, Renderer,
};
use crate::request::{JobRequest, Overlay};

/// Progress band covered by downloads.
const DOWNLOAD_START: u8 = 5;
const DOWNLOAD_END: u8 = 45;
/// Progress band covered by rendering.
const RENDER_START: u8 = 50;
const RENDER_END: u8 = 95;

/// Downloads one job's assets in order, naming each by its position in the request.
struct Downloader<'a> {
    fetcher: &'a dyn AssetFetcher,
    dir: &'a Path,
    reporter: &'a ProgressReporter,
    total: usize,
    done: usize,
}

impl Downloader<'_> {
    async fn fetch(&mut self, url: &str, kind: AssetKind, label: &str) -> Result<PathBuf> {
        self.reporter
            .downloading(self.progress(), format!("Downloading {label}"));
        debug!("Fetching {} from {}", label, url);

        let stem = label.replace(' ', "_");
        let asset = self
            .fetcher
            .fetch(url, kind, self.dir, &stem)
            .await
            .map_err(|e| MontageError::fetch(label, e))?;

        self.done += 1;
        debug!("Fetched {} ({} bytes)", label, asset.size);
        Ok(asset.path)
    }

    fn progress(&self) -> u8 {
        let span = usize::from(DOWNLOAD_END - DOWNLOAD_START);
        let step = span * self.done / self.total.max(1);
        DOWNLOAD_START + step as u8
    }
}

/// Run one composition job: download every asset into a private scratch
/// directory, render, and report where the result went.
///
/// The scratch directory is removed when this returns or unwinds.
pub async fn compose(
    request: &JobRequest,
    config: &Config,
    fetcher: &dyn AssetFetcher,
    renderer: &dyn Renderer,
    reporter: &ProgressReporter,
) -> Result<JobResult> {
    let start_time = Instant::now();
    let scratch = create_scratch_dir(config, reporter)?;
    debug!("Using scratch directory: {:?}", scratch.path());

    // Downloads
    let mut downloader = Downloader {
        fetcher,
        dir: scratch.path(),
        reporter,
        total: request.asset_count(),
        done: 0,
    };

    let mut videos = Vec::with_capacity(request.videos.len());
    for (idx, url) in request.videos.iter().enumerate() {
        videos.push(downloader.fetch(url, AssetKind::Video, &format!("video {idx}")).await?);
    }

    let mut images = Vec::with_capacity(request.images.len());
    for (idx, url) in request.images.iter().enumerate() {
        images.push(downloader.fetch(url, AssetKind::Image, &format!("image {idx}")).await?);
    }

    let audio = match &request.audio {
        Some(url) => Some(downloader.fetch(url, AssetKind::Audio, "audio").await?),
        None => None,
    };

    let mut overlays = Vec::new();
    for (idx, overlay) in request.effective_overlays().into_iter().enumerate() {
        overlays.push(match overlay {
            Overlay::Text {
                text,
                x,
                y,
                font_size,
                color,
                start,
                end,
            } => RenderOverlay::Text {
                text,
                x,
                y,
                font_size,
                color,
                start,
                end,
            },
            Overlay::Image {
                url,
                x,
                y,
                start,
                end,
            } => RenderOverlay::Image {
                path: downloader
                    .fetch(&url, AssetKind::Image, &format!("overlay {idx}"))
                    .await?,
                x,
                y,
                start,
                end,
            },
        });
    }

    let mut sound_effects = Vec::with_capacity(request.sound_effects.len());
    for (idx, effect) in request.sound_effects.iter().enumerate() {
        let path = downloader
            .fetch(&effect.url, AssetKind::Audio, &format!("sound effect {idx}"))
            .await?;
        sound_effects.push(RenderSoundEffect {
            path,
            start: effect.start,
            volume: effect.volume,
        });
    }

    info!(
        "Downloaded {} assets in {:.2}s",
        downloader.done,
        start_time.elapsed().as_secs_f64()
    );

    // Render
    let quality = request.quality.unwrap_or(config.default_quality);
    let options = EncodeOptions::for_quality(quality, config);

    tokio::fs::create_dir_all(&config.output_dir).await?;
    let filename = format!("video_{}.mp4", Uuid::new_v4());
    let output = config.output_dir.join(&filename);

    let render_request = RenderRequest {
        videos,
        images,
        audio,
        overlays,
        sound_effects,
        options,
        work_dir: scratch.path().to_path_buf(),
        output: output.clone(),
    };

    let strategy = select_strategy(&render_request);
    reporter.processing(RENDER_START, format!("Rendering ({strategy}, {quality})"));

    let last = AtomicU8::new(RENDER_START);
    let on_progress = |fraction: f64| {
        let span = f64::from(RENDER_END - RENDER_START);
        let pct = RENDER_START + (fraction.clamp(0.0, 1.0) * span).round() as u8;
        if last.fetch_max(pct, Ordering::Relaxed) < pct {
            reporter.processing(pct, "Rendering");
        }
    };

    let outcome = render_with_fallback(renderer, &render_request, &on_progress).await?;

    info!(
        "Rendered {} with {}{} in {:.2}s",
        filename,
        outcome.strategy,
        if outcome.fell_back { " (after fallback)" } else { "" },
        start_time.elapsed().as_secs_f64()
    );

    drop(scratch);

    Ok(JobResult {
        output_path: output,
        filename,
        strategy: outcome.strategy,
        fell_back: outcome.fell_back,
    })
}

fn create_scratch_dir(config: &Config, reporter: &ProgressReporter) -> Result<TempDir> {
    std::fs::create_dir_all(&config.scratch_dir)?;
    let dir = tempfile::Builder::new()
        .prefix(&format!("job-{}-", reporter.job_id()))
        .tempdir_in(&config.scratch_dir)
        .map_err(|e| {
            MontageError::Io(std::io::Error::other(format!(
                "Failed to create scratch directory: {}",
                e
            )))
        })?;
    Ok(dir)
}
