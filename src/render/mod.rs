pub mod encode;
pub mod ffmpeg;
pub mod runner;
pub mod strategy;

pub use encode::{EncodeOptions, Preset, Quality};
pub use ffmpeg::FfmpegRenderer;
pub use runner::{FfmpegRunner, FfmpegTools};
pub use strategy::{render_with_fallback, select_strategy, RenderOutcome};

use crate::error::RenderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How the output video is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Repackage existing video frames without decoding them.
    StreamCopy,
    /// Decode and encode everything; needed to draw new pixels.
    Reencode,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::StreamCopy => write!(f, "stream copy"),
            Strategy::Reencode => write!(f, "re-encode"),
        }
    }
}

/// A visual overlay whose assets are already on local storage.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOverlay {
    Text {
        text: String,
        x: String,
        y: String,
        font_size: u32,
        color: String,
        start: Option<f64>,
        end: Option<f64>,
    },
    Image {
        path: PathBuf,
        x: String,
        y: String,
        start: Option<f64>,
        end: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderSoundEffect {
    pub path: PathBuf,
    /// Offset into the output, in seconds.
    pub start: f64,
    pub volume: f64,
}

/// Everything the renderer needs, with all inputs downloaded.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub videos: Vec<PathBuf>,
    pub images: Vec<PathBuf>,
    pub audio: Option<PathBuf>,
    pub overlays: Vec<RenderOverlay>,
    pub sound_effects: Vec<RenderSoundEffect>,
    pub options: EncodeOptions,
    /// Scratch space for intermediate files such as concat lists.
    pub work_dir: PathBuf,
    pub output: PathBuf,
}

impl RenderRequest {
    /// Whether any new pixels must be drawn into the video.
    pub fn needs_pixels(&self) -> bool {
        !self.overlays.is_empty() || !self.images.is_empty()
    }
}

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Produce `request.output` using `strategy`, reporting progress in `[0, 1]`.
    async fn render(
        &self,
        request: &RenderRequest,
        strategy: Strategy,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<(), RenderError>;

    fn name(&self) -> &'static str;
}
