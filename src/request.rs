//! The canonical job request accepted by the orchestrator.
//!
//! One schema with optional fields covers plain concatenation, audio
//! replacement, overlays, sound effects and image slideshows.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{MontageError, Result};
use crate::render::Quality;

/// Upper bound for a sound effect volume multiplier.
pub const MAX_EFFECT_VOLUME: f64 = 10.0;

/// Font size used for the title when none is configured.
pub const TITLE_FONT_SIZE: u32 = 40;

static COLOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(#[0-9a-fA-F]{6}|0x[0-9a-fA-F]{6}|[a-zA-Z]+)(@(0(\.\d+)?|1(\.0+)?))?$")
        .expect("Invalid color regex")
});

static POSITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_+\-*/(). ,]+$").expect("Invalid position regex"));

fn default_x() -> String {
    "(W-w)/2".to_string()
}

fn default_y() -> String {
    "(H-h)/2".to_string()
}

fn default_font_size() -> u32 {
    48
}

fn default_color() -> String {
    "white".to_string()
}

fn default_volume() -> f64 {
    1.0
}

/// A visual element burned into the output for an optional time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Overlay {
    Text {
        text: String,
        #[serde(default = "default_text_x")]
        x: String,
        #[serde(default = "default_text_y")]
        y: String,
        #[serde(default = "default_font_size")]
        font_size: u32,
        #[serde(default = "default_color")]
        color: String,
        #[serde(default)]
        start: Option<f64>,
        #[serde(default)]
        end: Option<f64>,
    },
    Image {
        url: String,
        #[serde(default = "default_x")]
        x: String,
        #[serde(default = "default_y")]
        y: String,
        #[serde(default)]
        start: Option<f64>,
        #[serde(default)]
        end: Option<f64>,
    },
}

fn default_text_x() -> String {
    "(w-text_w)/2".to_string()
}

fn default_text_y() -> String {
    "(h-text_h)/2".to_string()
}

impl Overlay {
    /// The bottom-centred caption shown for the whole video.
    pub fn title(text: impl Into<String>) -> Self {
        Overlay::Text {
            text: text.into(),
            x: default_text_x(),
            y: "h-100".to_string(),
            font_size: TITLE_FONT_SIZE,
            color: default_color(),
            start: None,
            end: None,
        }
    }

    pub fn window(&self) -> (Option<f64>, Option<f64>) {
        match self {
            Overlay::Text { start, end, .. } | Overlay::Image { start, end, .. } => (*start, *end),
        }
    }
}

/// A short clip mixed into the soundtrack at `start` seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundEffect {
    pub url: String,
    #[serde(default)]
    pub start: f64,
    #[serde(default = "default_volume")]
    pub volume: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRequest {
    /// Video clips concatenated in order.
    pub videos: Vec<String>,
    /// Still images for a slideshow timed to `audio`.
    pub images: Vec<String>,
    /// Replacement soundtrack.
    pub audio: Option<String>,
    /// Caption drawn along the bottom for the whole video.
    pub title: Option<String>,
    pub overlays: Vec<Overlay>,
    pub sound_effects: Vec<SoundEffect>,
    pub quality: Option<Quality>,
}

impl JobRequest {
    /// Structural checks only; nothing here touches the network.
    pub fn validate(&self) -> Result<()> {
        match (self.videos.is_empty(), self.images.is_empty()) {
            (true, true) => {
                return Err(MontageError::Validation(
                    "at least one video or image is required".to_string(),
                ))
            }
            (false, false) => {
                return Err(MontageError::Validation(
                    "videos and images cannot be combined in one job".to_string(),
                ))
            }
            _ => {}
        }

        if !self.images.is_empty() && self.audio.is_none() {
            return Err(MontageError::Validation(
                "an image slideshow requires an audio track".to_string(),
            ));
        }

        for (idx, url) in self.videos.iter().enumerate() {
            validate_url(url, &format!("video {idx}"))?;
        }
        for (idx, url) in self.images.iter().enumerate() {
            validate_url(url, &format!("image {idx}"))?;
        }
        if let Some(url) = &self.audio {
            validate_url(url, "audio")?;
        }

        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(MontageError::Validation("title cannot be blank".to_string()));
            }
        }

        for (idx, overlay) in self.overlays.iter().enumerate() {
            validate_overlay(idx, overlay)?;
        }

        for (idx, effect) in self.sound_effects.iter().enumerate() {
            validate_url(&effect.url, &format!("sound effect {idx}"))?;
            if !effect.start.is_finite() || effect.start < 0.0 {
                return Err(MontageError::Validation(format!(
                    "sound effect {idx}: start must be a non-negative number of seconds"
                )));
            }
            if !(0.0..=MAX_EFFECT_VOLUME).contains(&effect.volume) {
                return Err(MontageError::Validation(format!(
                    "sound effect {idx}: volume must be between 0 and {MAX_EFFECT_VOLUME}"
                )));
            }
        }

        Ok(())
    }

    /// Overlays to burn in, with the title appended last so it draws on top.
    pub fn effective_overlays(&self) -> Vec<Overlay> {
        let mut overlays = self.overlays.clone();
        if let Some(title) = &self.title {
            overlays.push(Overlay::title(title.clone()));
        }
        overlays
    }

    /// Total number of remote assets the job will download.
    pub fn asset_count(&self) -> usize {
        let image_overlays = self
            .overlays
            .iter()
            .filter(|o| matches!(o, Overlay::Image { .. }))
            .count();
        self.videos.len()
            + self.images.len()
            + usize::from(self.audio.is_some())
            + image_overlays
            + self.sound_effects.len()
    }
}

fn validate_url(raw: &str, what: &str) -> Result<()> {
    let url = Url::parse(raw)
        .map_err(|e| MontageError::Validation(format!("{what}: invalid URL '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(MontageError::Validation(format!(
            "{what}: unsupported URL scheme '{other}'"
        ))),
    }
}

fn validate_window(idx: usize, start: Option<f64>, end: Option<f64>) -> Result<()> {
    for t in [start, end].into_iter().flatten() {
        if !t.is_finite() || t < 0.0 {
            return Err(MontageError::Validation(format!(
                "overlay {idx}: times must be non-negative seconds"
            )));
        }
    }
    if let (Some(s), Some(e)) = (start, end) {
        if e <= s {
            return Err(MontageError::Validation(format!(
                "overlay {idx}: end ({e}) must be after start ({s})"
            )));
        }
    }
    Ok(())
}

fn validate_overlay(idx: usize, overlay: &Overlay) -> Result<()> {
    let (start, end) = overlay.window();
    validate_window(idx, start, end)?;

    let (Overlay::Text { x, y, .. } | Overlay::Image { x, y, .. }) = overlay;
    for expr in [x, y] {
        if !POSITION_RE.is_match(expr) {
            return Err(MontageError::Validation(format!(
                "overlay {idx}: unsupported position expression '{expr}'"
            )));
        }
    }

    match overlay {
        Overlay::Text {
            text,
            font_size,
            color,
            ..
        } => {
            if text.trim().is_empty() {
                return Err(MontageError::Validation(format!(
                    "overlay {idx}: text cannot be blank"
                )));
            }
            if *font_size == 0 {
                return Err(MontageError::Validation(format!(
                    "overlay {idx}: font size must be greater than 0"
                )));
            }
            if !COLOR_RE.is_match(color) {
                return Err(MontageError::Validation(format!(
                    "overlay {idx}: unrecognized color '{color}'"
                )));
            }
            Ok(())
        }
        Overlay::Image { url, .. } => validate_url(url, &format!("overlay {idx}")),
    }
}
