use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{MontageError, Result};

/// x264 speed presets accepted by the re-encode path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    #[default]
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl Preset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Ultrafast => "ultrafast",
            Preset::Superfast => "superfast",
            Preset::Veryfast => "veryfast",
            Preset::Faster => "faster",
            Preset::Fast => "fast",
            Preset::Medium => "medium",
            Preset::Slow => "slow",
            Preset::Slower => "slower",
            Preset::Veryslow => "veryslow",
        }
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ultrafast" => Ok(Preset::Ultrafast),
            "superfast" => Ok(Preset::Superfast),
            "veryfast" => Ok(Preset::Veryfast),
            "faster" => Ok(Preset::Faster),
            "fast" => Ok(Preset::Fast),
            "medium" => Ok(Preset::Medium),
            "slow" => Ok(Preset::Slow),
            "slower" => Ok(Preset::Slower),
            "veryslow" => Ok(Preset::Veryslow),
            _ => Err(format!("Unknown preset: {s}")),
        }
    }
}

/// Named quality levels a job may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Draft,
    #[default]
    Standard,
    High,
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Quality::Draft => write!(f, "draft"),
            Quality::Standard => write!(f, "standard"),
            Quality::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(Quality::Draft),
            "standard" => Ok(Quality::Standard),
            "high" => Ok(Quality::High),
            _ => Err(format!(
                "Unknown quality: {s}. Use 'draft', 'standard', or 'high'"
            )),
        }
    }
}

/// Encoder settings for the re-encode path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeOptions {
    pub preset: Preset,
    /// Constant rate factor, 0 (lossless) to 51.
    pub crf: u8,
    pub audio_bitrate_kbps: u32,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

impl EncodeOptions {
    pub const VIDEO_CODEC: &'static str = "libx264";
    pub const AUDIO_CODEC: &'static str = "aac";
    pub const PIXEL_FORMAT: &'static str = "yuv420p";
    pub const MAX_CRF: u8 = 51;

    pub fn for_quality(quality: Quality, config: &Config) -> Self {
        let (preset, crf, audio_bitrate_kbps) = match quality {
            Quality::Draft => (Preset::Veryfast, 28, 96),
            Quality::Standard => (Preset::Medium, 23, 128),
            Quality::High => (Preset::Slow, 18, 192),
        };
        Self {
            preset,
            crf,
            audio_bitrate_kbps,
            fps: config.fps,
            width: config.width,
            height: config.height,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.crf > Self::MAX_CRF {
            return Err(MontageError::Config(format!(
                "CRF {} is out of range (0-{})",
                self.crf,
                Self::MAX_CRF
            )));
        }
        if self.fps == 0 || self.width == 0 || self.height == 0 {
            return Err(MontageError::Config(
                "fps and output size must be greater than 0".to_string(),
            ));
        }
        // yuv420p needs even dimensions
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(MontageError::Config(format!(
                "Output size {}x{} must have even dimensions",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// Output arguments selecting codecs and rate control.
    pub fn output_args(&self) -> Vec<String> {
        vec![
            "-c:v".into(),
            Self::VIDEO_CODEC.into(),
            "-preset".into(),
            self.preset.as_str().into(),
            "-crf".into(),
            self.crf.to_string(),
            "-pix_fmt".into(),
            Self::PIXEL_FORMAT.into(),
            "-r".into(),
            self.fps.to_string(),
            "-c:a".into(),
            Self::AUDIO_CODEC.into(),
            "-b:a".into(),
            format!("{}k", self.audio_bitrate_kbps),
        ]
    }
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self::for_quality(Quality::default(), &Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_parsing() {
        assert_eq!("draft".parse::<Quality>().unwrap(), Quality::Draft);
        assert_eq!("HIGH".parse::<Quality>().unwrap(), Quality::High);
        assert!("ultra".parse::<Quality>().is_err());
    }

    #[test]
    fn test_preset_round_trip_names() {
        for name in ["ultrafast", "fast", "medium", "veryslow"] {
            assert_eq!(name.parse::<Preset>().unwrap().as_str(), name);
        }
        assert!("placebo".parse::<Preset>().is_err());
    }

    #[test]
    fn test_quality_mapping() {
        let config = Config::default();
        let draft = EncodeOptions::for_quality(Quality::Draft, &config);
        let high = EncodeOptions::for_quality(Quality::High, &config);

        assert!(draft.crf > high.crf);
        assert_eq!(draft.preset, Preset::Veryfast);
        assert_eq!(high.audio_bitrate_kbps, 192);
        assert_eq!(high.fps, 24);
    }

    #[test]
    fn test_validate_rejects_bad_crf_and_odd_size() {
        let mut options = EncodeOptions::default();
        assert!(options.validate().is_ok());

        options.crf = 60;
        assert!(options.validate().is_err());

        options.crf = 23;
        options.width = 1281;
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_output_args_contain_codecs() {
        let args = EncodeOptions::default().output_args();
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-preset medium"));
        assert!(joined.contains("-crf 23"));
        assert!(joined.contains("-b:a 128k"));
    }
}
