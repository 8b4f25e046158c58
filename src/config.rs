use crate::error::{MontageError, Result};
use crate::render::{EncodeOptions, Quality};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root under which each job gets its own scratch directory.
    pub scratch_dir: PathBuf,
    /// Directory receiving finished videos.
    pub output_dir: PathBuf,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub stream_copy_timeout_secs: u64,
    pub reencode_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    /// Upper bound for a single ffprobe call.
    pub probe_timeout_secs: u64,
    pub min_asset_bytes: u64,
    pub max_asset_bytes: u64,
    /// How long a finished job stays queryable.
    pub job_retention_secs: u64,
    pub default_quality: Quality,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub min_silence_ms: u64,
    pub silence_threshold_db: f64,
    /// Font for text overlays. Without one, ffmpeg's fontconfig default is used.
    pub font_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("montage"),
            output_dir: PathBuf::from("output"),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            stream_copy_timeout_secs: 120,
            reencode_timeout_secs: 600,
            fetch_timeout_secs: 30,
            probe_timeout_secs: 30,
            min_asset_bytes: 1024,
            max_asset_bytes: 500 * 1024 * 1024,
            job_retention_secs: 3600,
            default_quality: Quality::default(),
            width: 1280,
            height: 720,
            fps: 24,
            min_silence_ms: 300,
            silence_threshold_db: -40.0,
            font_file: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        // Load from config file if it exists
        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                config = toml::from_str::<Config>(&contents).map_err(|e| {
                    MontageError::Config(format!("{}: {e}", config_path.display()))
                })?;
            }
        }

        // Override with environment variables
        if let Ok(dir) = std::env::var("MONTAGE_SCRATCH_DIR") {
            config.scratch_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("MONTAGE_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("MONTAGE_FFMPEG") {
            config.ffmpeg_path = path;
        }
        if let Ok(path) = std::env::var("MONTAGE_FFPROBE") {
            config.ffprobe_path = path;
        }
        override_secs("MONTAGE_STREAM_COPY_TIMEOUT", &mut config.stream_copy_timeout_secs);
        override_secs("MONTAGE_REENCODE_TIMEOUT", &mut config.reencode_timeout_secs);
        override_secs("MONTAGE_FETCH_TIMEOUT", &mut config.fetch_timeout_secs);
        override_secs("MONTAGE_JOB_RETENTION", &mut config.job_retention_secs);
        override_secs("MONTAGE_PROBE_TIMEOUT", &mut config.probe_timeout_secs);
        if let Ok(path) = std::env::var("MONTAGE_FONT_FILE") {
            config.font_file = Some(PathBuf::from(path));
        }
        if let Ok(quality) = std::env::var("MONTAGE_QUALITY") {
            if let Ok(q) = quality.parse() {
                config.default_quality = q;
            }
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream_copy_timeout_secs == 0 || self.reencode_timeout_secs == 0 {
            return Err(MontageError::Config(
                "Render timeouts must be greater than 0".to_string(),
            ));
        }
        if self.fetch_timeout_secs == 0 || self.probe_timeout_secs == 0 {
            return Err(MontageError::Config(
                "Fetch and ffprobe timeouts must be greater than 0".to_string(),
            ));
        }
        if self.min_asset_bytes > self.max_asset_bytes {
            return Err(MontageError::Config(format!(
                "min_asset_bytes ({}) exceeds max_asset_bytes ({})",
                self.min_asset_bytes, self.max_asset_bytes
            )));
        }
        if self.width == 0 || self.height == 0 || self.fps == 0 {
            return Err(MontageError::Config(
                "Output width, height and fps must be greater than 0".to_string(),
            ));
        }
        EncodeOptions::for_quality(self.default_quality, self).validate()?;
        if self.silence_threshold_db > 0.0 {
            return Err(MontageError::Config(
                "Silence threshold is in dBFS and cannot be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn stream_copy_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_copy_timeout_secs)
    }

    pub fn reencode_timeout(&self) -> Duration {
        Duration::from_secs(self.reencode_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("montage").join("config.toml"))
    }
}

fn override_secs(var: &str, target: &mut u64) {
    if let Ok(value) = std::env::var(var) {
        if let Ok(secs) = value.parse() {
            *target = secs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.stream_copy_timeout(), Duration::from_secs(120));
        assert_eq!(config.reencode_timeout(), Duration::from_secs(600));
        assert_eq!(config.default_quality, Quality::Standard);
        assert_eq!(config.min_silence_ms, 300);
        assert_eq!(config.silence_threshold_db, -40.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = Config {
            reencode_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_size_limits() {
        let config = Config {
            min_asset_bytes: 10,
            max_asset_bytes: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_odd_dimensions() {
        let config = Config {
            width: 1281,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, MontageError::Config(_)));

        let config = Config {
            height: 719,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_tool_timeouts() {
        let config = Config {
            probe_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_positive_threshold() {
        let config = Config {
            silence_threshold_db: 3.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            output_dir = "/srv/videos"
            reencode_timeout_secs = 900
            default_quality = "high"
            font_file = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"
            "#,
        )
        .unwrap();

        assert_eq!(config.output_dir, PathBuf::from("/srv/videos"));
        assert_eq!(config.reencode_timeout_secs, 900);
        assert_eq!(config.default_quality, Quality::High);
        assert_eq!(config.stream_copy_timeout_secs, 120);
        assert_eq!(config.probe_timeout_secs, 30);
        assert_eq!(
            config.font_file,
            Some(PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"))
        );
    }
}
