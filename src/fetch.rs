use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{FetchError, Result};

/// What a downloaded asset is expected to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Video,
    Image,
    Audio,
}

impl AssetKind {
    fn mime_prefix(&self) -> &'static str {
        match self {
            AssetKind::Video => "video/",
            AssetKind::Image => "image/",
            AssetKind::Audio => "audio/",
        }
    }

    fn extensions(&self) -> &'static [&'static str] {
        match self {
            AssetKind::Video => &["mp4", "mov", "mkv", "webm", "avi", "m4v"],
            AssetKind::Image => &["jpg", "jpeg", "png", "gif", "webp", "bmp"],
            AssetKind::Audio => &["mp3", "wav", "m4a", "aac", "ogg", "flac", "opus"],
        }
    }

    /// Extension used when the URL does not carry one.
    pub fn default_extension(&self) -> &'static str {
        match self {
            AssetKind::Video => "mp4",
            AssetKind::Image => "jpg",
            AssetKind::Audio => "mp3",
        }
    }

    /// Decide from the response content type, falling back to the URL
    /// extension for untyped responses.
    fn accepts(&self, content_type: Option<&str>, extension: Option<&str>) -> bool {
        let mime = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .unwrap_or_default();

        if mime.starts_with(self.mime_prefix()) {
            return true;
        }
        // mp4 audio is routinely served as video/mp4
        if *self == AssetKind::Audio && mime == "video/mp4" {
            return true;
        }
        if mime.is_empty() || mime == "application/octet-stream" || mime == "binary/octet-stream" {
            return extension.is_some_and(|ext| self.extensions().contains(&ext));
        }
        false
    }
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetKind::Video => write!(f, "video"),
            AssetKind::Image => write!(f, "image"),
            AssetKind::Audio => write!(f, "audio"),
        }
    }
}

/// A downloaded and validated file on scratch storage.
#[derive(Debug, Clone)]
pub struct LocalAsset {
    pub path: PathBuf,
    pub kind: AssetKind,
    pub size: u64,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Download `url` into `dest_dir` as `<stem>.<ext>`.
    async fn fetch(
        &self,
        url: &str,
        kind: AssetKind,
        dest_dir: &Path,
        stem: &str,
    ) -> std::result::Result<LocalAsset, FetchError>;
}

/// Fetches assets over HTTP(S) with size and type checks.
pub struct HttpFetcher {
    client: reqwest::Client,
    min_bytes: u64,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout())
            .build()?;
        Ok(Self {
            client,
            min_bytes: config.min_asset_bytes,
            max_bytes: config.max_asset_bytes,
        })
    }

    pub fn with_limits(mut self, min_bytes: u64, max_bytes: u64) -> Self {
        self.min_bytes = min_bytes;
        self.max_bytes = max_bytes;
        self
    }
}

/// Lowercased file extension of the URL path, ignoring the query string.
pub fn url_extension(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.last()?.to_string();
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        kind: AssetKind,
        dest_dir: &Path,
        stem: &str,
    ) -> std::result::Result<LocalAsset, FetchError> {
        debug!("Fetching {} from {}", kind, url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Network(format!("HTTP {status} from {url}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let extension = url_extension(url);

        if !kind.accepts(content_type.as_deref(), extension.as_deref()) {
            return Err(FetchError::WrongType {
                expected: kind.to_string(),
                actual: content_type.unwrap_or_else(|| "unknown".to_string()),
            });
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(FetchError::TooLarge { max: self.max_bytes });
            }
        }

        let ext = extension
            .filter(|ext| kind.extensions().contains(&ext.as_str()))
            .unwrap_or_else(|| kind.default_extension().to_string());
        let path = dest_dir.join(format!("{stem}.{ext}"));

        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| FetchError::Storage(format!("{}: {e}", path.display())))?;

        let mut size: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::Network(e.to_string()))?;
            size += chunk.len() as u64;
            if size > self.max_bytes {
                drop(file);
                let _ = fs::remove_file(&path).await;
                return Err(FetchError::TooLarge { max: self.max_bytes });
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::Storage(e.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|e| FetchError::Storage(e.to_string()))?;

        if size < self.min_bytes {
            let _ = fs::remove_file(&path).await;
            return Err(FetchError::TooSmall {
                size,
                min: self.min_bytes,
            });
        }

        info!("Fetched {} ({} bytes) to {}", kind, size, path.display());

        Ok(LocalAsset {
            path,
            kind,
            size,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_extension() {
        assert_eq!(
            url_extension("https://cdn.example.com/clips/intro.MP4?sig=abc"),
            Some("mp4".to_string())
        );
        assert_eq!(url_extension("https://cdn.example.com/clips/intro"), None);
        assert_eq!(url_extension("not a url"), None);
    }

    #[test]
    fn test_accepts_matching_mime() {
        assert!(AssetKind::Image.accepts(Some("image/png"), None));
        assert!(AssetKind::Video.accepts(Some("video/mp4; charset=binary"), None));
        assert!(AssetKind::Audio.accepts(Some("audio/mpeg"), Some("mp3")));
        assert!(AssetKind::Audio.accepts(Some("video/mp4"), Some("m4a")));
    }

    #[test]
    fn test_rejects_mismatched_mime() {
        assert!(!AssetKind::Image.accepts(Some("text/html"), Some("jpg")));
        assert!(!AssetKind::Video.accepts(Some("audio/mpeg"), None));
    }

    #[test]
    fn test_untyped_response_uses_extension() {
        assert!(AssetKind::Video.accepts(Some("application/octet-stream"), Some("mov")));
        assert!(AssetKind::Image.accepts(None, Some("webp")));
        assert!(!AssetKind::Image.accepts(None, Some("exe")));
        assert!(!AssetKind::Audio.accepts(None, None));
    }
}
