use std::time::Duration;

use thiserror::Error;

use crate::job::JobStatus;

/// Why an asset could not be fetched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("asset is too small ({size} bytes, minimum {min})")]
    TooSmall { size: u64, min: u64 },

    #[error("asset exceeds the size limit of {max} bytes")]
    TooLarge { max: u64 },

    #[error("expected {expected} content, got '{actual}'")]
    WrongType { expected: String, actual: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("could not store asset: {0}")]
    Storage(String),
}

/// Failure of one external-tool invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("{tool} failed (exit code {code:?}): {stderr}")]
    ToolFailure {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{tool} timed out after {}s", after.as_secs())]
    Timeout { tool: String, after: Duration },
}

impl RenderError {
    pub fn tool_failure(tool: impl Into<String>, code: Option<i32>, stderr: impl Into<String>) -> Self {
        RenderError::ToolFailure {
            tool: tool.into(),
            code,
            stderr: stderr.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RenderError::Timeout { .. })
    }
}

#[derive(Error, Debug)]
pub enum MontageError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Failed to fetch {asset}: {source}")]
    Fetch {
        asset: String,
        #[source]
        source: FetchError,
    },

    #[error("Render failed: {0}")]
    Render(#[from] RenderError),

    #[error("Job {0} not found")]
    JobNotFound(String),

    #[error("Invalid job transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Audio extraction failed: {0}")]
    AudioExtraction(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MontageError {
    pub fn fetch(asset: impl Into<String>, source: FetchError) -> Self {
        MontageError::Fetch {
            asset: asset.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MontageError>;
