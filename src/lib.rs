pub mod audio;
pub mod config;
pub mod error;
pub mod fetch;
pub mod job;
pub mod pipeline;
pub mod render;
pub mod request;

pub use config::Config;
pub use error::{FetchError, MontageError, RenderError, Result};
pub use fetch::{AssetFetcher, AssetKind, HttpFetcher, LocalAsset};
pub use job::{Job, JobId, JobOrchestrator, JobResult, JobStatus};
pub use render::{FfmpegRenderer, RenderOutcome, Renderer, Strategy};
pub use request::{JobRequest, Overlay, SoundEffect};
