use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::error::Result;
use crate::fetch::AssetFetcher;
use crate::pipeline;
use crate::render::Renderer;
use crate::request::JobRequest;

use super::{Job, JobId, JobStatus, JobTable, JobUpdate};

/// Recorded when a worker panics instead of returning.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error while processing job";

/// Handle given to a job's worker for recording non-terminal steps.
///
/// The terminal transition is reserved for the supervisor, so the worker has
/// no way to complete or fail its own job.
#[derive(Clone)]
pub struct ProgressReporter {
    table: Arc<JobTable>,
    id: JobId,
}

impl ProgressReporter {
    pub fn new(table: Arc<JobTable>, id: JobId) -> Self {
        Self { table, id }
    }

    pub fn job_id(&self) -> JobId {
        self.id
    }

    pub fn downloading(&self, progress: u8, message: impl Into<String>) {
        self.advance(JobStatus::Downloading, progress, message.into());
    }

    pub fn processing(&self, progress: u8, message: impl Into<String>) {
        self.advance(JobStatus::Processing, progress, message.into());
    }

    fn advance(&self, status: JobStatus, progress: u8, message: String) {
        // Rejections are logged by the table.
        let _ = self.table.apply(
            &self.id,
            JobUpdate::Advance {
                status,
                progress,
                message,
            },
        );
    }
}

/// Accepts composition jobs and runs each one in its own supervised task.
pub struct JobOrchestrator {
    table: Arc<JobTable>,
    fetcher: Arc<dyn AssetFetcher>,
    renderer: Arc<dyn Renderer>,
    config: Arc<Config>,
}

impl JobOrchestrator {
    pub fn new(fetcher: Arc<dyn AssetFetcher>, renderer: Arc<dyn Renderer>, config: Config) -> Self {
        Self {
            table: Arc::new(JobTable::new()),
            fetcher,
            renderer,
            config: Arc::new(config),
        }
    }

    /// Validate `request`, record it as queued and start working on it.
    ///
    /// Returns as soon as the job is in the table. Must be called from
    /// within a Tokio runtime.
    pub fn submit(&self, request: JobRequest) -> Result<JobId> {
        request.validate()?;

        self.table
            .evict_expired(self.config.job_retention(), Utc::now());

        let id = JobId::new();
        self.table.insert(Job::new(id));
        info!(
            "Accepted job {} ({} assets)",
            id,
            request.asset_count()
        );

        let span = info_span!("job", job_id = %id);
        tokio::spawn(
            supervise(
                self.table.clone(),
                id,
                request,
                self.fetcher.clone(),
                self.renderer.clone(),
                self.config.clone(),
            )
            .instrument(span),
        );

        Ok(id)
    }

    pub fn status(&self, id: &JobId) -> Option<Job> {
        self.table.get(id)
    }

    /// Poll until the job reaches a terminal state. `None` if it is unknown.
    pub async fn wait(&self, id: &JobId, poll_interval: Duration) -> Option<Job> {
        loop {
            let job = self.table.get(id)?;
            if job.is_terminal() {
                return Some(job);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub fn job_count(&self) -> usize {
        self.table.len()
    }
}

async fn supervise(
    table: Arc<JobTable>,
    id: JobId,
    request: JobRequest,
    fetcher: Arc<dyn AssetFetcher>,
    renderer: Arc<dyn Renderer>,
    config: Arc<Config>,
) {
    let reporter = ProgressReporter::new(table.clone(), id);
    let worker = tokio::spawn(
        async move {
            pipeline::compose(
                &request,
                &config,
                fetcher.as_ref(),
                renderer.as_ref(),
                &reporter,
            )
            .await
        }
        .in_current_span(),
    );

    let update = match worker.await {
        Ok(Ok(result)) => {
            info!("Job completed: {}", result.output_path.display());
            JobUpdate::Complete(result)
        }
        Ok(Err(e)) => {
            warn!("Job failed: {}", e);
            JobUpdate::Fail(e.to_string())
        }
        Err(e) => {
            error!("Job worker aborted: {}", e);
            JobUpdate::Fail(INTERNAL_ERROR_MESSAGE.to_string())
        }
    };

    if let Err(e) = table.apply(&id, update) {
        error!("Could not record final state: {}", e);
    }
}
