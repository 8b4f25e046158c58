use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{MontageError, Result};

use super::{Job, JobId, JobResult, JobStatus};

/// A change to one job record.
#[derive(Debug, Clone)]
pub enum JobUpdate {
    /// Move to (or stay in) a non-terminal step.
    Advance {
        status: JobStatus,
        progress: u8,
        message: String,
    },
    Complete(JobResult),
    Fail(String),
}

impl JobUpdate {
    fn target(&self) -> JobStatus {
        match self {
            JobUpdate::Advance { status, .. } => *status,
            JobUpdate::Complete(_) => JobStatus::Completed,
            JobUpdate::Fail(_) => JobStatus::Failed,
        }
    }
}

/// In-memory job records keyed by id.
///
/// Records are replaced whole under the write lock, so a reader holding a
/// snapshot never sees a half-applied update.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Job) {
        self.jobs.write().insert(job.id, job);
    }

    /// A copy of the current record.
    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Apply `update` if the state machine allows it and return the new record.
    pub fn apply(&self, id: &JobId, update: JobUpdate) -> Result<Job> {
        let mut jobs = self.jobs.write();
        let current = jobs
            .get(id)
            .ok_or_else(|| MontageError::JobNotFound(id.to_string()))?;

        let to = update.target();
        if !current.status.can_transition_to(to) {
            warn!(
                "Rejected update for job {}: {} -> {}",
                id, current.status, to
            );
            return Err(MontageError::InvalidTransition {
                from: current.status,
                to,
            });
        }

        let now = Utc::now();
        let mut next = current.clone();
        next.status = to;
        next.updated_at = now;

        match update {
            JobUpdate::Advance {
                progress, message, ..
            } => {
                next.progress = next.progress.max(progress.min(100));
                next.message = message;
            }
            JobUpdate::Complete(result) => {
                next.progress = 100;
                next.message = format!("Completed: {}", result.filename);
                next.result = Some(result);
                next.completed_at = Some(now);
            }
            JobUpdate::Fail(error) => {
                next.message = "Failed".to_string();
                next.error = Some(error);
                next.completed_at = Some(now);
            }
        }

        jobs.insert(*id, next.clone());
        Ok(next)
    }

    /// Drop terminal jobs that finished more than `retention` before `now`.
    /// Jobs still in flight are never evicted.
    pub fn evict_expired(&self, retention: Duration, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let mut jobs = self.jobs.write();
        let before = jobs.len();

        jobs.retain(|_, job| match job.completed_at {
            Some(done) if job.is_terminal() => now.signed_duration_since(done) <= retention,
            _ => true,
        });

        let evicted = before - jobs.len();
        if evicted > 0 {
            debug!("Evicted {} expired jobs", evicted);
        }
        evicted
    }
}
