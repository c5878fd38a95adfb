use std::{sync::Arc, time::Duration};

use common::{
    error::AppError,
    queue::JobQueue,
    storage::{
        db::SurrealDbClient,
        types::{
            job::{Job, JobStatus},
            queue_entry::QueueEntry,
        },
    },
};
use tracing::{debug, info, warn};

use crate::invoker::Invoker;

const INTERRUPTED_MESSAGE: &str = "Processing was interrupted before it finished";

/// Time kept back from a lease so the owning worker records its outcome
/// before the entry becomes claimable again. Lease expiry is checked in whole
/// seconds, hence the extra second.
fn lease_margin(lease: Duration) -> Duration {
    Duration::from_secs(1) + lease / 10
}

/// How long the invoker may run for an entry claimed at `locked_at`.
fn invoke_budget(entry: &QueueEntry, now: chrono::DateTime<chrono::Utc>) -> Duration {
    let lease = entry.lease_duration();
    let Some(locked_at) = entry.locked_at else {
        return lease.saturating_sub(lease_margin(lease));
    };
    let elapsed = (now - locked_at).to_std().unwrap_or(Duration::ZERO);
    lease.saturating_sub(lease_margin(lease) + elapsed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed,
    Failed,
    /// A previous worker's lease ran out mid-job; the job was recorded as failed.
    Abandoned,
    /// Nothing to do: the job is gone or already finished.
    Skipped,
}

/// Drives one job from `queued` to a terminal status. The only writer of a job
/// after submission.
pub struct JobProcessor {
    db: Arc<SurrealDbClient>,
    invoker: Arc<dyn Invoker>,
    worker_id: String,
}

impl JobProcessor {
    pub fn new(db: Arc<SurrealDbClient>, invoker: Arc<dyn Invoker>, worker_id: String) -> Self {
        Self {
            db,
            invoker,
            worker_id,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claims one queue entry, processes it and acknowledges it. Returns `None`
    /// when the queue had nothing ready. Entries whose processing errored are
    /// left unacknowledged so they become claimable again once the lease ends.
    pub async fn process_next(
        &self,
        queue: &dyn JobQueue,
        lease: Duration,
    ) -> Result<Option<ProcessOutcome>, AppError> {
        let Some(entry) = queue.claim(&self.worker_id, lease).await? else {
            return Ok(None);
        };

        info!(
            worker_id = %self.worker_id,
            job_id = %entry.job_id,
            "claimed queue entry"
        );

        let outcome = self.process(&entry).await?;
        queue.ack(&entry).await?;

        Ok(Some(outcome))
    }

    #[tracing::instrument(
        skip_all,
        fields(job_id = %entry.job_id, worker_id = %self.worker_id)
    )]
    pub async fn process(&self, entry: &QueueEntry) -> Result<ProcessOutcome, AppError> {
        let Some(job) = self.db.get_item::<Job>(&entry.job_id).await? else {
            warn!("queued job no longer exists");
            return Ok(ProcessOutcome::Skipped);
        };

        match job.status {
            JobStatus::Queued => self.run(job, entry).await,
            JobStatus::InProgress => {
                job.mark_abandoned(&self.worker_id, INTERRUPTED_MESSAGE.to_string(), &self.db)
                    .await?;
                warn!(
                    previous_worker = job.worker_id.as_deref().unwrap_or("unknown-worker"),
                    "job was left in progress by another worker; marked failed"
                );
                Ok(ProcessOutcome::Abandoned)
            }
            JobStatus::Complete | JobStatus::Failed => {
                debug!(status = job.status.as_str(), "job already finished");
                Ok(ProcessOutcome::Skipped)
            }
        }
    }

    async fn run(&self, job: Job, entry: &QueueEntry) -> Result<ProcessOutcome, AppError> {
        let started = job.mark_in_progress(&self.worker_id, &self.db).await?;
        let budget = invoke_budget(entry, chrono::Utc::now());

        let invoked = tokio::time::timeout(budget, self.invoker.invoke(&started.input)).await;
        let Ok(invoked) = invoked else {
            let reason = format!(
                "Processing did not finish within {}ms and was stopped",
                budget.as_millis()
            );
            started.mark_failed(reason, &self.db).await?;
            warn!(budget_ms = %budget.as_millis(), "job timed out before its lease ran out");
            return Ok(ProcessOutcome::Failed);
        };

        match invoked {
            Ok(output) => {
                let output_bytes = output.len();
                started.mark_complete(output, &self.db).await?;
                info!(output_bytes, "job completed");
                Ok(ProcessOutcome::Completed)
            }
            Err(err) => {
                let reason = err.to_string();
                started.mark_failed(reason.clone(), &self.db).await?;
                warn!(error = %reason, "job failed");
                Ok(ProcessOutcome::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests;
