use std::{sync::Arc, time::Duration};

use tracing::{error, info, warn};

use crate::{
    error::AppError,
    queue::JobQueue,
    storage::{
        db::SurrealDbClient,
        types::job::{Job, JobInput},
    },
    utils::config::AppConfig,
};

/// Accepts requests, records them as queued jobs and hands them to the queue.
///
/// `submit` never waits for a worker: it returns as soon as both the job record
/// and its queue entry exist, or fails within `timeout`. A failed or timed-out
/// submission deletes the job it created so no job is left without a queue entry.
#[derive(Clone)]
pub struct SubmissionService {
    db: Arc<SurrealDbClient>,
    queue: Arc<dyn JobQueue>,
    timeout: Duration,
    max_prompt_bytes: usize,
}

impl SubmissionService {
    pub fn new(
        db: Arc<SurrealDbClient>,
        queue: Arc<dyn JobQueue>,
        timeout: Duration,
        max_prompt_bytes: usize,
    ) -> Self {
        Self {
            db,
            queue,
            timeout,
            max_prompt_bytes,
        }
    }

    pub fn from_config(
        db: Arc<SurrealDbClient>,
        queue: Arc<dyn JobQueue>,
        config: &AppConfig,
    ) -> Self {
        Self::new(
            db,
            queue,
            Duration::from_millis(config.submission_timeout_ms),
            config.max_prompt_bytes,
        )
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    #[tracing::instrument(skip_all, fields(prompt_bytes = input.prompt.len()))]
    pub async fn submit(&self, input: JobInput) -> Result<Job, AppError> {
        input.validate(self.max_prompt_bytes)?;

        let job = Job::new(input);

        match tokio::time::timeout(self.timeout, self.create_and_enqueue(&job)).await {
            Ok(Ok(())) => {
                info!(job_id = %job.id, "job accepted");
                Ok(job)
            }
            Ok(Err(err)) => {
                warn!(job_id = %job.id, error = %err, "job submission failed");
                self.compensate(&job.id).await;
                Err(AppError::Submission(
                    "The job queue is unavailable, please try again shortly".into(),
                ))
            }
            Err(_) => {
                warn!(
                    job_id = %job.id,
                    timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    "job submission timed out"
                );
                self.compensate(&job.id).await;
                Err(AppError::Submission(
                    "The job could not be accepted in time, please try again shortly".into(),
                ))
            }
        }
    }

    async fn create_and_enqueue(&self, job: &Job) -> Result<(), AppError> {
        self.db.store_item(job.clone()).await?;
        self.queue.enqueue(&job.id).await
    }

    async fn compensate(&self, job_id: &str) {
        match self.db.delete_item::<Job>(job_id).await {
            Ok(Some(_)) => warn!(%job_id, "removed job that could not be enqueued"),
            Ok(None) => {}
            Err(err) => error!(%job_id, error = %err, "failed to remove unqueued job"),
        }
    }
}
