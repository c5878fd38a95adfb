use std::{pin::Pin, sync::Arc, time::Duration};

use futures::Stream;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::job::{Job, JobStatus},
    },
    utils::config::AppConfig,
};

/// What readers get to see of a job.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    pub status_label: &'static str,
    pub prompt: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
    pub terminal: bool,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            status: job.status,
            status_label: job.status.display_label(),
            prompt: job.input.prompt.clone(),
            result: job.result.clone().filter(|_| job.status == JobStatus::Complete),
            error: job.error.clone().filter(|_| job.status == JobStatus::Failed),
            submitted_at: job.submitted_at,
            terminal: job.status.is_terminal(),
        }
    }
}

pub type JobUpdates = Pin<Box<dyn Stream<Item = Result<JobSnapshot, AppError>> + Send>>;

/// Read-only view over job status, either as a one-off snapshot (pull) or as
/// a stream of status changes for a single job (push).
#[derive(Clone)]
pub struct StatusNotifier {
    db: Arc<SurrealDbClient>,
    poll_interval: Duration,
    max_consecutive_errors: u32,
}

impl StatusNotifier {
    pub fn new(
        db: Arc<SurrealDbClient>,
        poll_interval: Duration,
        max_consecutive_errors: u32,
    ) -> Self {
        Self {
            db,
            poll_interval,
            max_consecutive_errors: max_consecutive_errors.max(1),
        }
    }

    pub fn from_config(db: Arc<SurrealDbClient>, config: &AppConfig) -> Self {
        Self::new(
            db,
            Duration::from_millis(config.poll_interval_ms),
            config.max_consecutive_errors,
        )
    }

    pub async fn snapshot(&self, job_id: &str) -> Result<JobSnapshot, AppError> {
        let job = self
            .db
            .get_item::<Job>(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;

        Ok(JobSnapshot::from(&job))
    }

    /// Opens an update stream for `job_id`.
    ///
    /// The stream yields one snapshot per forward status change and ends right
    /// after the terminal snapshot. A job that already left `queued` is reported
    /// immediately, so late subscribers to a finished job get the terminal
    /// snapshot at once. Repeated read failures, or the job vanishing, end the
    /// stream with [`AppError::Channel`].
    pub async fn subscribe(&self, job_id: &str) -> Result<JobUpdates, AppError> {
        let initial = self.snapshot(job_id).await?;

        let db = Arc::clone(&self.db);
        let poll_interval = self.poll_interval;
        let max_errors = self.max_consecutive_errors;
        let job_id = job_id.to_string();

        let updates = async_stream::stream! {
            let mut last_status = initial.status;
            let mut finished = false;

            if initial.status != JobStatus::Queued {
                finished = initial.terminal;
                yield Ok(initial);
            }

            let mut consecutive_errors: u32 = 0;

            while !finished {
                sleep(poll_interval).await;

                match db.get_item::<Job>(&job_id).await {
                    Ok(Some(job)) => {
                        consecutive_errors = 0;
                        if !last_status.advances_to(job.status) {
                            continue;
                        }
                        debug!(%job_id, status = job.status.as_str(), "job status changed");
                        last_status = job.status;
                        let snapshot = JobSnapshot::from(&job);
                        finished = snapshot.terminal;
                        yield Ok(snapshot);
                    }
                    Ok(None) => {
                        warn!(%job_id, "job disappeared while streaming updates");
                        finished = true;
                        yield Err(AppError::Channel(format!("job {job_id} is no longer available")));
                    }
                    Err(err) => {
                        consecutive_errors = consecutive_errors.saturating_add(1);
                        warn!(%job_id, attempt = consecutive_errors, error = %err, "failed to read job status");
                        if consecutive_errors >= max_errors {
                            finished = true;
                            yield Err(AppError::Channel(format!(
                                "giving up on job {job_id} after {consecutive_errors} failed reads"
                            )));
                        }
                    }
                }
            }
        };

        Ok(Box::pin(updates))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use uuid::Uuid;

    use super::*;
    use crate::storage::types::job::JobInput;

    async fn setup() -> (Arc<SurrealDbClient>, StatusNotifier) {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("in-memory surrealdb"),
        );
        let notifier = StatusNotifier::new(db.clone(), Duration::from_millis(10), 3);
        (db, notifier)
    }

    async fn collect(updates: JobUpdates) -> Vec<Result<JobSnapshot, AppError>> {
        tokio::time::timeout(Duration::from_secs(5), updates.collect::<Vec<_>>())
            .await
            .expect("stream should end")
    }

    #[tokio::test]
    async fn test_snapshot_is_idempotent() {
        let (db, notifier) = setup().await;
        let job = Job::create_and_add_to_db(JobInput::new("hello", None), &db)
            .await
            .expect("store");

        let first = notifier.snapshot(&job.id).await.expect("snapshot");
        let second = notifier.snapshot(&job.id).await.expect("snapshot");
        assert_eq!(first, second);
        assert_eq!(first.status, JobStatus::Queued);
        assert!(!first.terminal);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let (_db, notifier) = setup().await;

        assert!(matches!(
            notifier.snapshot("missing").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            notifier.subscribe("missing").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_subscribe_after_terminal_yields_terminal_and_closes() {
        let (db, notifier) = setup().await;
        let job = Job::create_and_add_to_db(JobInput::new("hello", None), &db)
            .await
            .expect("store");
        let started = job.mark_in_progress("w", &db).await.expect("start");
        started.mark_complete("world".into(), &db).await.expect("complete");

        let events = collect(notifier.subscribe(&job.id).await.expect("subscribe")).await;

        assert_eq!(events.len(), 1);
        let snapshot = events
            .into_iter()
            .next()
            .expect("one event")
            .expect("ok event");
        assert_eq!(snapshot.status, JobStatus::Complete);
        assert_eq!(snapshot.result.as_deref(), Some("world"));
        assert!(snapshot.terminal);
    }

    #[tokio::test]
    async fn test_subscriber_sees_progress_then_single_terminal_event() {
        let (db, notifier) = setup().await;
        let job = Job::create_and_add_to_db(JobInput::new("hello", None), &db)
            .await
            .expect("store");

        let updates = notifier.subscribe(&job.id).await.expect("subscribe");

        let worker_db = db.clone();
        let worker_job = job.clone();
        let worker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let started = worker_job
                .mark_in_progress("w", &worker_db)
                .await
                .expect("start");
            tokio::time::sleep(Duration::from_millis(50)).await;
            started
                .mark_complete("the answer".into(), &worker_db)
                .await
                .expect("complete");
        });

        let events: Vec<JobSnapshot> = collect(updates)
            .await
            .into_iter()
            .map(|e| e.expect("ok event"))
            .collect();
        worker.await.expect("worker");

        let statuses: Vec<JobStatus> = events.iter().map(|e| e.status).collect();
        let in_progress = statuses.iter().filter(|s| **s == JobStatus::InProgress).count();
        let complete = statuses.iter().filter(|s| **s == JobStatus::Complete).count();
        assert!(in_progress <= 1);
        assert_eq!(complete, 1);
        assert!(!statuses.contains(&JobStatus::Queued));
        assert_eq!(
            events.last().and_then(|e| e.result.as_deref()),
            Some("the answer")
        );
    }

    #[tokio::test]
    async fn test_regressed_observation_is_ignored() {
        let (db, notifier) = setup().await;
        let job = Job::create_and_add_to_db(JobInput::new("hello", None), &db)
            .await
            .expect("store");
        let started = job.mark_in_progress("w", &db).await.expect("start");

        let updates = notifier.subscribe(&job.id).await.expect("subscribe");

        let writer_db = db.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            // Out-of-band write that moves the record backwards.
            writer_db
                .query("UPDATE type::thing('job', $id) SET status = 'queued'")
                .bind(("id", started.id.clone()))
                .await
                .expect("raw update");
            tokio::time::sleep(Duration::from_millis(40)).await;
            writer_db
                .query("UPDATE type::thing('job', $id) SET status = 'failed', error = 'boom'")
                .bind(("id", started.id.clone()))
                .await
                .expect("raw update");
        });

        let statuses: Vec<JobStatus> = collect(updates)
            .await
            .into_iter()
            .map(|e| e.expect("ok event").status)
            .collect();
        writer.await.expect("writer");

        assert_eq!(statuses, vec![JobStatus::InProgress, JobStatus::Failed]);
    }

    #[tokio::test]
    async fn test_streams_are_isolated_per_job() {
        let (db, notifier) = setup().await;
        let watched = Job::create_and_add_to_db(JobInput::new("a", None), &db)
            .await
            .expect("store");
        let other = Job::create_and_add_to_db(JobInput::new("b", None), &db)
            .await
            .expect("store");

        let updates = notifier.subscribe(&watched.id).await.expect("subscribe");

        let other_started = other.mark_in_progress("w", &db).await.expect("start");
        other_started
            .mark_complete("b done".into(), &db)
            .await
            .expect("complete");
        tokio::time::sleep(Duration::from_millis(50)).await;
        let watched_started = watched.mark_in_progress("w", &db).await.expect("start");
        watched_started
            .mark_failed("a failed".into(), &db)
            .await
            .expect("fail");

        let events: Vec<JobSnapshot> = collect(updates)
            .await
            .into_iter()
            .map(|e| e.expect("ok event"))
            .collect();

        assert!(events.iter().all(|e| e.id == watched.id));
        assert_eq!(
            events.last().map(|e| (e.status, e.error.clone())),
            Some((JobStatus::Failed, Some("a failed".to_string())))
        );
    }

    #[tokio::test]
    async fn test_vanished_job_ends_with_channel_error() {
        let (db, notifier) = setup().await;
        let job = Job::create_and_add_to_db(JobInput::new("hello", None), &db)
            .await
            .expect("store");

        let updates = notifier.subscribe(&job.id).await.expect("subscribe");
        db.delete_item::<Job>(&job.id).await.expect("delete");

        let events = collect(updates).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events.first(), Some(Err(AppError::Channel(_)))));
    }

    #[tokio::test]
    async fn test_dropping_subscription_leaves_job_untouched() {
        let (db, notifier) = setup().await;
        let job = Job::create_and_add_to_db(JobInput::new("hello", None), &db)
            .await
            .expect("store");

        let updates = notifier.subscribe(&job.id).await.expect("subscribe");
        drop(updates);

        let stored = db
            .get_item::<Job>(&job.id)
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(stored.status, JobStatus::Queued);
        assert!(stored.worker_id.is_none());
    }
}
