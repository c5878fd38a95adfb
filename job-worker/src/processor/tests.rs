use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    notifier::{JobSnapshot, StatusNotifier},
    queue::{JobQueue, SurrealJobQueue},
    storage::{
        db::SurrealDbClient,
        types::{
            job::{Job, JobInput, JobStatus},
            queue_entry::QueueEntry,
        },
    },
    submission::SubmissionService,
};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::time::Duration;
use uuid::Uuid;

use super::{invoke_budget, JobProcessor, ProcessOutcome};
use crate::invoker::Invoker;

struct MockInvoker {
    response: Result<String, String>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
}

impl MockInvoker {
    fn answering(text: &str) -> Self {
        Self {
            response: Ok(text.to_string()),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn failing(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl Invoker for MockInvoker {
    async fn invoke(&self, input: &JobInput) -> Result<String, AppError> {
        self.calls.lock().await.push(input.prompt.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.response.clone().map_err(AppError::Processing)
    }
}

struct Harness {
    db: Arc<SurrealDbClient>,
    queue: Arc<SurrealJobQueue>,
    submission: SubmissionService,
}

async fn harness() -> Harness {
    let db = Arc::new(
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb"),
    );
    let queue = Arc::new(SurrealJobQueue::new(db.clone()));
    let submission = SubmissionService::new(db.clone(), queue.clone(), Duration::from_secs(5), 4096);
    Harness {
        db,
        queue,
        submission,
    }
}

async fn stored(db: &SurrealDbClient, id: &str) -> Job {
    db.get_item::<Job>(id)
        .await
        .expect("fetch")
        .expect("job exists")
}

#[tokio::test]
async fn test_process_next_completes_job_and_acks() {
    let h = harness().await;
    let invoker = Arc::new(MockInvoker::answering("a tidy summary"));
    let processor = JobProcessor::new(h.db.clone(), invoker.clone(), "worker-1".into());

    let job = h
        .submission
        .submit(JobInput::new("summarise", None))
        .await
        .expect("submit");

    let outcome = processor
        .process_next(h.queue.as_ref(), Duration::from_secs(60))
        .await
        .expect("process");
    assert_eq!(outcome, Some(ProcessOutcome::Completed));

    let done = stored(&h.db, &job.id).await;
    assert_eq!(done.status, JobStatus::Complete);
    assert_eq!(done.result.as_deref(), Some("a tidy summary"));
    assert_eq!(done.worker_id.as_deref(), Some("worker-1"));
    assert_eq!(invoker.call_count().await, 1);

    let idle = processor
        .process_next(h.queue.as_ref(), Duration::from_secs(0))
        .await
        .expect("process");
    assert_eq!(idle, None);
}

#[tokio::test]
async fn test_invoker_failure_is_recorded_not_retried() {
    let h = harness().await;
    let invoker = Arc::new(MockInvoker::failing("model overloaded"));
    let processor = JobProcessor::new(h.db.clone(), invoker.clone(), "worker-1".into());

    let job = h
        .submission
        .submit(JobInput::new("summarise", None))
        .await
        .expect("submit");

    let outcome = processor
        .process_next(h.queue.as_ref(), Duration::from_secs(60))
        .await
        .expect("process");
    assert_eq!(outcome, Some(ProcessOutcome::Failed));

    let failed = stored(&h.db, &job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed
        .error
        .as_deref()
        .is_some_and(|e| e.contains("model overloaded")));
    assert!(failed.result.is_none());

    assert_eq!(h.queue.pending().await.expect("pending"), 0);
    let again = processor
        .process_next(h.queue.as_ref(), Duration::from_secs(0))
        .await
        .expect("process");
    assert_eq!(again, None);
    assert_eq!(invoker.call_count().await, 1);
}

#[tokio::test]
async fn test_entry_for_missing_job_is_skipped() {
    let h = harness().await;
    let processor = JobProcessor::new(
        h.db.clone(),
        Arc::new(MockInvoker::answering("unused")),
        "worker-1".into(),
    );

    h.queue.enqueue("no-such-job").await.expect("enqueue");

    let outcome = processor
        .process_next(h.queue.as_ref(), Duration::from_secs(60))
        .await
        .expect("process");
    assert_eq!(outcome, Some(ProcessOutcome::Skipped));
    assert_eq!(h.queue.pending().await.expect("pending"), 0);
}

#[tokio::test]
async fn test_job_left_in_progress_is_marked_failed() {
    let h = harness().await;
    let invoker = Arc::new(MockInvoker::answering("unused"));
    let processor = JobProcessor::new(h.db.clone(), invoker.clone(), "worker-2".into());

    let job = h
        .submission
        .submit(JobInput::new("summarise", None))
        .await
        .expect("submit");
    // A previous worker started the job and then went away.
    job.mark_in_progress("worker-1", &h.db).await.expect("start");

    let entry = h
        .queue
        .claim("worker-2", Duration::from_secs(60))
        .await
        .expect("claim")
        .expect("entry");
    let outcome = processor.process(&entry).await.expect("process");
    assert_eq!(outcome, ProcessOutcome::Abandoned);

    let failed = stored(&h.db, &job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.worker_id.as_deref(), Some("worker-2"));
    assert_eq!(invoker.call_count().await, 0);
}

#[tokio::test]
async fn test_finished_job_is_not_rerun() {
    let h = harness().await;
    let invoker = Arc::new(MockInvoker::answering("second answer"));
    let processor = JobProcessor::new(h.db.clone(), invoker.clone(), "worker-1".into());

    let job = h
        .submission
        .submit(JobInput::new("summarise", None))
        .await
        .expect("submit");
    let entry = h
        .queue
        .claim("worker-1", Duration::from_secs(60))
        .await
        .expect("claim")
        .expect("entry");

    processor.process(&entry).await.expect("first run");
    let outcome = processor.process(&entry).await.expect("second run");
    assert_eq!(outcome, ProcessOutcome::Skipped);
    assert_eq!(invoker.call_count().await, 1);
    assert_eq!(stored(&h.db, &job.id).await.status, JobStatus::Complete);
}

#[tokio::test]
async fn test_submission_returns_before_slow_worker_finishes() {
    let h = harness().await;
    let invoker = Arc::new(MockInvoker::answering("slow answer").with_delay(Duration::from_millis(300)));
    let processor = Arc::new(JobProcessor::new(h.db.clone(), invoker, "worker-1".into()));
    let notifier = StatusNotifier::new(h.db.clone(), Duration::from_millis(10), 3);

    let job = h
        .submission
        .submit(JobInput::new("what is a lease?", None))
        .await
        .expect("submit");
    assert_eq!(
        notifier.snapshot(&job.id).await.expect("snapshot").status,
        JobStatus::Queued
    );

    // Subscriber opened before the worker starts.
    let updates = notifier.subscribe(&job.id).await.expect("subscribe");

    let queue = h.queue.clone();
    let worker_processor = Arc::clone(&processor);
    let worker = tokio::spawn(async move {
        worker_processor
            .process_next(queue.as_ref(), Duration::from_secs(60))
            .await
    });

    let events: Vec<JobSnapshot> =
        tokio::time::timeout(Duration::from_secs(5), updates.collect::<Vec<_>>())
            .await
            .expect("stream ends")
            .into_iter()
            .map(|e| e.expect("ok event"))
            .collect();

    assert_eq!(
        worker.await.expect("join").expect("process"),
        Some(ProcessOutcome::Completed)
    );

    let in_progress = events
        .iter()
        .filter(|e| e.status == JobStatus::InProgress)
        .count();
    let complete: Vec<&JobSnapshot> = events
        .iter()
        .filter(|e| e.status == JobStatus::Complete)
        .collect();
    assert!(in_progress <= 1);
    assert_eq!(complete.len(), 1);
    assert_eq!(
        complete.first().and_then(|e| e.result.as_deref()),
        Some("slow answer")
    );

    let pulled = notifier.snapshot(&job.id).await.expect("snapshot");
    assert_eq!(pulled.status, JobStatus::Complete);
    assert_eq!(pulled.result.as_deref(), Some("slow answer"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invocation_outliving_lease_is_stopped_by_its_owner() {
    let h = harness().await;
    let slow = Arc::new(MockInvoker::answering("too late").with_delay(Duration::from_secs(5)));
    let owner = Arc::new(JobProcessor::new(h.db.clone(), slow.clone(), "worker-a".into()));
    let other_invoker = Arc::new(MockInvoker::answering("second opinion"));
    let other = JobProcessor::new(h.db.clone(), other_invoker.clone(), "worker-b".into());
    let lease = Duration::from_secs(2);

    let job = h
        .submission
        .submit(JobInput::new("summarise", None))
        .await
        .expect("submit");

    let queue = h.queue.clone();
    let owner_task = Arc::clone(&owner);
    let first = tokio::spawn(async move { owner_task.process_next(queue.as_ref(), lease).await });

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let second = other
        .process_next(h.queue.as_ref(), lease)
        .await
        .expect("second worker");
    assert_eq!(second, None);

    let first = tokio::time::timeout(Duration::from_secs(3), first)
        .await
        .expect("owner returns before the invoker would")
        .expect("join")
        .expect("owner");
    assert_eq!(first, Some(ProcessOutcome::Failed));

    let failed = stored(&h.db, &job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.worker_id.as_deref(), Some("worker-a"));
    assert!(failed
        .error
        .as_deref()
        .is_some_and(|e| e.contains("did not finish within")));
    assert!(failed.result.is_none());
    assert_eq!(other_invoker.call_count().await, 0);
    assert_eq!(h.queue.pending().await.expect("pending"), 0);
}

#[test]
fn test_invoke_budget_stays_inside_lease() {
    let mut entry = QueueEntry::new("job-1".into());
    entry.lease_duration_secs = 300;
    let now = chrono::Utc::now();
    entry.locked_at = Some(now);
    assert_eq!(invoke_budget(&entry, now), Duration::from_secs(269));

    let later = now + chrono::Duration::seconds(100);
    assert_eq!(invoke_budget(&entry, later), Duration::from_secs(169));

    entry.lease_duration_secs = 1;
    assert_eq!(invoke_budget(&entry, now), Duration::ZERO);
}
