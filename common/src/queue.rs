//! Contract between the submission side and whatever runs jobs.
//!
//! Submission only ever calls [`JobQueue::enqueue`]; workers claim entries
//! under a lease and acknowledge them once the job reached a final state.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::debug;

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::queue_entry::QueueEntry},
};

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job_id: &str) -> Result<(), AppError>;

    async fn claim(
        &self,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<QueueEntry>, AppError>;

    async fn ack(&self, entry: &QueueEntry) -> Result<(), AppError>;

    async fn pending(&self) -> Result<usize, AppError>;
}

/// Queue backed by the `job_queue` table of the job database.
#[derive(Clone)]
pub struct SurrealJobQueue {
    db: Arc<SurrealDbClient>,
}

impl SurrealJobQueue {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobQueue for SurrealJobQueue {
    async fn enqueue(&self, job_id: &str) -> Result<(), AppError> {
        let entry = QueueEntry::new(job_id.to_string());
        self.db
            .store_item(entry)
            .await?
            .ok_or_else(|| AppError::Submission(format!("queue rejected job {job_id}")))?;
        debug!(%job_id, "job enqueued");
        Ok(())
    }

    async fn claim(
        &self,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<QueueEntry>, AppError> {
        QueueEntry::claim_next_ready(&self.db, worker_id, chrono::Utc::now(), lease).await
    }

    async fn ack(&self, entry: &QueueEntry) -> Result<(), AppError> {
        self.db.delete_item::<QueueEntry>(&entry.id).await?;
        Ok(())
    }

    async fn pending(&self) -> Result<usize, AppError> {
        QueueEntry::count_pending(&self.db).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_enqueue_claim_ack() {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("in-memory surrealdb"),
        );
        let queue = SurrealJobQueue::new(db);

        queue.enqueue("job-42").await.expect("enqueue");
        assert_eq!(queue.pending().await.expect("pending"), 1);

        let entry = queue
            .claim("worker-1", Duration::from_secs(30))
            .await
            .expect("claim")
            .expect("entry");
        assert_eq!(entry.job_id, "job-42");
        assert_eq!(queue.pending().await.expect("pending"), 0);

        queue.ack(&entry).await.expect("ack");
        let next = queue
            .claim("worker-1", Duration::from_secs(0))
            .await
            .expect("claim");
        assert!(next.is_none());
    }
}
