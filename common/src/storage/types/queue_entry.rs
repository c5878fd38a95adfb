use std::time::Duration;

use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

pub const DEFAULT_LEASE_SECS: i64 = 300;

stored_object!(QueueEntry, "job_queue", {
    job_id: String,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    scheduled_at: chrono::DateTime<chrono::Utc>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    locked_at: Option<chrono::DateTime<chrono::Utc>>,
    worker_id: Option<String>,
    lease_duration_secs: i64
});

impl QueueEntry {
    pub fn new(job_id: String) -> Self {
        let now = chrono::Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            job_id,
            scheduled_at: now,
            locked_at: None,
            worker_id: None,
            lease_duration_secs: DEFAULT_LEASE_SECS,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.lease_duration_secs.max(0)).unwrap_or_default())
    }

    /// Leases the oldest entry that is either unclaimed or whose lease ran out.
    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        now: chrono::DateTime<chrono::Utc>,
        lease_duration: Duration,
    ) -> Result<Option<QueueEntry>, AppError> {
        const CLAIM_QUERY: &str = r#"
            UPDATE (
                SELECT * FROM type::table($table)
                WHERE scheduled_at <= $now
                  AND (
                        locked_at = NONE
                        OR time::unix($now) - time::unix(locked_at) >= lease_duration_secs
                  )
                ORDER BY scheduled_at ASC, created_at ASC
                LIMIT 1
            )
            SET locked_at = $now,
                worker_id = $worker_id,
                lease_duration_secs = $lease_secs,
                updated_at = $now
            RETURN *;
        "#;

        let mut result = db
            .client
            .query(CLAIM_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker_id", worker_id.to_string()))
            .bind((
                "lease_secs",
                i64::try_from(lease_duration.as_secs()).unwrap_or(DEFAULT_LEASE_SECS),
            ))
            .await?;

        let entry: Option<QueueEntry> = result.take(0)?;
        Ok(entry)
    }

    pub async fn count_pending(db: &SurrealDbClient) -> Result<usize, AppError> {
        #[derive(serde::Deserialize)]
        struct CountRow {
            count: usize,
        }

        let rows: Vec<CountRow> = db
            .query("SELECT count() AS count FROM type::table($table) WHERE locked_at = NONE GROUP ALL")
            .bind(("table", Self::table_name()))
            .await?
            .take(0)?;

        Ok(rows.first().map_or(0, |row| row.count))
    }
}
