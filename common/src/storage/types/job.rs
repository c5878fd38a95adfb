use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    InProgress,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in_progress",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    pub fn display_label(&self) -> &'static str {
        match self {
            JobStatus::Queued => "Waiting in queue",
            JobStatus::InProgress => "Working on it",
            JobStatus::Complete => "Done",
            JobStatus::Failed => "Failed",
        }
    }

    /// Position in the lifecycle. Both terminal states share the last step.
    pub fn step(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::InProgress => 1,
            JobStatus::Complete | JobStatus::Failed => 2,
        }
    }

    /// True when moving from `self` to `next` goes forward in the lifecycle.
    pub fn advances_to(&self, next: JobStatus) -> bool {
        next.step() > self.step()
    }
}

/// The user request a job was submitted with.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct JobInput {
    pub prompt: String,
    #[serde(default)]
    pub context: Option<String>,
}

impl JobInput {
    pub fn new(prompt: impl Into<String>, context: Option<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: context.filter(|c| !c.trim().is_empty()),
        }
    }

    pub fn validate(&self, max_prompt_bytes: usize) -> Result<(), AppError> {
        if self.prompt.trim().is_empty() {
            return Err(AppError::Validation("The prompt must not be empty".into()));
        }
        let total = self.prompt.len() + self.context.as_ref().map_or(0, String::len);
        if total > max_prompt_bytes {
            return Err(AppError::Validation(format!(
                "The request is {total} bytes, the limit is {max_prompt_bytes}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum JobTransition {
    Start,
    Succeed,
    Fail,
    Abandon,
}

impl JobTransition {
    fn as_str(&self) -> &'static str {
        match self {
            JobTransition::Start => "start",
            JobTransition::Succeed => "succeed",
            JobTransition::Fail => "fail",
            JobTransition::Abandon => "abandon",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: JobLifecycleMachine,
        initial: Queued,
        states: [Queued, InProgress, Complete, Failed],
        events {
            start {
                transition: { from: Queued, to: InProgress }
            }
            succeed {
                transition: { from: InProgress, to: Complete }
            }
            fail {
                transition: { from: InProgress, to: Failed }
            }
        }
    }

    pub(super) fn queued() -> JobLifecycleMachine<(), Queued> {
        JobLifecycleMachine::new(())
    }

    pub(super) fn in_progress() -> JobLifecycleMachine<(), InProgress> {
        queued()
            .start()
            .expect("start transition from Queued should exist")
    }
}

fn invalid_transition(status: &JobStatus, event: JobTransition) -> AppError {
    AppError::Validation(format!(
        "Invalid job transition: {} -> {}",
        status.as_str(),
        event.as_str()
    ))
}

fn compute_next_status(status: &JobStatus, event: JobTransition) -> Result<JobStatus, AppError> {
    use lifecycle::*;
    match (status, event) {
        (JobStatus::Queued, JobTransition::Start) => queued()
            .start()
            .map(|_| JobStatus::InProgress)
            .map_err(|_| invalid_transition(status, event)),
        (JobStatus::InProgress, JobTransition::Succeed) => in_progress()
            .succeed()
            .map(|_| JobStatus::Complete)
            .map_err(|_| invalid_transition(status, event)),
        (JobStatus::InProgress, JobTransition::Fail | JobTransition::Abandon) => in_progress()
            .fail()
            .map(|_| JobStatus::Failed)
            .map_err(|_| invalid_transition(status, event)),
        _ => Err(invalid_transition(status, event)),
    }
}

stored_object!(Job, "job", {
    input: JobInput,
    status: JobStatus,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    submitted_at: chrono::DateTime<chrono::Utc>,
    result: Option<String>,
    error: Option<String>,
    worker_id: Option<String>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    finished_at: Option<chrono::DateTime<chrono::Utc>>
});

impl Job {
    pub fn new(input: JobInput) -> Self {
        let now = chrono::Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            input,
            status: JobStatus::Queued,
            submitted_at: now,
            result: None,
            error: None,
            worker_id: None,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[cfg(test)]
    pub(crate) async fn create_and_add_to_db(
        input: JobInput,
        db: &SurrealDbClient,
    ) -> Result<Job, AppError> {
        let job = Self::new(input);
        db.store_item(job.clone()).await?;
        Ok(job)
    }

    /// Claims ownership of a queued job for `worker_id`.
    pub async fn mark_in_progress(
        &self,
        worker_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Job, AppError> {
        let next = compute_next_status(&self.status, JobTransition::Start)?;
        debug_assert_eq!(next, JobStatus::InProgress);

        const START_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $in_progress,
                worker_id = $worker_id,
                started_at = $now,
                updated_at = $now
            WHERE status = $queued
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(START_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("in_progress", JobStatus::InProgress.as_str()))
            .bind(("queued", JobStatus::Queued.as_str()))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<Job> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.status, JobTransition::Start))
    }

    pub async fn mark_complete(
        &self,
        output: String,
        db: &SurrealDbClient,
    ) -> Result<Job, AppError> {
        let next = compute_next_status(&self.status, JobTransition::Succeed)?;
        debug_assert_eq!(next, JobStatus::Complete);

        const COMPLETE_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $complete,
                result = $output,
                error = NONE,
                finished_at = $now,
                updated_at = $now
            WHERE status = $in_progress AND worker_id = $worker_id
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(COMPLETE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("complete", JobStatus::Complete.as_str()))
            .bind(("in_progress", JobStatus::InProgress.as_str()))
            .bind(("output", output))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<Job> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.status, JobTransition::Succeed))
    }

    pub async fn mark_failed(
        &self,
        message: String,
        db: &SurrealDbClient,
    ) -> Result<Job, AppError> {
        let next = compute_next_status(&self.status, JobTransition::Fail)?;
        debug_assert_eq!(next, JobStatus::Failed);

        const FAIL_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $failed,
                result = NONE,
                error = $message,
                finished_at = $now,
                updated_at = $now
            WHERE status = $in_progress AND worker_id = $worker_id
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(FAIL_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("failed", JobStatus::Failed.as_str()))
            .bind(("in_progress", JobStatus::InProgress.as_str()))
            .bind(("message", message))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<Job> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.status, JobTransition::Fail))
    }

    /// Takes over an in-progress job whose previous owner lost its lease and
    /// records it as failed. Only succeeds while the job still belongs to the
    /// owner observed in `self`.
    pub async fn mark_abandoned(
        &self,
        worker_id: &str,
        message: String,
        db: &SurrealDbClient,
    ) -> Result<Job, AppError> {
        let next = compute_next_status(&self.status, JobTransition::Abandon)?;
        debug_assert_eq!(next, JobStatus::Failed);

        const ABANDON_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $failed,
                result = NONE,
                error = $message,
                worker_id = $worker_id,
                finished_at = $now,
                updated_at = $now
            WHERE status = $in_progress AND worker_id = $previous_worker_id
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(ABANDON_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("failed", JobStatus::Failed.as_str()))
            .bind(("in_progress", JobStatus::InProgress.as_str()))
            .bind(("message", message))
            .bind(("worker_id", worker_id.to_string()))
            .bind((
                "previous_worker_id",
                self.worker_id.clone().unwrap_or_default(),
            ))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<Job> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.status, JobTransition::Abandon))
    }

    pub async fn get_unfinished(db: &SurrealDbClient) -> Result<Vec<Job>, AppError> {
        let jobs: Vec<Job> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE status IN $active_statuses
                 ORDER BY submitted_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind((
                "active_statuses",
                vec![JobStatus::Queued.as_str(), JobStatus::InProgress.as_str()],
            ))
            .await?
            .take(0)?;

        Ok(jobs)
    }

    pub async fn get_recent(db: &SurrealDbClient, limit: usize) -> Result<Vec<Job>, AppError> {
        let query = format!(
            "SELECT * FROM type::table($table) ORDER BY submitted_at DESC LIMIT {limit}"
        );
        let jobs: Vec<Job> = db
            .query(query)
            .bind(("table", Self::table_name()))
            .await?
            .take(0)?;

        Ok(jobs)
    }
}
