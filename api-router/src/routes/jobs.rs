use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header::LOCATION, StatusCode},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Sse,
    },
    Json,
};
use common::{notifier::JobSnapshot, storage::types::job::JobInput};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub prompt: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub status: &'static str,
    pub status_url: String,
    pub events_url: String,
}

pub fn status_url(job_id: &str) -> String {
    format!("/api/v1/jobs/{job_id}")
}

pub fn events_url(job_id: &str) -> String {
    format!("/api/v1/jobs/{job_id}/events")
}

pub async fn submit_job(
    State(state): State<ApiState>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!(
        prompt_bytes = request.prompt.len(),
        has_context = request.context.is_some(),
        "Received job submission"
    );

    let job = state
        .submission
        .submit(JobInput::new(request.prompt, request.context))
        .await?;

    let body = SubmitJobResponse {
        status: job.status.as_str(),
        status_url: status_url(&job.id),
        events_url: events_url(&job.id),
        job_id: job.id,
    };

    Ok((
        StatusCode::ACCEPTED,
        [(LOCATION, body.status_url.clone())],
        Json(body),
    ))
}

pub async fn get_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let snapshot = state.notifier.snapshot(&job_id).await?;

    Ok(Json(snapshot))
}

/// Streams status changes of one job as server-sent events named after the
/// status. The stream closes after the terminal event. If updates can no
/// longer be delivered, a single `fallback` event points the client back to
/// the pull endpoint.
pub async fn job_events(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let updates = state.notifier.subscribe(&job_id).await?;
    let pull_url = status_url(&job_id);

    let events = updates.map(move |update| match update {
        Ok(snapshot) => Event::default()
            .event(snapshot.status.as_str())
            .json_data(&snapshot),
        Err(err) => {
            warn!(%job_id, error = %err, "push delivery failed, pointing client to pull");
            Event::default().event("fallback").json_data(json!({
                "job_id": job_id,
                "status_url": pull_url,
            }))
        }
    });

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive-ping"),
    ))
}
