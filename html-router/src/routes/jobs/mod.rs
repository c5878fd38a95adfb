pub mod adapter;
pub mod handlers;

use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};
use handlers::{job_events, show_job, show_job_card, submit_job};

use crate::html_state::HtmlState;

pub fn router<S>(max_body_bytes: usize) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    HtmlState: FromRef<S>,
{
    Router::new()
        .route(
            "/jobs",
            post(submit_job).layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .route("/jobs/{job_id}", get(show_job))
        .route("/jobs/{job_id}/card", get(show_job_card))
        .route("/jobs/{job_id}/events", get(job_events))
}
