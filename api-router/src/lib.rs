use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};
use routes::{
    jobs::{get_job, job_events, submit_job},
    probes::{live, queue_length, ready},
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Probes for k8s/systemd
    let probes = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/queue-length", get(queue_length));

    let jobs = Router::new()
        .route(
            "/jobs",
            post(submit_job).layer(DefaultBodyLimit::max(
                app_state.config.max_prompt_bytes.saturating_add(4 * 1024),
            )),
        )
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/{job_id}/events", get(job_events));

    probes.merge(jobs)
}
