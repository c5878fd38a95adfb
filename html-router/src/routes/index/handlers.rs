use axum::{extract::State, response::IntoResponse};
use common::{error::AppError, notifier::JobSnapshot, storage::types::job::Job};
use futures::try_join;
use serde::Serialize;

use crate::{
    html_state::HtmlState,
    middlewares::response_middleware::{HtmlError, TemplateResponse},
    routes::jobs::handlers::JobView,
};

const RECENT_JOBS_LIMIT: usize = 10;

/// Values to pre-fill the submission form with, plus the reason it was rejected.
#[derive(Debug, Default, Serialize)]
pub struct SubmitFormState {
    pub prompt: String,
    pub context: String,
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct IndexPageData {
    form: SubmitFormState,
    push_enabled: bool,
    max_prompt_bytes: usize,
    unfinished_jobs: Vec<JobView>,
    recent_jobs: Vec<JobView>,
}

fn to_views(jobs: &[Job]) -> Vec<JobView> {
    jobs.iter()
        .map(|job| JobView::from(JobSnapshot::from(job)))
        .collect()
}

impl IndexPageData {
    pub fn form_only(state: &HtmlState, form: SubmitFormState) -> Self {
        Self {
            form,
            push_enabled: state.config.push_enabled,
            max_prompt_bytes: state.config.max_prompt_bytes,
            unfinished_jobs: Vec::new(),
            recent_jobs: Vec::new(),
        }
    }

    pub async fn load(state: &HtmlState, form: SubmitFormState) -> Result<Self, AppError> {
        let (unfinished, recent) = try_join!(
            Job::get_unfinished(&state.db),
            Job::get_recent(&state.db, RECENT_JOBS_LIMIT)
        )?;

        Ok(Self {
            unfinished_jobs: to_views(&unfinished),
            recent_jobs: to_views(&recent),
            ..Self::form_only(state, form)
        })
    }
}

pub async fn index_handler(State(state): State<HtmlState>) -> Result<impl IntoResponse, HtmlError> {
    let data = IndexPageData::load(&state, SubmitFormState::default()).await?;

    Ok(TemplateResponse::new_template("index.html", data))
}
