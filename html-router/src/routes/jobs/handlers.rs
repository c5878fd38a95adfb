use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Sse,
    },
    Form,
};
use axum_htmx::HxRequest;
use common::{
    error::AppError,
    notifier::JobSnapshot,
    storage::types::job::JobInput,
    utils::template_engine::TemplateEngine,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::adapter::{
    card_url, choose_delivery, events_url, status_page_url, ClientCapability, Delivery,
    DeliveryPreference,
};
use crate::{
    html_state::HtmlState,
    middlewares::response_middleware::{HtmlError, TemplateResponse},
    routes::index::handlers::{IndexPageData, SubmitFormState},
};

/// A job as the templates see it: the snapshot plus the links to follow it.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub snapshot: JobSnapshot,
    pub submitted: String,
    pub status_url: String,
    pub card_url: String,
    pub events_url: String,
}

impl From<JobSnapshot> for JobView {
    fn from(snapshot: JobSnapshot) -> Self {
        Self {
            submitted: snapshot
                .submitted_at
                .format("%Y-%m-%d %H:%M:%S UTC")
                .to_string(),
            status_url: status_page_url(&snapshot.id),
            card_url: card_url(&snapshot.id),
            events_url: events_url(&snapshot.id),
            snapshot,
        }
    }
}

#[derive(Serialize)]
struct CardData {
    job: JobView,
    poll: bool,
    refresh_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct SubmitJobForm {
    pub prompt: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub delivery: Option<DeliveryPreference>,
}

pub async fn submit_job(
    State(state): State<HtmlState>,
    HxRequest(is_htmx): HxRequest,
    Form(form): Form<SubmitJobForm>,
) -> Result<impl IntoResponse, HtmlError> {
    info!(
        prompt_bytes = form.prompt.len(),
        is_htmx,
        delivery = ?form.delivery,
        "Received job submission form"
    );

    let input = JobInput::new(form.prompt.clone(), form.context.clone());
    let job = match state.submission.submit(input).await {
        Ok(job) => job,
        Err(AppError::Validation(message)) => {
            let form_state = SubmitFormState {
                prompt: form.prompt,
                context: form.context.unwrap_or_default(),
                error: Some(message),
            };
            return if is_htmx {
                Ok(TemplateResponse::new_template(
                    "jobs/submit_form.html",
                    IndexPageData::form_only(&state, form_state),
                ))
            } else {
                Ok(TemplateResponse::new_template(
                    "index.html",
                    IndexPageData::load(&state, form_state).await?,
                )
                .with_status(StatusCode::BAD_REQUEST))
            };
        }
        Err(err) => return Err(err.into()),
    };

    let capability = ClientCapability::detect(is_htmx, state.config.push_enabled, form.delivery);

    match choose_delivery(capability, &job.id) {
        Delivery::Pull { location } => Ok(TemplateResponse::redirect(location)),
        delivery @ Delivery::Push { .. } => {
            #[derive(Serialize)]
            struct PushData {
                job: JobView,
                delivery: Delivery,
                poll: bool,
                refresh_secs: u64,
            }

            Ok(TemplateResponse::new_template(
                "jobs/push.html",
                PushData {
                    job: JobView::from(JobSnapshot::from(&job)),
                    delivery,
                    poll: false,
                    refresh_secs: state.config.refresh_secs,
                },
            ))
        }
    }
}

pub async fn show_job(
    State(state): State<HtmlState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, HtmlError> {
    let snapshot = state.notifier.snapshot(&job_id).await?;

    Ok(TemplateResponse::new_template(
        "jobs/status_page.html",
        CardData {
            job: JobView::from(snapshot),
            poll: false,
            refresh_secs: state.config.refresh_secs,
        },
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct CardParams {
    #[serde(default)]
    pub poll: bool,
}

/// The status card alone. With `poll=true` a non-terminal card re-fetches
/// itself every `refresh_secs`.
pub async fn show_job_card(
    State(state): State<HtmlState>,
    Path(job_id): Path<String>,
    Query(params): Query<CardParams>,
) -> Result<impl IntoResponse, HtmlError> {
    let snapshot = state.notifier.snapshot(&job_id).await?;

    Ok(TemplateResponse::new_template(
        "jobs/status_card.html",
        CardData {
            job: JobView::from(snapshot),
            poll: params.poll,
            refresh_secs: state.config.refresh_secs,
        },
    ))
}

fn render_fallback(templates: &TemplateEngine, job_id: &str, refresh_secs: u64) -> String {
    #[derive(Serialize)]
    struct FallbackData<'a> {
        job_id: &'a str,
        card_url: String,
        status_url: String,
        refresh_secs: u64,
    }

    let data = FallbackData {
        job_id,
        card_url: card_url(job_id),
        status_url: status_page_url(job_id),
        refresh_secs,
    };

    templates
        .render_fragment("jobs/fallback.html", &data)
        .unwrap_or_else(|e| {
            error!("Failed to render fallback fragment: {:?}", e);
            format!(
                "<p>Live updates are unavailable. <a href=\"{}\">Open the status page</a>.</p>",
                data.status_url
            )
        })
}

/// Server-sent events for one job: a `status` event with the rendered card
/// per status change, then `close_stream` once the job is finished. When
/// updates can no longer be delivered a `fallback` event swaps in a card that
/// polls the pull endpoint instead.
pub async fn job_events(
    State(state): State<HtmlState>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, HtmlError> {
    let mut updates = state.notifier.subscribe(&job_id).await?;
    let templates = Arc::clone(&state.templates);
    let refresh_secs = state.config.refresh_secs;

    let sse_stream = async_stream::stream! {
        while let Some(update) = updates.next().await {
            match update {
                Ok(snapshot) => {
                    let terminal = snapshot.terminal;
                    let card = CardData {
                        job: JobView::from(snapshot),
                        poll: false,
                        refresh_secs,
                    };

                    match templates.render_fragment("jobs/status_card.html", &card) {
                        Ok(html) => yield Ok(Event::default().event("status").data(html)),
                        Err(e) => {
                            error!(%job_id, "Failed to render status card: {:?}", e);
                            yield Ok(Event::default()
                                .event("fallback")
                                .data(render_fallback(&templates, &job_id, refresh_secs)));
                            yield Ok(Event::default().event("close_stream").data("Stream complete"));
                            break;
                        }
                    }

                    if terminal {
                        yield Ok(Event::default().event("close_stream").data("Stream complete"));
                        break;
                    }
                }
                Err(err) => {
                    warn!(%job_id, error = %err, "push delivery failed, falling back to polling");
                    yield Ok(Event::default()
                        .event("fallback")
                        .data(render_fallback(&templates, &job_id, refresh_secs)));
                    yield Ok(Event::default().event("close_stream").data("Stream complete"));
                    break;
                }
            }
        }
    };

    Ok(Sse::new(sse_stream.boxed()).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive-ping"),
    ))
}
