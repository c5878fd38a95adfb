use api_router::{api_routes_v1, api_state::ApiState};
use axum::{extract::FromRef, Router};
use common::{
    queue::{JobQueue, SurrealJobQueue},
    storage::db::SurrealDbClient,
    utils::config::get_config,
};
use html_router::{html_routes, html_state::HtmlState};
use job_worker::{new_worker_id, run_worker_loop, JobProcessor, OpenAiInvoker, WorkerSettings};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;

    // Set up router states
    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    // Ensure db is initialized
    db.ensure_initialized().await?;

    let queue: Arc<dyn JobQueue> = Arc::new(SurrealJobQueue::new(Arc::clone(&db)));

    let api_state = ApiState::new(Arc::clone(&db), Arc::clone(&queue), &config);
    let html_state =
        HtmlState::new_with_resources(Arc::clone(&db), Arc::clone(&queue), config.clone(), None);

    // Create Axum router
    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .merge(html_routes(&html_state))
        .with_state(AppState {
            api_state,
            html_state,
        });

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    let invoker = Arc::new(OpenAiInvoker::from_config(&config));
    let processor = Arc::new(JobProcessor::new(db, invoker, new_worker_id()));

    info!(worker_id = %processor.worker_id(), "Starting worker process");
    tokio::select! {
        result = run_worker_loop(queue, processor, WorkerSettings::from_config(&config)) => {
            if let Err(e) = result {
                error!("Worker process error: {}", e);
            }
            server_handle.abort();
        }
        joined = &mut server_handle => {
            if let Err(e) = joined {
                error!("Server task panicked: {:?}", e);
            }
        }
    }

    Ok(())
}

#[derive(Clone, FromRef)]
struct AppState {
    api_state: ApiState,
    html_state: HtmlState,
}
