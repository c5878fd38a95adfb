use std::sync::Arc;

use common::{
    queue::{JobQueue, SurrealJobQueue},
    storage::db::SurrealDbClient,
    utils::config::get_config,
};
use job_worker::{new_worker_id, run_worker_loop, JobProcessor, OpenAiInvoker, WorkerSettings};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

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
    db.ensure_initialized().await?;

    let queue: Arc<dyn JobQueue> = Arc::new(SurrealJobQueue::new(Arc::clone(&db)));
    let invoker = Arc::new(OpenAiInvoker::from_config(&config));
    let processor = Arc::new(JobProcessor::new(db, invoker, new_worker_id()));

    info!(worker_id = %processor.worker_id(), model = %config.model, "Starting worker process");
    run_worker_loop(queue, processor, WorkerSettings::from_config(&config)).await
}
