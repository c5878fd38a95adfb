#![allow(clippy::missing_docs_in_private_items)]

pub mod invoker;
pub mod processor;

use common::{queue::JobQueue, utils::config::AppConfig};
pub use invoker::{Invoker, OpenAiInvoker};
pub use processor::{JobProcessor, ProcessOutcome};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub lease: Duration,
    pub idle_backoff: Duration,
    pub error_backoff: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            lease: Duration::from_secs(config.lease_secs),
            idle_backoff: Duration::from_millis(config.idle_backoff_ms),
            error_backoff: Duration::from_secs(1),
        }
    }
}

pub fn new_worker_id() -> String {
    format!("job-worker-{}", uuid::Uuid::new_v4())
}

pub async fn run_worker_loop(
    queue: Arc<dyn JobQueue>,
    processor: Arc<JobProcessor>,
    settings: WorkerSettings,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        match processor.process_next(queue.as_ref(), settings.lease).await {
            Ok(Some(_outcome)) => {}
            Ok(None) => {
                sleep(settings.idle_backoff).await;
            }
            Err(err) => {
                error!(worker_id = %processor.worker_id(), error = %err, "failed to process queue entry");
                warn!(
                    "Backing off for {}ms after worker error",
                    settings.error_backoff.as_millis()
                );
                sleep(settings.error_backoff).await;
            }
        }
    }
}
