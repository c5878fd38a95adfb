use std::sync::Arc;

use common::{
    notifier::StatusNotifier,
    queue::JobQueue,
    storage::db::SurrealDbClient,
    submission::SubmissionService,
    utils::config::AppConfig,
};

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub submission: SubmissionService,
    pub notifier: StatusNotifier,
}

impl ApiState {
    pub fn new(db: Arc<SurrealDbClient>, queue: Arc<dyn JobQueue>, config: &AppConfig) -> Self {
        Self {
            submission: SubmissionService::from_config(Arc::clone(&db), queue, config),
            notifier: StatusNotifier::from_config(Arc::clone(&db), config),
            db,
            config: config.clone(),
        }
    }
}
