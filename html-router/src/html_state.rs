use common::{
    create_template_engine,
    notifier::StatusNotifier,
    queue::JobQueue,
    storage::db::SurrealDbClient,
    submission::SubmissionService,
    utils::{
        config::AppConfig,
        template_engine::{ProvidesTemplateEngine, TemplateEngine},
    },
};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct HtmlState {
    pub db: Arc<SurrealDbClient>,
    pub templates: Arc<TemplateEngine>,
    pub config: AppConfig,
    pub submission: SubmissionService,
    pub notifier: StatusNotifier,
}

impl HtmlState {
    pub fn new_with_resources(
        db: Arc<SurrealDbClient>,
        queue: Arc<dyn JobQueue>,
        config: AppConfig,
        template_engine: Option<Arc<TemplateEngine>>,
    ) -> Self {
        let templates =
            template_engine.unwrap_or_else(|| Arc::new(create_template_engine!("templates")));
        debug!("Template engine configured for html_router.");

        Self {
            submission: SubmissionService::from_config(Arc::clone(&db), queue, &config),
            notifier: StatusNotifier::from_config(Arc::clone(&db), &config),
            db,
            templates,
            config,
        }
    }
}

impl ProvidesTemplateEngine for HtmlState {
    fn template_engine(&self) -> &Arc<TemplateEngine> {
        &self.templates
    }
}
