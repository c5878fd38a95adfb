use axum::{extract::FromRef, middleware::from_fn_with_state, Router};

use crate::{
    html_state::HtmlState,
    middlewares::{compression::compression_layer, response_middleware::with_template_response},
};

pub struct RouterFactory<S> {
    app_state: HtmlState,
    routers: Vec<Router<S>>,
    compression_enabled: bool,
}

impl<S> RouterFactory<S>
where
    S: Clone + Send + Sync + 'static,
    HtmlState: FromRef<S>,
{
    pub fn new(app_state: &HtmlState) -> Self {
        Self {
            app_state: app_state.to_owned(),
            routers: Vec::new(),
            compression_enabled: false,
        }
    }

    // Add a router that will be merged at the root level
    pub fn add_routes(mut self, routes: Router<S>) -> Self {
        self.routers.push(routes);
        self
    }

    /// Enables response compression when building the router.
    pub const fn with_compression(mut self) -> Self {
        self.compression_enabled = true;
        self
    }

    pub fn build(self) -> Router<S> {
        let mut app_router = Router::new();

        for router in self.routers {
            app_router = app_router.merge(router);
        }

        // Handlers return TemplateResponse extensions; this layer renders them
        app_router = app_router.layer(from_fn_with_state(
            self.app_state.clone(),
            with_template_response::<HtmlState>,
        ));

        if self.compression_enabled {
            app_router = app_router.layer(compression_layer());
        }

        app_router
    }
}
