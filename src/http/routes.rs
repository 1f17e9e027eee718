use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

/// Builds the control-plane router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Translation control
        .route(
            "/palabra/translations/start",
            post(handlers::start_translation),
        )
        .route(
            "/palabra/translations/stop",
            post(handlers::stop_translation),
        )
        // Queries
        .route("/palabra/translations", get(handlers::list_translations))
        .route("/palabra/sessions", get(handlers::list_sessions))
        // Request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
