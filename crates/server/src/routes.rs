//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/api/files",
            post(handlers::create_file).get(handlers::list_files),
        )
        .route(
            "/api/files/{file_id}",
            get(handlers::get_file).delete(handlers::delete_file),
        )
        .route(
            "/api/files/{file_id}/chunks/{chunk_index}",
            put(handlers::upload_chunk).get(handlers::download_chunk),
        )
        .route(
            "/api/files/{file_id}/download",
            get(handlers::download_file),
        )
        .route("/api/files/{file_id}/merge", post(handlers::retry_merge));

    let mut router = Router::new().merge(api_routes);

    // SECURITY: /metrics is unauthenticated. Restrict it at the network level.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
