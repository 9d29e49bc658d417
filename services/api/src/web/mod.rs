pub mod dto;
pub mod middleware;
pub mod rest;
pub mod state;

use axum::{
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

pub use middleware::require_user;
use rest::*;
use state::AppState;

/// Builds the API routes. Everything except the health check requires a user id.
pub fn api_router(app_state: Arc<AppState>) -> Router {
    let protected_routes = Router::new()
        .route("/scans/barcode", post(scan_barcode_handler))
        .route("/scans/photo", post(scan_photo_handler))
        .route(
            "/products/{id}",
            get(get_product_handler).delete(delete_product_handler),
        )
        .route(
            "/products/{id}/analysis",
            get(analysis_status_handler).post(request_analysis_handler),
        )
        .route("/history", get(list_history_handler))
        .route(
            "/history/{product_id}",
            axum::routing::delete(remove_history_handler),
        )
        .route("/favorites", get(list_favorites_handler))
        .route(
            "/favorites/{product_id}",
            put(add_favorite_handler)
                .get(favorite_status_handler)
                .delete(remove_favorite_handler),
        )
        .route("/stats", get(stats_handler))
        .layer(axum_middleware::from_fn(require_user));

    Router::new()
        .route("/health", get(health_handler))
        .merge(protected_routes)
        .with_state(app_state)
}
