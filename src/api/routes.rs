use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::broadcast::{
    cancel_broadcast, create_broadcast, get_broadcast, list_broadcasts, list_deliveries,
};
use super::health::{health, stats};
use super::metrics::prometheus_metrics;
use super::spintax::preview_spintax;

/// Unauthenticated operational endpoints
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
}

/// Routes mounted under `/api/v1`
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Broadcasts
        .route("/broadcasts", post(create_broadcast).get(list_broadcasts))
        .route("/broadcasts/{id}", get(get_broadcast))
        .route("/broadcasts/{id}/deliveries", get(list_deliveries))
        .route("/broadcasts/{id}/cancel", post(cancel_broadcast))
        // Spintax
        .route("/spintax/preview", post(preview_spintax))
}
