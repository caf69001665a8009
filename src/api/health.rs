//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::broadcast::ServiceStatsSnapshot;
use crate::ratelimit::RateLimiterStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub store_backend: String,
    pub active_broadcasts: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub broadcasts: ServiceStatsSnapshot,
    pub admission: RateLimiterStats,
    pub graph: GraphStats,
}

#[derive(Debug, Serialize)]
pub struct GraphStats {
    pub base_url: String,
    pub send_delay_ms: u64,
    pub eligibility_window_hours: u64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        store_backend: state.settings.database.backend.clone(),
        active_broadcasts: state.service.active_count(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        broadcasts: state.service.stats(),
        admission: state.limiter.stats(),
        graph: GraphStats {
            base_url: state.graph.base_url().to_string(),
            send_delay_ms: state.settings.broadcast.send_delay_ms,
            eligibility_window_hours: state.settings.graph.eligibility_window_hours,
        },
    })
}
