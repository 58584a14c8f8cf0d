use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

/// Response for `GET /`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Default telephony integration
    pub bridge_kind: &'static str,
    pub pool: PoolHealth,
}

#[derive(Debug, Serialize)]
pub struct PoolHealth {
    pub idle: usize,
    pub total: usize,
    pub max_size: usize,
}

/// Liveness plus upstream pool occupancy.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let stats = state.pool.stats();
    let status = if state.shutdown.is_cancelled() {
        "shutting_down"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status,
        bridge_kind: state.config.audio.bridge_kind.as_str(),
        pool: PoolHealth {
            idle: stats.idle,
            total: stats.total,
            max_size: stats.max_size,
        },
    })
}
