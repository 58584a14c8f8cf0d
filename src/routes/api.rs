use axum::{Router, routing::get};
use std::sync::Arc;

use crate::handlers::api::health_check;
use crate::state::AppState;

/// Public routes, no WebSocket upgrade.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(health_check))
}
