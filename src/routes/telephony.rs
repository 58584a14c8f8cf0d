//! Telephony WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::{telephony_handler, telephony_kind_handler};
use crate::state::AppState;
use std::sync::Arc;

/// Create the telephony WebSocket router
///
/// # Endpoints
///
/// - `GET /bridge` - WebSocket upgrade using the configured default integration
/// - `GET /bridge/{kind}` - WebSocket upgrade for `audiocodes` or `twilio`;
///   any other kind is answered with `404 Not Found`
///
/// # Protocol
///
/// Every frame is a JSON text message tagged by `type`:
///
/// ```json
/// // Telephony sends
/// {"type": "session.initiate", "conversationId": "c1", "supportedMediaFormats": ["raw/lpcm16"]}
/// {"type": "userStream.chunk", "conversationId": "c1", "audioChunk": "<base64 pcm16>"}
///
/// // Bridge replies
/// {"type": "session.accepted", "conversationId": "c1", "mediaFormat": "raw/lpcm16"}
/// {"type": "stream.chunk", "conversationId": "c1", "streamId": "...", "audioChunk": "..."}
/// ```
pub fn create_telephony_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bridge", get(telephony_handler))
        .route("/bridge/{kind}", get(telephony_kind_handler))
        .layer(TraceLayer::new_for_http())
}
