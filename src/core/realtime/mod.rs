//! Upstream realtime API: wire messages, session settings and the WebSocket link.

pub mod base;
pub mod config;
pub mod connection;
pub mod messages;

pub use base::{RealtimeError, RealtimeResult, RealtimeSettings};
pub use config::{
    DEFAULT_REALTIME_MODEL, OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, RealtimeVoice,
    TurnDetectionMode,
};
pub use connection::{RealtimeConnector, UpstreamConnection};
pub use messages::{ApiError, ClientEvent, ConversationItem, Response, ServerEvent, SessionConfig};
