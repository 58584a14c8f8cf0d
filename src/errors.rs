//! Bridge-level error type.

use thiserror::Error;

use crate::core::pool::PoolError;
use crate::core::realtime::RealtimeError;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Invalid base64 audio: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Malformed message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Upstream connection closed")]
    UpstreamClosed,

    #[error("Telephony connection closed")]
    TelephonyClosed,

    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),

    #[error("Invalid handler registration: {0}")]
    InvalidRegistration(String),

    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
