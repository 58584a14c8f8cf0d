//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `telephony` - Telephony WebSocket, one conversation per connection

pub mod api;
pub mod telephony;

pub use telephony::{telephony_handler, telephony_kind_handler};
