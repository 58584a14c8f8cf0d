pub mod bridge;
pub mod config;
pub mod core;
pub mod errors;
pub mod handlers;
pub mod routes;
pub mod state;

// Re-export commonly used items for convenience
pub use bridge::{Bridge, BridgeBuilder, BridgeConfig, ShutdownReason};
pub use config::ServerConfig;
pub use self::core::*;
pub use errors::{BridgeError, BridgeResult};
pub use state::AppState;
