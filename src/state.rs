use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServerConfig;
use crate::core::pool::ConnectionPool;
use crate::core::realtime::RealtimeConnector;

/// How often idle upstream connections are checked for eviction.
const POOL_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Application state shared by every telephony connection.
pub struct AppState {
    pub config: ServerConfig,
    /// Warm upstream connections, reused across conversations
    pub pool: Arc<ConnectionPool<RealtimeConnector>>,
    /// Cancelled when the server shuts down; every live bridge watches it
    pub shutdown: CancellationToken,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        let shutdown = CancellationToken::new();
        let pool = Arc::new(ConnectionPool::new(
            RealtimeConnector::new(config.realtime.clone()),
            config.pool.clone(),
        ));
        pool.spawn_sweeper(POOL_SWEEP_INTERVAL, shutdown.clone());

        info!(
            max_size = config.pool.max_size,
            bridge_kind = %config.audio.bridge_kind,
            model = %config.realtime.model,
            "Application state initialized"
        );

        Arc::new(Self {
            config,
            pool,
            shutdown,
        })
    }

    /// Stop accepting upstream work and signal every live bridge.
    pub fn begin_shutdown(&self) {
        self.shutdown.cancel();
        self.pool.close();
    }
}
