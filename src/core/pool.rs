//! Connection pool for upstream realtime links.
//!
//! A pooled connection is borrowed exclusively by one conversation and returned
//! with [`ConnectionPool::release`]. Idle connections are evicted once they are
//! unhealthy, too old, idle for too long, or have served `max_sessions`
//! conversations. All bookkeeping happens under one mutex that is never held
//! across an await point; dialing happens outside it.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors returned by [`ConnectionPool::acquire`].
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Connection pool exhausted ({max_size} connections in use)")]
    Exhausted { max_size: usize },

    #[error("Failed to open pooled connection: {0}")]
    ConnectFailed(String),

    #[error("Connection pool is closed")]
    Closed,
}

/// Dials new connections and reports on their health.
#[async_trait]
pub trait PoolConnector: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self) -> Result<Self::Connection, PoolError>;

    /// Transport-level liveness check, consulted on acquire and release.
    fn is_healthy(&self, conn: &Self::Connection) -> bool;
}

/// Pool limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_size: usize,
    #[serde(with = "secs")]
    pub max_age: Duration,
    #[serde(with = "secs")]
    pub max_idle: Duration,
    pub max_sessions: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            max_age: Duration::from_secs(3600),
            max_idle: Duration::from_secs(300),
            max_sessions: 100,
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// A connection checked out of the pool, with its bookkeeping.
#[derive(Debug)]
pub struct PooledConnection<T> {
    id: String,
    created_at: Instant,
    last_used_at: Instant,
    session_count: u32,
    healthy: bool,
    conn: T,
}

impl<T> PooledConnection<T> {
    fn new(conn: T) -> Self {
        let now = Instant::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            last_used_at: now,
            session_count: 0,
            healthy: true,
            conn,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    /// Conversations served, including the current one.
    pub fn session_count(&self) -> u32 {
        self.session_count
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    fn is_evictable(&self, config: &PoolConfig, now: Instant) -> bool {
        !self.healthy
            || now.duration_since(self.created_at) >= config.max_age
            || now.duration_since(self.last_used_at) >= config.max_idle
            || self.session_count >= config.max_sessions
    }
}

impl<T> Deref for PooledConnection<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.conn
    }
}

impl<T> DerefMut for PooledConnection<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.conn
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub total: usize,
    pub max_size: usize,
}

struct PoolInner<T> {
    idle: Vec<PooledConnection<T>>,
    /// Idle + checked out + being dialed
    total: usize,
    closed: bool,
}

pub struct ConnectionPool<C: PoolConnector> {
    connector: C,
    config: PoolConfig,
    inner: Mutex<PoolInner<C::Connection>>,
}

impl<C: PoolConnector> ConnectionPool<C> {
    pub fn new(connector: C, config: PoolConfig) -> Self {
        Self {
            connector,
            config,
            inner: Mutex::new(PoolInner {
                idle: Vec::new(),
                total: 0,
                closed: false,
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Check out a connection for exclusive use.
    ///
    /// Reuses the most recently released healthy idle connection, otherwise
    /// dials a new one while under `max_size`.
    pub async fn acquire(&self) -> Result<PooledConnection<C::Connection>, PoolError> {
        let now = Instant::now();
        let mut evicted = Vec::new();

        let reused = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(PoolError::Closed);
            }

            let mut found = None;
            while let Some(candidate) = inner.idle.pop() {
                if candidate.is_evictable(&self.config, now)
                    || !self.connector.is_healthy(&candidate.conn)
                {
                    inner.total -= 1;
                    evicted.push(candidate);
                    continue;
                }
                found = Some(candidate);
                break;
            }

            if found.is_none() {
                if inner.total >= self.config.max_size {
                    drop(inner);
                    self.log_evicted(&evicted);
                    warn!(max_size = self.config.max_size, "Connection pool exhausted");
                    return Err(PoolError::Exhausted {
                        max_size: self.config.max_size,
                    });
                }
                // Reserve a slot before dialing outside the lock.
                inner.total += 1;
            }
            found
        };
        self.log_evicted(&evicted);
        drop(evicted);

        let mut pooled = match reused {
            Some(conn) => {
                debug!(connection_id = %conn.id, sessions = conn.session_count, "Reusing pooled connection");
                conn
            }
            None => match self.connector.connect().await {
                Ok(conn) => {
                    let pooled = PooledConnection::new(conn);
                    info!(connection_id = %pooled.id, "Opened new pooled connection");
                    pooled
                }
                Err(e) => {
                    self.inner.lock().total -= 1;
                    warn!(error = %e, "Failed to open pooled connection");
                    return Err(e);
                }
            },
        };

        pooled.session_count += 1;
        pooled.last_used_at = Instant::now();
        Ok(pooled)
    }

    /// Return a connection after a conversation ends.
    ///
    /// The connection is closed instead of pooled when `healthy` is false, the
    /// transport is dead, or it has reached an eviction limit.
    pub fn release(&self, mut conn: PooledConnection<C::Connection>, healthy: bool) {
        conn.healthy = healthy && self.connector.is_healthy(&conn.conn);
        conn.last_used_at = Instant::now();

        let discarded = {
            let mut inner = self.inner.lock();
            if inner.closed || conn.is_evictable(&self.config, conn.last_used_at) {
                inner.total -= 1;
                Some(conn)
            } else {
                debug!(connection_id = %conn.id, "Connection returned to pool");
                inner.idle.push(conn);
                None
            }
        };

        if let Some(conn) = discarded {
            debug!(
                connection_id = %conn.id,
                healthy = conn.healthy,
                sessions = conn.session_count,
                "Connection closed on release"
            );
        }
    }

    /// Evict stale or unhealthy idle connections. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let evicted: Vec<_> = {
            let mut inner = self.inner.lock();
            let (keep, evict): (Vec<_>, Vec<_>) = inner.idle.drain(..).partition(|c| {
                !c.is_evictable(&self.config, now) && self.connector.is_healthy(&c.conn)
            });
            inner.idle = keep;
            inner.total -= evict.len();
            evict
        };
        self.log_evicted(&evicted);
        evicted.len()
    }

    /// Periodically run [`sweep`](Self::sweep) until `shutdown` is cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = pool.sweep();
                        if removed > 0 {
                            debug!(removed, "Pool sweep evicted idle connections");
                        }
                    }
                }
            }
        })
    }

    /// Refuse further acquires and drop every idle connection.
    pub fn close(&self) {
        let idle: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            let idle: Vec<_> = inner.idle.drain(..).collect();
            inner.total -= idle.len();
            idle
        };
        info!(closed = idle.len(), "Connection pool closed");
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        PoolStats {
            idle: inner.idle.len(),
            total: inner.total,
            max_size: self.config.max_size,
        }
    }

    fn log_evicted(&self, evicted: &[PooledConnection<C::Connection>]) {
        for conn in evicted {
            debug!(
                connection_id = %conn.id,
                healthy = conn.healthy,
                sessions = conn.session_count,
                "Evicted pooled connection"
            );
        }
    }
}
