//! Event router
//!
//! Routes raw frames from either side of the bridge to priority-ordered
//! handler chains:
//! - Type resolution from the payload's `type` tag
//! - A dedicated logging path for protocol errors and lifecycle markers
//! - A global middleware chain that can rewrite or drop payloads
//! - Per-handler panic and error isolation

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use super::events::{BridgeEvent, EventSide, EventType};
use super::isolation::{call_isolated, call_isolated_async};
use crate::core::realtime::ServerEvent;
use crate::errors::{BridgeError, BridgeResult};

/// Consumer of one or more event types.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &BridgeEvent) -> BridgeResult<()>;

    /// Label used in logs.
    fn name(&self) -> &str {
        "handler"
    }
}

/// Adapter turning a synchronous closure into an [`EventHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&BridgeEvent) -> BridgeResult<()> + Send + Sync,
{
    async fn handle(&self, event: &BridgeEvent) -> BridgeResult<()> {
        (self.f)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wrap a closure as a shareable handler.
pub fn handler_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(&BridgeEvent) -> BridgeResult<()> + Send + Sync + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

/// What a middleware decided for one payload.
#[derive(Debug, Clone, PartialEq)]
pub enum MiddlewareAction {
    /// Pass the payload on unchanged
    Continue,
    /// Pass a rewritten payload on
    Replace(Value),
    /// Stop dispatch for this event
    Drop,
}

pub type Middleware =
    Arc<dyn Fn(EventType, &Value) -> BridgeResult<MiddlewareAction> + Send + Sync>;

/// Upstream conditions after which the session cannot continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalCondition {
    QuotaExceeded,
    InvalidApiKey,
    SessionExpired,
}

impl FatalCondition {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "insufficient_quota" => Some(Self::QuotaExceeded),
            "invalid_api_key" => Some(Self::InvalidApiKey),
            "session_expired" => Some(Self::SessionExpired),
            _ => None,
        }
    }

    /// Inspect an `error` or a failed `response.done`.
    pub fn classify(event: &ServerEvent) -> Option<Self> {
        match event {
            ServerEvent::Error { error } => Self::from_code(error.kind()),
            ServerEvent::ResponseDone { response } => {
                response.error_code().and_then(Self::from_code)
            }
            _ => None,
        }
    }

    /// Reason reported to the telephony side on teardown.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::QuotaExceeded => "upstream quota exceeded",
            Self::InvalidApiKey => "upstream rejected credentials",
            Self::SessionExpired => "upstream session expired",
        }
    }
}

impl fmt::Display for FatalCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// An event delivered through the logging path.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub event_type: EventType,
    pub event: ServerEvent,
    pub fatal: Option<FatalCondition>,
}

/// Receives every event taken by the logging path.
#[async_trait]
pub trait LogObserver: Send + Sync {
    async fn on_log_event(&self, event: &LogEvent);
}

/// Result of one [`EventRouter::dispatch`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not JSON, no `type` tag, or did not match the typed shape
    Malformed,
    UnknownType,
    /// Taken by the logging path
    Logged,
    /// Dropped by middleware
    Filtered,
    NoHandler,
    Handled { invoked: usize, failed: usize },
}

struct Registration {
    priority: i32,
    handler: Arc<dyn EventHandler>,
}

struct MiddlewareEntry {
    priority: i32,
    middleware: Middleware,
}

/// Priority-ordered event dispatch for both sides of the bridge.
///
/// Registration tables are the only state; dispatch works on snapshots so no
/// lock is held while handlers run.
#[derive(Default)]
pub struct EventRouter {
    handlers: RwLock<HashMap<(EventSide, EventType), Vec<Registration>>>,
    middleware: RwLock<Vec<MiddlewareEntry>>,
    observers: RwLock<Vec<Arc<dyn LogObserver>>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler; higher priorities run first, ties keep insertion order.
    pub fn register_handler(
        &self,
        side: EventSide,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
        priority: i32,
    ) -> BridgeResult<()> {
        if event_type.side() != side {
            return Err(BridgeError::InvalidRegistration(format!(
                "{event_type} is not a {side} event"
            )));
        }
        if event_type.is_log_event() {
            warn!(
                event_type = %event_type,
                "Handler registered for a logged event; use a log observer instead"
            );
        }

        let mut handlers = self.handlers.write();
        let chain = handlers.entry((side, event_type)).or_default();
        chain.push(Registration { priority, handler });
        chain.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(())
    }

    /// Remove a previously registered handler. Returns whether it was found.
    pub fn unregister_handler(
        &self,
        side: EventSide,
        event_type: EventType,
        handler: &Arc<dyn EventHandler>,
    ) -> bool {
        let mut handlers = self.handlers.write();
        let Some(chain) = handlers.get_mut(&(side, event_type)) else {
            return false;
        };
        let before = chain.len();
        chain.retain(|r| !Arc::ptr_eq(&r.handler, handler));
        let removed = chain.len() != before;
        if chain.is_empty() {
            handlers.remove(&(side, event_type));
        }
        removed
    }

    pub fn register_middleware(&self, middleware: Middleware, priority: i32) {
        let mut chain = self.middleware.write();
        chain.push(MiddlewareEntry {
            priority,
            middleware,
        });
        chain.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn add_log_observer(&self, observer: Arc<dyn LogObserver>) {
        self.observers.write().push(observer);
    }

    pub fn handler_count(&self, side: EventSide, event_type: EventType) -> usize {
        self.handlers
            .read()
            .get(&(side, event_type))
            .map_or(0, Vec::len)
    }

    pub fn middleware_count(&self) -> usize {
        self.middleware.read().len()
    }

    /// Route one raw frame received on `side`.
    ///
    /// Never fails; every problem is logged and reported in the outcome.
    pub async fn dispatch(&self, side: EventSide, raw: &str) -> DispatchOutcome {
        let payload: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(side = %side, error = %e, "Dropping malformed frame");
                return DispatchOutcome::Malformed;
            }
        };

        let Some(tag) = payload.get("type").and_then(Value::as_str) else {
            warn!(side = %side, "Dropping frame without a type tag");
            return DispatchOutcome::Malformed;
        };

        let Some(event_type) = EventType::resolve(side, tag) else {
            warn!(side = %side, event_type = tag, "Unknown event type");
            return DispatchOutcome::UnknownType;
        };

        if event_type.is_log_event() {
            return self.dispatch_log_event(event_type, payload).await;
        }

        let Some(payload) = self.run_middleware(event_type, payload) else {
            debug!(event_type = %event_type, "Event filtered by middleware");
            return DispatchOutcome::Filtered;
        };

        let chain = self.snapshot_handlers(side, event_type);
        if chain.is_empty() {
            warn!(side = %side, event_type = %event_type, "No handler registered");
            return DispatchOutcome::NoHandler;
        }

        let event = match BridgeEvent::from_value(side, payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(event_type = %event_type, error = %e, "Dropping malformed payload");
                return DispatchOutcome::Malformed;
            }
        };

        let mut failed = 0;
        for handler in &chain {
            let name = handler.name();
            if let Err(e) = call_isolated_async(name, handler.handle(&event)).await {
                failed += 1;
                warn!(
                    event_type = %event_type,
                    handler = name,
                    error = %e,
                    "Event handler failed"
                );
            }
        }

        trace!(event_type = %event_type, invoked = chain.len(), failed, "Event dispatched");
        DispatchOutcome::Handled {
            invoked: chain.len(),
            failed,
        }
    }

    fn snapshot_handlers(&self, side: EventSide, event_type: EventType) -> Vec<Arc<dyn EventHandler>> {
        self.handlers
            .read()
            .get(&(side, event_type))
            .map(|chain| chain.iter().map(|r| r.handler.clone()).collect())
            .unwrap_or_default()
    }

    /// `None` when a middleware dropped the payload.
    fn run_middleware(&self, event_type: EventType, mut payload: Value) -> Option<Value> {
        let chain: Vec<Middleware> = self
            .middleware
            .read()
            .iter()
            .map(|m| m.middleware.clone())
            .collect();

        for middleware in chain {
            match call_isolated("middleware", || middleware(event_type, &payload)) {
                Ok(MiddlewareAction::Continue) => {}
                Ok(MiddlewareAction::Replace(next)) => payload = next,
                Ok(MiddlewareAction::Drop) => return None,
                Err(e) => {
                    warn!(event_type = %event_type, error = %e, "Skipping failed middleware");
                }
            }
        }
        Some(payload)
    }

    async fn dispatch_log_event(&self, event_type: EventType, payload: Value) -> DispatchOutcome {
        let event: ServerEvent = match serde_json::from_value(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(event_type = %event_type, error = %e, "Dropping malformed payload");
                return DispatchOutcome::Malformed;
            }
        };

        log_server_event(&event);

        let fatal = FatalCondition::classify(&event);
        if fatal == Some(FatalCondition::QuotaExceeded) {
            error!("==============================================================");
            error!("  UPSTREAM QUOTA EXCEEDED");
            error!("  The realtime API rejected the request for insufficient quota.");
            error!("  Check the account's billing status and usage limits.");
            error!("==============================================================");
        } else if let Some(condition) = fatal {
            error!(condition = %condition, "Fatal upstream condition");
        }

        let observers: Vec<Arc<dyn LogObserver>> = self.observers.read().clone();
        if !observers.is_empty() {
            let log_event = LogEvent {
                event_type,
                event,
                fatal,
            };
            for observer in observers {
                let notified = call_isolated_async("log_observer", async {
                    observer.on_log_event(&log_event).await;
                    Ok(())
                })
                .await;
                if let Err(e) = notified {
                    warn!(event_type = %event_type, error = %e, "Log observer failed");
                }
            }
        }

        DispatchOutcome::Logged
    }
}

fn log_server_event(event: &ServerEvent) {
    match event {
        ServerEvent::Error { error } => {
            error!(
                code = error.kind(),
                message = %error.message,
                param = ?error.param,
                "Upstream error"
            );
        }
        ServerEvent::ResponseDone { response } => {
            let (input_tokens, output_tokens) = response
                .usage
                .as_ref()
                .map_or((0, 0), |u| (u.input_tokens, u.output_tokens));
            if let Some(code) = response.error_code() {
                warn!(
                    response_id = %response.id,
                    status = %response.status,
                    code,
                    "Response finished with error"
                );
            } else {
                info!(
                    response_id = %response.id,
                    status = %response.status,
                    input_tokens,
                    output_tokens,
                    "Response done"
                );
            }
        }
        ServerEvent::RateLimitsUpdated { rate_limits } => {
            for limit in rate_limits {
                if limit.remaining == 0 {
                    warn!(
                        name = %limit.name,
                        limit = limit.limit,
                        reset_seconds = limit.reset_seconds,
                        "Rate limit exhausted"
                    );
                } else {
                    debug!(
                        name = %limit.name,
                        remaining = limit.remaining,
                        limit = limit.limit,
                        "Rate limit updated"
                    );
                }
            }
        }
        ServerEvent::InputAudioBufferCommitted { item_id, .. } => {
            debug!(item_id = %item_id, "Input audio buffer committed");
        }
        ServerEvent::SpeechStarted { audio_start_ms, .. } => {
            debug!(audio_start_ms, "Upstream detected speech start");
        }
        ServerEvent::SpeechStopped { audio_end_ms, .. } => {
            debug!(audio_end_ms, "Upstream detected speech stop");
        }
        other => trace!(event = ?other, "Logged event"),
    }
}
