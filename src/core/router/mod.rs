//! Bidirectional event dispatch between the telephony and upstream sides.

pub mod dispatch;
pub mod events;
pub mod isolation;

pub use dispatch::{
    DispatchOutcome, EventHandler, EventRouter, FatalCondition, LogEvent, LogObserver,
    Middleware, MiddlewareAction, handler_fn,
};
pub use events::{BridgeEvent, EventSide, EventType};
pub use isolation::{call_isolated, call_isolated_async, extract_panic_message};
