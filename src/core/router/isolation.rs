//! Panic isolation for handlers and middleware.
//!
//! A panicking handler is converted into [`BridgeError::HandlerPanicked`] so
//! one faulty handler cannot take down a receive loop. Requires unwinding
//! (`panic = "abort"` would bypass this).

use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};

use futures::FutureExt;

use crate::errors::{BridgeError, BridgeResult};

/// Run a synchronous callback, turning a panic into an error.
pub fn call_isolated<T, F>(name: &str, f: F) -> BridgeResult<T>
where
    F: FnOnce() -> BridgeResult<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic_info) => {
            let msg = extract_panic_message(&panic_info);
            tracing::error!(name, message = %msg, "Callback panicked");
            Err(BridgeError::HandlerPanicked(msg))
        }
    }
}

/// Await a future, turning a panic during any poll into an error.
///
/// Panics inside tasks spawned by the future are not caught.
pub async fn call_isolated_async<T, Fut>(name: &str, fut: Fut) -> BridgeResult<T>
where
    Fut: Future<Output = BridgeResult<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic_info) => {
            let msg = extract_panic_message(&panic_info);
            tracing::error!(name, message = %msg, "Handler panicked");
            Err(BridgeError::HandlerPanicked(msg))
        }
    }
}

/// Extract a human-readable message from a panic payload.
pub fn extract_panic_message(panic_info: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_isolated_passes_results_through() {
        assert_eq!(call_isolated("ok", || Ok(42)).unwrap(), 42);

        let err = call_isolated::<(), _>("err", || Err(BridgeError::HandlerFailed("nope".into())));
        assert!(matches!(err, Err(BridgeError::HandlerFailed(_))));
    }

    #[test]
    fn test_call_isolated_catches_panic() {
        let result: BridgeResult<()> = call_isolated("boom", || panic!("sync boom"));
        match result {
            Err(BridgeError::HandlerPanicked(msg)) => assert_eq!(msg, "sync boom"),
            other => panic!("Expected panic error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_call_isolated_async_catches_panic_after_await() {
        let result: BridgeResult<()> = call_isolated_async("boom", async {
            tokio::task::yield_now().await;
            panic!("async boom {}", 7);
        })
        .await;
        match result {
            Err(BridgeError::HandlerPanicked(msg)) => assert_eq!(msg, "async boom 7"),
            other => panic!("Expected panic error, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_panic_message_unknown_payload() {
        let payload: Box<dyn Any + Send> = Box::new(17u32);
        assert_eq!(extract_panic_message(&payload), "Unknown panic");
    }
}
