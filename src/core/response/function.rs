//! Function-call argument streaming.
//!
//! Tool execution is external; this module only reassembles the arguments
//! the model streams. Completed calls are kept until their response ends.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub call_id: String,
    pub name: Option<String>,
    /// Raw JSON text as produced by the model
    pub arguments: String,
}

impl FunctionCall {
    pub fn parsed_arguments(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.arguments)
    }
}

/// Receives function-call argument fragments keyed by call id.
pub trait FunctionCallHandler: Send + Sync {
    fn on_arguments_delta(&self, call_id: &str, delta: &str);
    fn on_arguments_done(&self, call_id: &str, name: Option<&str>, arguments: &str);

    /// The response that produced the calls has finished.
    fn on_response_done(&self, _response_id: &str) {}
}

#[derive(Default)]
pub struct FunctionCallAccumulator {
    pending: Mutex<HashMap<String, String>>,
    completed: Mutex<Vec<FunctionCall>>,
}

impl FunctionCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_arguments(&self, call_id: &str) -> Option<String> {
        self.pending.lock().get(call_id).cloned()
    }

    /// Drain completed calls in completion order.
    pub fn take_completed(&self) -> Vec<FunctionCall> {
        std::mem::take(&mut *self.completed.lock())
    }

    pub fn completed_len(&self) -> usize {
        self.completed.lock().len()
    }
}

impl FunctionCallHandler for FunctionCallAccumulator {
    fn on_arguments_delta(&self, call_id: &str, delta: &str) {
        self.pending
            .lock()
            .entry(call_id.to_string())
            .or_default()
            .push_str(delta);
    }

    fn on_arguments_done(&self, call_id: &str, name: Option<&str>, arguments: &str) {
        let streamed = self.pending.lock().remove(call_id);
        if let Some(streamed) = streamed
            && streamed != arguments
        {
            warn!(call_id, "Streamed arguments differ from final arguments, using final");
        }

        let call = FunctionCall {
            call_id: call_id.to_string(),
            name: name.map(str::to_string),
            arguments: arguments.to_string(),
        };
        if let Err(e) = call.parsed_arguments() {
            debug!(call_id, error = %e, "Function arguments are not valid JSON");
        }
        info!(call_id, name = ?call.name, "Function call completed");
        self.completed.lock().push(call);
    }

    fn on_response_done(&self, response_id: &str) {
        let completed = self.take_completed();
        let abandoned = {
            let mut pending = self.pending.lock();
            let n = pending.len();
            pending.clear();
            n
        };
        if !completed.is_empty() || abandoned > 0 {
            debug!(
                response_id,
                completed = completed.len(),
                abandoned,
                "Function calls released at end of response"
            );
        }
    }
}
