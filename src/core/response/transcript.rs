//! Transcript collection for both sides of the conversation.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranscriptRole {
    /// Caller speech, from input transcription
    User,
    /// Bot speech, from the output audio transcript
    Assistant,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptLine {
    pub role: TranscriptRole,
    pub item_id: String,
    pub text: String,
}

/// Receives transcript text as it streams in.
pub trait TranscriptSink: Send + Sync {
    fn on_delta(&self, role: TranscriptRole, item_id: &str, delta: &str);
    /// `text` is the authoritative final transcript for the item.
    fn on_done(&self, role: TranscriptRole, item_id: &str, text: &str);
}

/// In-memory transcript: partial text per item and finalized lines in order.
#[derive(Default)]
pub struct TranscriptLog {
    partial: Mutex<HashMap<(TranscriptRole, String), String>>,
    lines: Mutex<Vec<TranscriptLine>>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<TranscriptLine> {
        self.lines.lock().clone()
    }

    pub fn partial(&self, role: TranscriptRole, item_id: &str) -> Option<String> {
        self.partial
            .lock()
            .get(&(role, item_id.to_string()))
            .cloned()
    }
}

impl TranscriptSink for TranscriptLog {
    fn on_delta(&self, role: TranscriptRole, item_id: &str, delta: &str) {
        debug!(role = %role, item_id, delta, "Transcript delta");
        self.partial
            .lock()
            .entry((role, item_id.to_string()))
            .or_default()
            .push_str(delta);
    }

    fn on_done(&self, role: TranscriptRole, item_id: &str, text: &str) {
        self.partial.lock().remove(&(role, item_id.to_string()));
        info!(role = %role, item_id, text, "Transcript");
        self.lines.lock().push(TranscriptLine {
            role,
            item_id: item_id.to_string(),
            text: text.to_string(),
        });
    }
}
