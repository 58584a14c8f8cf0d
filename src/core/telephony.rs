//! Telephony-side WebSocket message types.
//!
//! AudioCodes-style envelope: every frame is a JSON object tagged by `type`
//! with camelCase fields. The Twilio integration uses the same envelope at a
//! different sample rate.

use serde::{Deserialize, Serialize};

/// Maximum accepted size of one base64 audio chunk (1 MB)
pub const MAX_AUDIO_CHUNK_SIZE: usize = 1024 * 1024;

/// Participant label used for caller speech events.
pub const CALLER_PARTICIPANT: &str = "caller";

// =============================================================================
// Incoming Messages (telephony -> bridge)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum TelephonyIncomingMessage {
    #[serde(rename = "session.initiate")]
    SessionInitiate {
        conversation_id: String,
        /// Formats the caller can receive, in preference order
        #[serde(default)]
        supported_media_formats: Vec<String>,
        #[serde(default)]
        caller: Option<String>,
    },

    #[serde(rename = "session.resume")]
    SessionResume { conversation_id: String },

    #[serde(rename = "session.end")]
    SessionEnd {
        conversation_id: String,
        #[serde(default)]
        reason: Option<String>,
    },

    #[serde(rename = "userStream.start")]
    UserStreamStart { conversation_id: String },

    #[serde(rename = "userStream.chunk")]
    UserStreamChunk {
        conversation_id: String,
        /// Base64 PCM16 at the bridge kind's source rate
        audio_chunk: String,
    },

    #[serde(rename = "userStream.stop")]
    UserStreamStop { conversation_id: String },

    #[serde(rename = "activities")]
    Activities {
        conversation_id: String,
        #[serde(default)]
        activities: Vec<Activity>,
    },

    #[serde(rename = "connection.validate")]
    ConnectionValidate {
        #[serde(default)]
        conversation_id: Option<String>,
    },
}

impl TelephonyIncomingMessage {
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::SessionInitiate { conversation_id, .. }
            | Self::SessionResume { conversation_id }
            | Self::SessionEnd { conversation_id, .. }
            | Self::UserStreamStart { conversation_id }
            | Self::UserStreamChunk { conversation_id, .. }
            | Self::UserStreamStop { conversation_id }
            | Self::Activities { conversation_id, .. } => Some(conversation_id),
            Self::ConnectionValidate { conversation_id } => conversation_id.as_deref(),
        }
    }

    /// Reject oversized payloads before they reach the audio path.
    pub fn validate_size(&self) -> Result<(), String> {
        if let Self::UserStreamChunk { audio_chunk, .. } = self
            && audio_chunk.len() > MAX_AUDIO_CHUNK_SIZE
        {
            return Err(format!(
                "Audio chunk too large: {} bytes (max: {} bytes)",
                audio_chunk.len(),
                MAX_AUDIO_CHUNK_SIZE
            ));
        }
        Ok(())
    }
}

/// One entry of an `activities` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(rename = "type", default)]
    pub activity_type: String,
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl Activity {
    /// The pressed key, for DTMF events.
    pub fn dtmf_digit(&self) -> Option<&str> {
        if self.name.eq_ignore_ascii_case("dtmf") {
            self.value.as_deref().filter(|v| !v.is_empty())
        } else {
            None
        }
    }

    pub fn is_hangup(&self) -> bool {
        self.name.eq_ignore_ascii_case("hangup")
    }
}

// =============================================================================
// Outgoing Messages (bridge -> telephony)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum TelephonyOutgoingMessage {
    #[serde(rename = "session.accepted")]
    SessionAccepted {
        conversation_id: String,
        media_format: String,
    },

    #[serde(rename = "connection.validated")]
    ConnectionValidated {
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        success: bool,
    },

    #[serde(rename = "userStream.started")]
    UserStreamStarted { conversation_id: String },

    #[serde(rename = "userStream.stopped")]
    UserStreamStopped { conversation_id: String },

    #[serde(rename = "stream.start")]
    StreamStart {
        conversation_id: String,
        stream_id: String,
        media_format: String,
    },

    #[serde(rename = "stream.chunk")]
    StreamChunk {
        conversation_id: String,
        stream_id: String,
        audio_chunk: String,
    },

    #[serde(rename = "stream.stop")]
    StreamStop {
        conversation_id: String,
        stream_id: String,
    },

    #[serde(rename = "speech.started")]
    SpeechStarted {
        conversation_id: String,
        participant: String,
    },

    #[serde(rename = "speech.stopped")]
    SpeechStopped {
        conversation_id: String,
        participant: String,
    },

    /// Bot-initiated hangup
    #[serde(rename = "session.end")]
    SessionEnd {
        conversation_id: String,
        reason: String,
    },
}

impl TelephonyOutgoingMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SessionAccepted { .. } => "session.accepted",
            Self::ConnectionValidated { .. } => "connection.validated",
            Self::UserStreamStarted { .. } => "userStream.started",
            Self::UserStreamStopped { .. } => "userStream.stopped",
            Self::StreamStart { .. } => "stream.start",
            Self::StreamChunk { .. } => "stream.chunk",
            Self::StreamStop { .. } => "stream.stop",
            Self::SpeechStarted { .. } => "speech.started",
            Self::SpeechStopped { .. } => "speech.stopped",
            Self::SessionEnd { .. } => "session.end",
        }
    }
}

/// What the telephony writer task should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum TelephonyRoute {
    Outgoing(TelephonyOutgoingMessage),
    Close,
}
