//! Error type and session settings for the upstream realtime link.

use std::fmt;

use thiserror::Error;
use zeroize::Zeroizing;

use super::config::{
    DEFAULT_REALTIME_MODEL, DEFAULT_TRANSCRIPTION_MODEL, OPENAI_REALTIME_URL, RealtimeVoice,
    TurnDetectionMode,
};
use super::messages::{InputAudioTranscription, SessionConfig, TurnDetection};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur on the upstream realtime connection.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The connection task has ended and nothing more can be sent
    #[error("Not connected")]
    NotConnected,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Session Settings
// =============================================================================

/// Everything needed to open and configure an upstream session.
#[derive(Clone)]
pub struct RealtimeSettings {
    /// API key, wiped from memory when the settings are dropped
    pub api_key: Zeroizing<String>,
    /// WebSocket base URL (without the model query)
    pub url: String,
    pub model: String,
    pub voice: RealtimeVoice,
    pub instructions: Option<String>,
    pub turn_detection: TurnDetectionMode,
    /// Model for caller-side transcription; `None` disables it
    pub transcription_model: Option<String>,
    pub temperature: Option<f32>,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            api_key: Zeroizing::new(String::new()),
            url: OPENAI_REALTIME_URL.to_string(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            voice: RealtimeVoice::default(),
            instructions: None,
            turn_detection: TurnDetectionMode::default(),
            transcription_model: Some(DEFAULT_TRANSCRIPTION_MODEL.to_string()),
            temperature: None,
        }
    }
}

impl fmt::Debug for RealtimeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeSettings")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("url", &self.url)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("instructions", &self.instructions)
            .field("turn_detection", &self.turn_detection)
            .field("transcription_model", &self.transcription_model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl RealtimeSettings {
    /// Reject settings that cannot open a session.
    pub fn validate(&self) -> RealtimeResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "OpenAI API key is required".to_string(),
            ));
        }
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(RealtimeError::InvalidConfiguration(format!(
                "Realtime URL must use ws:// or wss://, got {}",
                self.url
            )));
        }
        if self.model.trim().is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "Realtime model must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The `session.update` payload sent right after the handshake.
    pub fn session_config(&self) -> SessionConfig {
        let turn_detection = match self.turn_detection {
            TurnDetectionMode::ServerVad => Some(TurnDetection {
                threshold: Some(0.5),
                prefix_padding_ms: Some(300),
                silence_duration_ms: Some(500),
                create_response: Some(true),
            }),
            TurnDetectionMode::Manual => None,
        };

        SessionConfig {
            modalities: Some(vec!["audio".to_string(), "text".to_string()]),
            instructions: self.instructions.clone(),
            voice: Some(self.voice.as_str().to_string()),
            input_audio_format: Some("pcm16".to_string()),
            output_audio_format: Some("pcm16".to_string()),
            input_audio_transcription: self
                .transcription_model
                .clone()
                .map(|model| InputAudioTranscription { model }),
            turn_detection,
            tools: None,
            temperature: self.temperature,
        }
    }
}
