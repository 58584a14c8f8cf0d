//! Event identities and the typed payloads handed to handlers.

use std::fmt;

use serde_json::Value;

use crate::core::realtime::ServerEvent;
use crate::core::telephony::TelephonyIncomingMessage;

/// Which connection an event arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSide {
    Telephony,
    Upstream,
}

impl fmt::Display for EventSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Telephony => "telephony",
            Self::Upstream => "upstream",
        })
    }
}

/// Every event type the bridge understands, keyed by its wire `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    // Telephony
    SessionInitiate,
    SessionResume,
    SessionEnd,
    UserStreamStart,
    UserStreamChunk,
    UserStreamStop,
    Activities,
    ConnectionValidate,

    // Upstream
    Error,
    SessionCreated,
    SessionUpdated,
    SpeechStarted,
    SpeechStopped,
    InputAudioBufferCommitted,
    InputAudioBufferCleared,
    ConversationItemCreated,
    InputTranscriptionDelta,
    InputTranscriptionCompleted,
    InputTranscriptionFailed,
    ConversationItemTruncated,
    ConversationItemDeleted,
    ResponseCreated,
    ResponseDone,
    OutputItemAdded,
    OutputItemDone,
    ContentPartAdded,
    ContentPartDone,
    TextDelta,
    TextDone,
    AudioTranscriptDelta,
    AudioTranscriptDone,
    AudioDelta,
    AudioDone,
    FunctionCallArgumentsDelta,
    FunctionCallArgumentsDone,
    RateLimitsUpdated,
}

impl EventType {
    pub const ALL: [EventType; 36] = [
        Self::SessionInitiate,
        Self::SessionResume,
        Self::SessionEnd,
        Self::UserStreamStart,
        Self::UserStreamChunk,
        Self::UserStreamStop,
        Self::Activities,
        Self::ConnectionValidate,
        Self::Error,
        Self::SessionCreated,
        Self::SessionUpdated,
        Self::SpeechStarted,
        Self::SpeechStopped,
        Self::InputAudioBufferCommitted,
        Self::InputAudioBufferCleared,
        Self::ConversationItemCreated,
        Self::InputTranscriptionDelta,
        Self::InputTranscriptionCompleted,
        Self::InputTranscriptionFailed,
        Self::ConversationItemTruncated,
        Self::ConversationItemDeleted,
        Self::ResponseCreated,
        Self::ResponseDone,
        Self::OutputItemAdded,
        Self::OutputItemDone,
        Self::ContentPartAdded,
        Self::ContentPartDone,
        Self::TextDelta,
        Self::TextDone,
        Self::AudioTranscriptDelta,
        Self::AudioTranscriptDone,
        Self::AudioDelta,
        Self::AudioDone,
        Self::FunctionCallArgumentsDelta,
        Self::FunctionCallArgumentsDone,
        Self::RateLimitsUpdated,
    ];

    /// Wire `type` tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionInitiate => "session.initiate",
            Self::SessionResume => "session.resume",
            Self::SessionEnd => "session.end",
            Self::UserStreamStart => "userStream.start",
            Self::UserStreamChunk => "userStream.chunk",
            Self::UserStreamStop => "userStream.stop",
            Self::Activities => "activities",
            Self::ConnectionValidate => "connection.validate",
            Self::Error => "error",
            Self::SessionCreated => "session.created",
            Self::SessionUpdated => "session.updated",
            Self::SpeechStarted => "input_audio_buffer.speech_started",
            Self::SpeechStopped => "input_audio_buffer.speech_stopped",
            Self::InputAudioBufferCommitted => "input_audio_buffer.committed",
            Self::InputAudioBufferCleared => "input_audio_buffer.cleared",
            Self::ConversationItemCreated => "conversation.item.created",
            Self::InputTranscriptionDelta => "conversation.item.input_audio_transcription.delta",
            Self::InputTranscriptionCompleted => "conversation.item.input_audio_transcription.completed",
            Self::InputTranscriptionFailed => "conversation.item.input_audio_transcription.failed",
            Self::ConversationItemTruncated => "conversation.item.truncated",
            Self::ConversationItemDeleted => "conversation.item.deleted",
            Self::ResponseCreated => "response.created",
            Self::ResponseDone => "response.done",
            Self::OutputItemAdded => "response.output_item.added",
            Self::OutputItemDone => "response.output_item.done",
            Self::ContentPartAdded => "response.content_part.added",
            Self::ContentPartDone => "response.content_part.done",
            Self::TextDelta => "response.text.delta",
            Self::TextDone => "response.text.done",
            Self::AudioTranscriptDelta => "response.audio_transcript.delta",
            Self::AudioTranscriptDone => "response.audio_transcript.done",
            Self::AudioDelta => "response.audio.delta",
            Self::AudioDone => "response.audio.done",
            Self::FunctionCallArgumentsDelta => "response.function_call_arguments.delta",
            Self::FunctionCallArgumentsDone => "response.function_call_arguments.done",
            Self::RateLimitsUpdated => "rate_limits.updated",
        }
    }

    pub fn side(&self) -> EventSide {
        match self {
            Self::SessionInitiate
            | Self::SessionResume
            | Self::SessionEnd
            | Self::UserStreamStart
            | Self::UserStreamChunk
            | Self::UserStreamStop
            | Self::Activities
            | Self::ConnectionValidate => EventSide::Telephony,
            _ => EventSide::Upstream,
        }
    }

    /// Resolve a wire tag received on `side`.
    pub fn resolve(side: EventSide, tag: &str) -> Option<EventType> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.side() == side && t.as_str() == tag)
    }

    /// Events routed to the logging path instead of handler chains.
    pub fn is_log_event(&self) -> bool {
        matches!(
            self,
            Self::Error
                | Self::ResponseDone
                | Self::RateLimitsUpdated
                | Self::InputAudioBufferCommitted
                | Self::SpeechStarted
                | Self::SpeechStopped
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed payload delivered to handlers.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    Telephony(TelephonyIncomingMessage),
    Upstream(ServerEvent),
}

impl BridgeEvent {
    /// Parse a JSON payload received on `side`.
    pub fn from_value(side: EventSide, value: Value) -> Result<Self, serde_json::Error> {
        match side {
            EventSide::Telephony => serde_json::from_value(value).map(Self::Telephony),
            EventSide::Upstream => serde_json::from_value(value).map(Self::Upstream),
        }
    }

    pub fn side(&self) -> EventSide {
        match self {
            Self::Telephony(_) => EventSide::Telephony,
            Self::Upstream(_) => EventSide::Upstream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_respects_side() {
        assert_eq!(
            EventType::resolve(EventSide::Upstream, "response.audio.delta"),
            Some(EventType::AudioDelta)
        );
        assert_eq!(
            EventType::resolve(EventSide::Telephony, "userStream.chunk"),
            Some(EventType::UserStreamChunk)
        );
        assert_eq!(EventType::resolve(EventSide::Telephony, "response.audio.delta"), None);
        assert_eq!(EventType::resolve(EventSide::Upstream, "nonsense"), None);
    }

    #[test]
    fn test_tags_are_unique_per_side() {
        for a in EventType::ALL {
            assert_eq!(EventType::resolve(a.side(), a.as_str()), Some(a));
        }
    }

    #[test]
    fn test_log_events() {
        let logged: Vec<_> = EventType::ALL.iter().filter(|t| t.is_log_event()).collect();
        assert_eq!(logged.len(), 6);
        assert!(EventType::ResponseDone.is_log_event());
        assert!(!EventType::ResponseCreated.is_log_event());
        assert!(logged.iter().all(|t| t.side() == EventSide::Upstream));
    }

    #[test]
    fn test_bridge_event_from_value() {
        let value = serde_json::json!({"type": "userStream.stop", "conversationId": "c1"});
        let event = BridgeEvent::from_value(EventSide::Telephony, value).unwrap();
        assert_eq!(event.side(), EventSide::Telephony);

        let bad = serde_json::json!({"type": "response.created"});
        assert!(BridgeEvent::from_value(EventSide::Upstream, bad).is_err());
    }
}
