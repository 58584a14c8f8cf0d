//! A bridge wired to in-memory channels, plus frame builders.

use serde_json::json;
use tokio::sync::mpsc;

use voice_bridge::bridge::{Bridge, BridgeConfig};
use voice_bridge::core::audio::BridgeKind;
use voice_bridge::core::realtime::{ClientEvent, TurnDetectionMode};
use voice_bridge::core::telephony::{TelephonyOutgoingMessage, TelephonyRoute};

pub const CONVERSATION_ID: &str = "conv-1";

pub struct TestBridge {
    pub bridge: Bridge,
    pub upstream_rx: mpsc::Receiver<ClientEvent>,
    pub telephony_rx: mpsc::Receiver<TelephonyRoute>,
}

impl TestBridge {
    pub fn new(kind: BridgeKind, turn_detection: TurnDetectionMode) -> Self {
        let (upstream_tx, upstream_rx) = mpsc::channel(256);
        let (telephony_tx, telephony_rx) = mpsc::channel(256);

        let mut config = BridgeConfig::default();
        config.audio.bridge_kind = kind;
        config.audio.vad.enabled = false;
        config.turn_detection = turn_detection;

        let bridge = Bridge::builder(config)
            .build(upstream_tx, telephony_tx)
            .expect("bridge should build");
        Self {
            bridge,
            upstream_rx,
            telephony_rx,
        }
    }

    pub fn audiocodes() -> Self {
        Self::new(BridgeKind::AudioCodes, TurnDetectionMode::ServerVad)
    }

    /// Everything sent upstream so far.
    pub fn drain_upstream(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.upstream_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Every telephony message sent so far. `Close` routes are skipped.
    pub fn drain_telephony(&mut self) -> Vec<TelephonyOutgoingMessage> {
        let mut messages = Vec::new();
        while let Ok(route) = self.telephony_rx.try_recv() {
            if let TelephonyRoute::Outgoing(message) = route {
                messages.push(message);
            }
        }
        messages
    }
}

pub fn type_names(messages: &[TelephonyOutgoingMessage]) -> Vec<&'static str> {
    messages.iter().map(|m| m.type_name()).collect()
}

// =============================================================================
// Telephony frames
// =============================================================================

pub fn session_initiate() -> String {
    json!({
        "type": "session.initiate",
        "conversationId": CONVERSATION_ID,
        "supportedMediaFormats": ["raw/lpcm16"],
        "caller": "+15550100"
    })
    .to_string()
}

pub fn user_stream_chunk(audio_b64: &str) -> String {
    json!({
        "type": "userStream.chunk",
        "conversationId": CONVERSATION_ID,
        "audioChunk": audio_b64
    })
    .to_string()
}

pub fn user_stream_stop() -> String {
    json!({"type": "userStream.stop", "conversationId": CONVERSATION_ID}).to_string()
}

pub fn dtmf(digit: &str) -> String {
    json!({
        "type": "activities",
        "conversationId": CONVERSATION_ID,
        "activities": [{"type": "event", "name": "dtmf", "value": digit}]
    })
    .to_string()
}

// =============================================================================
// Upstream frames
// =============================================================================

pub fn response_created(id: &str) -> String {
    json!({"type": "response.created", "response": {"id": id, "status": "in_progress"}})
        .to_string()
}

pub fn response_done(id: &str) -> String {
    json!({"type": "response.done", "response": {"id": id, "status": "completed"}}).to_string()
}

pub fn audio_delta(response_id: &str, delta_b64: &str) -> String {
    json!({
        "type": "response.audio.delta",
        "response_id": response_id,
        "item_id": "item-1",
        "output_index": 0,
        "content_index": 0,
        "delta": delta_b64
    })
    .to_string()
}

pub fn audio_done(response_id: &str) -> String {
    json!({
        "type": "response.audio.done",
        "response_id": response_id,
        "item_id": "item-1",
        "output_index": 0,
        "content_index": 0
    })
    .to_string()
}

pub fn speech_started() -> String {
    json!({
        "type": "input_audio_buffer.speech_started",
        "audio_start_ms": 1200,
        "item_id": "item-2"
    })
    .to_string()
}

pub fn quota_error() -> String {
    json!({
        "type": "error",
        "error": {
            "type": "insufficient_quota",
            "code": "insufficient_quota",
            "message": "You exceeded your current quota."
        }
    })
    .to_string()
}
