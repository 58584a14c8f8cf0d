//! Bridge orchestrator
//!
//! Wires one conversation together: the event router, the audio stream
//! handler and the response lifecycle. Runs the two receive loops (telephony
//! frames and upstream frames) until either side closes, the caller hangs up,
//! or the upstream reports a fatal condition.
//!
//! Upstream connections outlive the bridge. [`Bridge::settle_upstream`] cancels
//! any response still generating and deletes this conversation's items so the
//! connection can serve the next caller.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::core::audio::quality::QualityAlertCallback;
use crate::core::audio::{AudioHandlerConfig, AudioStreamHandler, CallRecorder};
use crate::core::realtime::{ClientEvent, ServerEvent, TurnDetectionMode};
use crate::core::response::{
    FunctionCallAccumulator, FunctionCallHandler, ResponseLifecycle, TranscriptLog,
    TranscriptSink, UserInput,
};
use crate::core::router::{
    BridgeEvent, EventHandler, EventRouter, EventSide, EventType, FatalCondition, LogEvent,
    LogObserver, handler_fn,
};
use crate::core::telephony::{TelephonyIncomingMessage, TelephonyOutgoingMessage, TelephonyRoute};
use crate::errors::{BridgeError, BridgeResult};

/// Upstream events handled by the response lifecycle.
const LIFECYCLE_EVENTS: [EventType; 10] = [
    EventType::ResponseCreated,
    EventType::AudioDelta,
    EventType::AudioDone,
    EventType::InputTranscriptionDelta,
    EventType::InputTranscriptionCompleted,
    EventType::AudioTranscriptDelta,
    EventType::AudioTranscriptDone,
    EventType::FunctionCallArgumentsDelta,
    EventType::FunctionCallArgumentsDone,
    EventType::InputTranscriptionFailed,
];

/// Upstream events that add or remove conversation items.
const ITEM_EVENTS: [EventType; 3] = [
    EventType::ConversationItemCreated,
    EventType::OutputItemAdded,
    EventType::ConversationItemDeleted,
];

/// Upstream events the bridge only traces.
const INFORMATIONAL_EVENTS: [EventType; 9] = [
    EventType::SessionCreated,
    EventType::SessionUpdated,
    EventType::InputAudioBufferCleared,
    EventType::ConversationItemTruncated,
    EventType::OutputItemDone,
    EventType::ContentPartAdded,
    EventType::ContentPartDone,
    EventType::TextDelta,
    EventType::TextDone,
];

#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    pub audio: AudioHandlerConfig,
    pub turn_detection: TurnDetectionMode,
}

/// Why a bridge stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    CallerHangup,
    TelephonyClosed,
    UpstreamClosed,
    Fatal(FatalCondition),
    /// Stopped from outside, e.g. server shutdown
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CallerHangup => f.write_str("caller hung up"),
            Self::TelephonyClosed => f.write_str("telephony connection closed"),
            Self::UpstreamClosed => f.write_str("upstream connection closed"),
            Self::Fatal(condition) => write!(f, "{condition}"),
            Self::Requested => f.write_str("shutdown requested"),
        }
    }
}

/// Cancellation plus the first recorded reason for it.
#[derive(Default)]
struct Teardown {
    token: CancellationToken,
    reason: Mutex<Option<ShutdownReason>>,
}

impl Teardown {
    /// First reason wins.
    fn trigger(&self, reason: ShutdownReason) {
        {
            let mut current = self.reason.lock();
            if current.is_some() {
                return;
            }
            *current = Some(reason);
        }
        info!(reason = %reason, "Bridge teardown triggered");
        self.token.cancel();
    }

    fn reason(&self) -> ShutdownReason {
        (*self.reason.lock()).unwrap_or(ShutdownReason::Requested)
    }
}

pub struct BridgeBuilder {
    config: BridgeConfig,
    recorder: Option<Arc<dyn CallRecorder>>,
    transcripts: Option<Arc<dyn TranscriptSink>>,
    functions: Option<Arc<dyn FunctionCallHandler>>,
    quality_alerts: Option<QualityAlertCallback>,
}

impl BridgeBuilder {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            recorder: None,
            transcripts: None,
            functions: None,
            quality_alerts: None,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn CallRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_transcript_sink(mut self, sink: Arc<dyn TranscriptSink>) -> Self {
        self.transcripts = Some(sink);
        self
    }

    pub fn with_function_handler(mut self, handler: Arc<dyn FunctionCallHandler>) -> Self {
        self.functions = Some(handler);
        self
    }

    pub fn with_quality_alert_callback(mut self, callback: QualityAlertCallback) -> Self {
        self.quality_alerts = Some(callback);
        self
    }

    /// Construct all components and register their handlers.
    pub fn build(
        self,
        upstream: mpsc::Sender<ClientEvent>,
        telephony: mpsc::Sender<TelephonyRoute>,
    ) -> BridgeResult<Bridge> {
        let mut audio =
            AudioStreamHandler::new(self.config.audio.clone(), upstream.clone(), telephony.clone());
        if let Some(recorder) = self.recorder {
            audio = audio.with_recorder(recorder);
        }
        if let Some(callback) = self.quality_alerts {
            audio = audio.with_quality_alert_callback(callback);
        }
        let audio = Arc::new(audio);

        let transcripts = self
            .transcripts
            .unwrap_or_else(|| Arc::new(TranscriptLog::new()) as Arc<dyn TranscriptSink>);
        let functions = self
            .functions
            .unwrap_or_else(|| Arc::new(FunctionCallAccumulator::new()) as Arc<dyn FunctionCallHandler>);
        let lifecycle = Arc::new(ResponseLifecycle::new(
            upstream.clone(),
            audio.clone(),
            transcripts,
            functions,
        ));

        let teardown = Arc::new(Teardown::default());
        let router = Arc::new(EventRouter::new());

        let telephony_events: Arc<dyn EventHandler> = Arc::new(TelephonyEvents {
            audio: audio.clone(),
            lifecycle: lifecycle.clone(),
            telephony: telephony.clone(),
            turn_detection: self.config.turn_detection,
            teardown: teardown.clone(),
        });
        for event_type in EventType::ALL
            .into_iter()
            .filter(|t| t.side() == EventSide::Telephony)
        {
            router.register_handler(EventSide::Telephony, event_type, telephony_events.clone(), 0)?;
        }

        let lifecycle_handler: Arc<dyn EventHandler> = lifecycle.clone();
        for event_type in LIFECYCLE_EVENTS {
            router.register_handler(EventSide::Upstream, event_type, lifecycle_handler.clone(), 0)?;
        }

        let items = Arc::new(ConversationItems::default());
        let items_handler: Arc<dyn EventHandler> = items.clone();
        for event_type in ITEM_EVENTS {
            router.register_handler(EventSide::Upstream, event_type, items_handler.clone(), 0)?;
        }

        let informational = handler_fn("trace", trace_upstream_event);
        for event_type in INFORMATIONAL_EVENTS {
            router.register_handler(EventSide::Upstream, event_type, informational.clone(), 0)?;
        }

        router.add_log_observer(lifecycle.clone());
        router.add_log_observer(Arc::new(FatalWatch {
            teardown: teardown.clone(),
        }));

        Ok(Bridge {
            config: self.config,
            router,
            audio,
            lifecycle,
            items,
            upstream,
            telephony,
            teardown,
        })
    }
}

pub struct Bridge {
    config: BridgeConfig,
    router: Arc<EventRouter>,
    audio: Arc<AudioStreamHandler>,
    lifecycle: Arc<ResponseLifecycle>,
    items: Arc<ConversationItems>,
    upstream: mpsc::Sender<ClientEvent>,
    telephony: mpsc::Sender<TelephonyRoute>,
    teardown: Arc<Teardown>,
}

impl Bridge {
    pub fn builder(config: BridgeConfig) -> BridgeBuilder {
        BridgeBuilder::new(config)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn audio(&self) -> &Arc<AudioStreamHandler> {
        &self.audio
    }

    pub fn lifecycle(&self) -> &Arc<ResponseLifecycle> {
        &self.lifecycle
    }

    /// Conversation items created upstream during this call, oldest first.
    pub fn conversation_items(&self) -> Vec<String> {
        self.items.ids.lock().clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.teardown.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.teardown.token.is_cancelled()
    }

    /// Stop both receive loops.
    pub fn shutdown(&self, reason: ShutdownReason) {
        self.teardown.trigger(reason);
    }

    /// Run both receive loops until teardown, then close the conversation.
    ///
    /// Within each loop frames are dispatched one at a time in arrival order.
    pub async fn run(
        &self,
        telephony_frames: &mut mpsc::Receiver<String>,
        upstream_frames: &mut mpsc::Receiver<String>,
    ) -> ShutdownReason {
        info!(bridge_kind = %self.audio.bridge_kind(), "Bridge started");

        tokio::join!(
            self.receive_loop(EventSide::Telephony, telephony_frames),
            self.receive_loop(EventSide::Upstream, upstream_frames),
        );

        let reason = self.teardown.reason();
        self.close(reason).await;
        reason
    }

    async fn receive_loop(&self, side: EventSide, frames: &mut mpsc::Receiver<String>) {
        let token = self.teardown.token.clone();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                frame = frames.recv() => match frame {
                    Some(raw) => {
                        let outcome = self.router.dispatch(side, &raw).await;
                        trace!(side = %side, ?outcome, "Frame processed");
                    }
                    None => {
                        debug!(side = %side, "Receive loop reached end of stream");
                        self.teardown.trigger(match side {
                            EventSide::Telephony => ShutdownReason::TelephonyClosed,
                            EventSide::Upstream => ShutdownReason::UpstreamClosed,
                        });
                        break;
                    }
                },
            }
        }
    }

    /// Leave the upstream session reusable after [`run`](Self::run) returns.
    ///
    /// Cancels a response that is still generating (or requested) and waits
    /// for its `response.done`, then deletes every item this conversation
    /// added. Returns false if the response could not be confirmed finished
    /// within `wait`; the connection must not be reused then.
    pub async fn settle_upstream(
        &self,
        upstream_frames: &mut mpsc::Receiver<String>,
        wait: Duration,
    ) -> bool {
        let mut awaiting_done = self.lifecycle.cancel_response().await;
        let mut awaiting_created = !awaiting_done && self.lifecycle.is_busy();
        let deadline = tokio::time::Instant::now() + wait;

        while awaiting_done || awaiting_created {
            let raw = match tokio::time::timeout_at(deadline, upstream_frames.recv()).await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    debug!("Upstream closed while settling");
                    return false;
                }
                Err(_) => {
                    warn!(?wait, "Upstream response did not finish after cancel");
                    return false;
                }
            };
            let Ok(event) = serde_json::from_str::<ServerEvent>(&raw) else {
                continue;
            };
            self.items.observe(&event);
            match event {
                ServerEvent::ResponseCreated { response } if awaiting_created => {
                    self.lifecycle.on_response_created(&response);
                    awaiting_created = false;
                    awaiting_done = self.lifecycle.cancel_response().await;
                    if !awaiting_done {
                        return false;
                    }
                }
                ServerEvent::ResponseDone { response } => {
                    debug!(response_id = %response.id, status = %response.status, "Response settled");
                    awaiting_done = false;
                    awaiting_created = false;
                }
                // The requested response was rejected
                ServerEvent::Error { error } if awaiting_created => {
                    debug!(code = error.kind(), "Pending response request failed while settling");
                    awaiting_created = false;
                }
                _ => {}
            }
        }

        let items = std::mem::take(&mut *self.items.ids.lock());
        for item_id in &items {
            let delete = ClientEvent::ConversationItemDelete {
                item_id: item_id.clone(),
            };
            if self.upstream.send(delete).await.is_err() {
                debug!("Upstream closed while deleting conversation items");
                return false;
            }
        }
        if !items.is_empty() {
            debug!(deleted = items.len(), "Conversation items deleted");
        }
        true
    }

    /// Stop playback, tell the caller why if the bot is ending the call, and
    /// close the telephony side.
    async fn close(&self, reason: ShutdownReason) {
        let conversation_id = self.audio.state().await.conversation_id;
        self.audio.close().await;

        if let ShutdownReason::Fatal(condition) = reason
            && let Some(conversation_id) = conversation_id.clone()
        {
            let end = TelephonyOutgoingMessage::SessionEnd {
                conversation_id,
                reason: condition.reason().to_string(),
            };
            if self.telephony.send(TelephonyRoute::Outgoing(end)).await.is_err() {
                debug!("Session end not delivered, telephony already closed");
            }
        }
        let _ = self.telephony.send(TelephonyRoute::Close).await;

        info!(
            conversation_id = conversation_id.as_deref().unwrap_or(""),
            reason = %reason,
            "Bridge closed"
        );
    }
}

/// Handles every telephony-side message.
struct TelephonyEvents {
    audio: Arc<AudioStreamHandler>,
    lifecycle: Arc<ResponseLifecycle>,
    telephony: mpsc::Sender<TelephonyRoute>,
    turn_detection: TurnDetectionMode,
    teardown: Arc<Teardown>,
}

impl TelephonyEvents {
    async fn reply(&self, message: TelephonyOutgoingMessage) -> BridgeResult<()> {
        self.telephony
            .send(TelephonyRoute::Outgoing(message))
            .await
            .map_err(|_| BridgeError::TelephonyClosed)
    }

    fn choose_media_format(&self, offered: &[String]) -> String {
        let preferred = self.audio.bridge_kind().default_media_format();
        if !offered.is_empty() && !offered.iter().any(|f| f == preferred) {
            warn!(
                offered = ?offered,
                preferred,
                "Caller did not offer the expected media format, using it anyway"
            );
        }
        preferred.to_string()
    }
}

#[async_trait]
impl EventHandler for TelephonyEvents {
    async fn handle(&self, event: &BridgeEvent) -> BridgeResult<()> {
        let BridgeEvent::Telephony(message) = event else {
            return Ok(());
        };
        message.validate_size().map_err(BridgeError::InvalidMessage)?;

        match message {
            TelephonyIncomingMessage::SessionInitiate {
                conversation_id,
                supported_media_formats,
                caller,
            } => {
                let media_format = self.choose_media_format(supported_media_formats);
                self.audio
                    .initialize_stream(conversation_id, &media_format)
                    .await;
                info!(
                    conversation_id = %conversation_id,
                    caller = caller.as_deref().unwrap_or("unknown"),
                    media_format = %media_format,
                    "Session initiated"
                );
                self.reply(TelephonyOutgoingMessage::SessionAccepted {
                    conversation_id: conversation_id.clone(),
                    media_format,
                })
                .await?;
            }
            TelephonyIncomingMessage::SessionResume { conversation_id } => {
                let state = self.audio.state().await;
                if state.conversation_id.as_deref() != Some(conversation_id.as_str()) {
                    self.audio
                        .initialize_stream(conversation_id, &state.media_format)
                        .await;
                }
                info!(conversation_id = %conversation_id, "Session resumed");
                self.reply(TelephonyOutgoingMessage::SessionAccepted {
                    conversation_id: conversation_id.clone(),
                    media_format: state.media_format,
                })
                .await?;
            }
            TelephonyIncomingMessage::SessionEnd {
                conversation_id,
                reason,
            } => {
                info!(
                    conversation_id = %conversation_id,
                    reason = reason.as_deref().unwrap_or(""),
                    "Caller ended the session"
                );
                self.teardown.trigger(ShutdownReason::CallerHangup);
            }
            TelephonyIncomingMessage::UserStreamStart { conversation_id } => {
                debug!(conversation_id = %conversation_id, "Caller stream started");
                self.reply(TelephonyOutgoingMessage::UserStreamStarted {
                    conversation_id: conversation_id.clone(),
                })
                .await?;
            }
            TelephonyIncomingMessage::UserStreamChunk { audio_chunk, .. } => {
                self.audio.handle_inbound_audio(audio_chunk).await;
            }
            TelephonyIncomingMessage::UserStreamStop { conversation_id } => {
                debug!(conversation_id = %conversation_id, "Caller stream stopped");
                self.reply(TelephonyOutgoingMessage::UserStreamStopped {
                    conversation_id: conversation_id.clone(),
                })
                .await?;
                if self.turn_detection == TurnDetectionMode::Manual
                    && self.audio.commit_audio_buffer().await
                {
                    self.lifecycle
                        .submit_user_input(UserInput::AudioCommitted)
                        .await;
                }
            }
            TelephonyIncomingMessage::Activities {
                conversation_id,
                activities,
            } => {
                for activity in activities {
                    if let Some(digit) = activity.dtmf_digit() {
                        info!(conversation_id = %conversation_id, digit, "DTMF received");
                        self.lifecycle
                            .submit_user_input(UserInput::Dtmf(digit.to_string()))
                            .await;
                    } else if activity.is_hangup() {
                        info!(conversation_id = %conversation_id, "Caller hung up");
                        self.teardown.trigger(ShutdownReason::CallerHangup);
                    } else {
                        debug!(
                            conversation_id = %conversation_id,
                            name = %activity.name,
                            "Ignoring activity"
                        );
                    }
                }
            }
            TelephonyIncomingMessage::ConnectionValidate { conversation_id } => {
                self.reply(TelephonyOutgoingMessage::ConnectionValidated {
                    conversation_id: conversation_id.clone(),
                    success: true,
                })
                .await?;
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "telephony"
    }
}

/// Ids of items added to the upstream conversation during this call.
#[derive(Default)]
struct ConversationItems {
    ids: Mutex<Vec<String>>,
}

impl ConversationItems {
    fn observe(&self, event: &ServerEvent) {
        match event {
            ServerEvent::ConversationItemCreated { item, .. }
            | ServerEvent::OutputItemAdded { item, .. } => {
                if let Some(id) = &item.id {
                    let mut ids = self.ids.lock();
                    if !ids.contains(id) {
                        ids.push(id.clone());
                    }
                }
            }
            ServerEvent::ConversationItemDeleted { item_id } => {
                self.ids.lock().retain(|id| id != item_id);
            }
            _ => {}
        }
    }
}

#[async_trait]
impl EventHandler for ConversationItems {
    async fn handle(&self, event: &BridgeEvent) -> BridgeResult<()> {
        if let BridgeEvent::Upstream(event) = event {
            self.observe(event);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "conversation_items"
    }
}

/// Ends the bridge when the router reports a fatal upstream condition.
struct FatalWatch {
    teardown: Arc<Teardown>,
}

#[async_trait]
impl LogObserver for FatalWatch {
    async fn on_log_event(&self, event: &LogEvent) {
        if let Some(condition) = event.fatal {
            self.teardown.trigger(ShutdownReason::Fatal(condition));
        }
    }
}

fn trace_upstream_event(event: &BridgeEvent) -> BridgeResult<()> {
    if let BridgeEvent::Upstream(event) = event {
        match event {
            ServerEvent::SessionCreated { session } | ServerEvent::SessionUpdated { session } => {
                debug!(session_id = %session.id, model = %session.model, "Upstream session ready");
            }
            other => trace!(event = ?other, "Upstream event"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build() -> (
        Bridge,
        mpsc::Receiver<ClientEvent>,
        mpsc::Receiver<TelephonyRoute>,
    ) {
        let (upstream_tx, upstream_rx) = mpsc::channel(64);
        let (telephony_tx, telephony_rx) = mpsc::channel(64);
        let mut config = BridgeConfig::default();
        config.audio.vad.enabled = false;
        let bridge = Bridge::builder(config)
            .build(upstream_tx, telephony_tx)
            .unwrap();
        (bridge, upstream_rx, telephony_rx)
    }

    #[test]
    fn test_every_non_logged_event_has_a_handler() {
        let (bridge, _up, _tel) = build();
        for event_type in EventType::ALL {
            let count = bridge.router().handler_count(event_type.side(), event_type);
            if event_type.is_log_event() {
                assert_eq!(count, 0, "{event_type} should go through the log path");
            } else {
                assert_eq!(count, 1, "{event_type} has no handler");
            }
        }
    }

    #[test]
    fn test_first_teardown_reason_wins() {
        let teardown = Teardown::default();
        teardown.trigger(ShutdownReason::CallerHangup);
        teardown.trigger(ShutdownReason::UpstreamClosed);
        assert!(teardown.token.is_cancelled());
        assert_eq!(teardown.reason(), ShutdownReason::CallerHangup);
    }

    #[tokio::test]
    async fn test_session_initiate_is_accepted() {
        let (bridge, _up, mut tel) = build();
        let raw = r#"{"type":"session.initiate","conversationId":"c1","supportedMediaFormats":["raw/lpcm16"]}"#;
        bridge.router().dispatch(EventSide::Telephony, raw).await;

        match tel.try_recv().unwrap() {
            TelephonyRoute::Outgoing(TelephonyOutgoingMessage::SessionAccepted {
                conversation_id,
                media_format,
            }) => {
                assert_eq!(conversation_id, "c1");
                assert_eq!(media_format, "raw/lpcm16");
            }
            other => panic!("Unexpected route: {other:?}"),
        }
        assert_eq!(
            bridge.audio().state().await.conversation_id.as_deref(),
            Some("c1")
        );
    }

    fn drain(rx: &mut mpsc::Receiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    async fn start_response(bridge: &Bridge) {
        for raw in [
            r#"{"type":"conversation.item.created","item":{"id":"item_user","type":"message"}}"#,
            r#"{"type":"response.created","response":{"id":"resp_1","status":"in_progress"}}"#,
            r#"{"type":"response.output_item.added","response_id":"resp_1","item":{"id":"item_bot","type":"message"}}"#,
        ] {
            bridge.router().dispatch(EventSide::Upstream, raw).await;
        }
    }

    #[tokio::test]
    async fn test_settle_cancels_active_response_and_deletes_items() {
        let (bridge, mut up, _tel) = build();
        start_response(&bridge).await;
        assert_eq!(bridge.conversation_items(), vec!["item_user", "item_bot"]);

        let (frames_tx, mut frames) = mpsc::channel(8);
        frames_tx
            .send(r#"{"type":"response.done","response":{"id":"resp_1","status":"cancelled"}}"#.to_string())
            .await
            .unwrap();

        assert!(bridge.settle_upstream(&mut frames, Duration::from_secs(1)).await);
        let sent: Vec<_> = drain(&mut up).iter().map(|e| e.type_name()).collect();
        assert_eq!(
            sent,
            vec!["response.cancel", "conversation.item.delete", "conversation.item.delete"]
        );
        assert!(bridge.conversation_items().is_empty());
    }

    #[tokio::test]
    async fn test_settle_fails_when_cancel_is_not_confirmed() {
        let (bridge, mut up, _tel) = build();
        start_response(&bridge).await;

        let (_frames_tx, mut frames) = mpsc::channel::<String>(8);
        assert!(!bridge.settle_upstream(&mut frames, Duration::from_millis(50)).await);
        let sent: Vec<_> = drain(&mut up).iter().map(|e| e.type_name()).collect();
        assert_eq!(sent, vec!["response.cancel"]);
    }

    #[tokio::test]
    async fn test_settle_idle_session_only_deletes_items() {
        let (bridge, mut up, _tel) = build();
        let raw = r#"{"type":"conversation.item.created","item":{"id":"item_1","type":"message"}}"#;
        bridge.router().dispatch(EventSide::Upstream, raw).await;
        let raw = r#"{"type":"conversation.item.deleted","item_id":"item_1"}"#;
        bridge.router().dispatch(EventSide::Upstream, raw).await;

        let (_frames_tx, mut frames) = mpsc::channel::<String>(8);
        assert!(bridge.settle_upstream(&mut frames, Duration::from_millis(50)).await);
        assert!(drain(&mut up).is_empty());
    }

    #[tokio::test]
    async fn test_hangup_activity_triggers_teardown() {
        let (bridge, _up, _tel) = build();
        let raw = r#"{"type":"activities","conversationId":"c1","activities":[{"type":"event","name":"hangup"}]}"#;
        bridge.router().dispatch(EventSide::Telephony, raw).await;
        assert!(bridge.is_shutting_down());
    }
}
