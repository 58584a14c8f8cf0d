//! Response lifecycle
//!
//! Serializes model response generation per session. At most one response is
//! generating (or requested) at a time; user input arriving meanwhile is
//! parked in a single pending slot and turned into exactly one new request
//! when the current response finishes.
//!
//! ```text
//!   Idle ──response.created──▶ Generating ──response.done──▶ Idle
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::function::FunctionCallHandler;
use super::transcript::{TranscriptRole, TranscriptSink};
use crate::core::audio::AudioStreamHandler;
use crate::core::realtime::{ApiError, ClientEvent, ConversationItem, Response, ServerEvent};
use crate::core::router::{BridgeEvent, EventHandler, LogEvent, LogObserver};
use crate::errors::{BridgeError, BridgeResult};

/// A caller turn that should produce a model response.
#[derive(Debug, Clone, PartialEq)]
pub enum UserInput {
    /// The input audio buffer was committed upstream
    AudioCommitted,
    Text(String),
    /// A keypad digit pressed by the caller
    Dtmf(String),
}

impl UserInput {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AudioCommitted => "audio",
            Self::Text(_) => "text",
            Self::Dtmf(_) => "dtmf",
        }
    }

    /// Item to add to the conversation before requesting a response.
    fn conversation_item(&self) -> Option<ConversationItem> {
        match self {
            Self::AudioCommitted => None,
            Self::Text(text) => Some(ConversationItem::user_text(text.clone())),
            Self::Dtmf(digit) => Some(ConversationItem::user_text(format!(
                "The caller pressed {digit} on the keypad."
            ))),
        }
    }
}

impl fmt::Display for UserInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseState {
    /// True between `response.created` and the matching `response.done`
    pub response_active: bool,
    pub current_response_id: Option<String>,
    pub pending_user_input: Option<UserInput>,
    /// A `response.create` was sent and `response.created` has not arrived
    pub create_in_flight: bool,
    /// Response cancelled by the bridge; its remaining audio is discarded
    pub cancelled_response_id: Option<String>,
}

impl ResponseState {
    fn busy(&self) -> bool {
        self.response_active || self.create_in_flight
    }
}

/// What `submit_user_input` did with the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// A response was requested now
    Issued,
    /// Parked until the current response finishes
    Queued,
    /// The request could not be sent
    Failed,
}

pub struct ResponseLifecycle {
    upstream: mpsc::Sender<ClientEvent>,
    audio: Arc<AudioStreamHandler>,
    transcripts: Arc<dyn TranscriptSink>,
    functions: Arc<dyn FunctionCallHandler>,
    state: Mutex<ResponseState>,
}

impl ResponseLifecycle {
    pub fn new(
        upstream: mpsc::Sender<ClientEvent>,
        audio: Arc<AudioStreamHandler>,
        transcripts: Arc<dyn TranscriptSink>,
        functions: Arc<dyn FunctionCallHandler>,
    ) -> Self {
        Self {
            upstream,
            audio,
            transcripts,
            functions,
            state: Mutex::new(ResponseState::default()),
        }
    }

    pub fn state(&self) -> ResponseState {
        self.state.lock().clone()
    }

    pub fn is_response_active(&self) -> bool {
        self.state.lock().response_active
    }

    /// True while a response is generating or has been requested.
    pub fn is_busy(&self) -> bool {
        self.state.lock().busy()
    }

    /// Request a response for `input`, or park it if one is already underway.
    ///
    /// Only the newest parked input is kept.
    pub async fn submit_user_input(&self, input: UserInput) -> Submission {
        {
            let mut state = self.state.lock();
            if state.busy() {
                if let Some(replaced) = state.pending_user_input.replace(input.clone()) {
                    warn!(
                        replaced = replaced.kind(),
                        kept = input.kind(),
                        "Pending user input replaced by newer input"
                    );
                } else {
                    debug!(input = input.kind(), "Response underway, user input queued");
                }
                return Submission::Queued;
            }
            state.create_in_flight = true;
        }

        match self.issue(&input).await {
            Ok(()) => {
                debug!(input = input.kind(), "Response requested");
                Submission::Issued
            }
            Err(e) => {
                warn!(input = input.kind(), error = %e, "Failed to request response");
                self.state.lock().create_in_flight = false;
                Submission::Failed
            }
        }
    }

    pub fn on_response_created(&self, response: &Response) {
        let mut state = self.state.lock();
        state.response_active = true;
        state.create_in_flight = false;
        state.current_response_id = Some(response.id.clone());
        info!(response_id = %response.id, "Response started");
        if let Some(pending) = &state.pending_user_input {
            info!(
                response_id = %response.id,
                input = pending.kind(),
                "Pending user input will be handled after this response"
            );
        }
    }

    /// Finish the current response and issue at most one queued request.
    ///
    /// The pending slot is cleared even if the request cannot be sent.
    pub async fn on_response_done(&self, response: &Response) {
        let pending = {
            let mut state = self.state.lock();
            state.response_active = false;
            state.current_response_id = None;
            if state.cancelled_response_id.as_deref() == Some(response.id.as_str()) {
                state.cancelled_response_id = None;
            }
            let pending = state.pending_user_input.take();
            if pending.is_some() {
                state.create_in_flight = true;
            }
            pending
        };

        self.audio.stop_stream().await;
        self.functions.on_response_done(&response.id);

        let Some(input) = pending else {
            return;
        };
        info!(
            response_id = %response.id,
            input = input.kind(),
            "Processing queued user input"
        );
        if let Err(e) = self.issue(&input).await {
            warn!(input = input.kind(), error = %e, "Queued user input dropped");
            self.state.lock().create_in_flight = false;
        }
    }

    /// An upstream error may have rejected our create request.
    pub fn on_upstream_error(&self, error: &ApiError) {
        let mut state = self.state.lock();
        if state.create_in_flight {
            debug!(code = error.kind(), "Clearing in-flight response request after error");
            state.create_in_flight = false;
        }
    }

    /// The caller started talking; cut the bot off.
    pub async fn on_speech_started(&self) {
        if self.audio.stop_stream().await {
            info!("Caller barged in, playback stopped");
        }
        self.cancel_response().await;
    }

    /// Ask upstream to stop the active response.
    ///
    /// Returns true if `response.cancel` was sent. Audio deltas of the
    /// cancelled response are dropped until its `response.done`.
    pub async fn cancel_response(&self) -> bool {
        let response_id = {
            let mut state = self.state.lock();
            let Some(response_id) = state.current_response_id.clone() else {
                return false;
            };
            if !state.response_active
                || state.cancelled_response_id.as_deref() == Some(response_id.as_str())
            {
                return false;
            }
            state.cancelled_response_id = Some(response_id.clone());
            response_id
        };

        match self.send(ClientEvent::ResponseCancel).await {
            Ok(()) => {
                info!(response_id = %response_id, "Response cancelled");
                true
            }
            Err(e) => {
                warn!(response_id = %response_id, error = %e, "Failed to cancel response");
                false
            }
        }
    }

    fn is_cancelled(&self, response_id: &str) -> bool {
        self.state.lock().cancelled_response_id.as_deref() == Some(response_id)
    }

    async fn issue(&self, input: &UserInput) -> BridgeResult<()> {
        if let Some(item) = input.conversation_item() {
            self.send(ClientEvent::ConversationItemCreate { item }).await?;
        }
        self.send(ClientEvent::ResponseCreate).await
    }

    async fn send(&self, event: ClientEvent) -> BridgeResult<()> {
        self.upstream
            .send(event)
            .await
            .map_err(|_| BridgeError::UpstreamClosed)
    }
}

#[async_trait]
impl EventHandler for ResponseLifecycle {
    async fn handle(&self, event: &BridgeEvent) -> BridgeResult<()> {
        let BridgeEvent::Upstream(event) = event else {
            return Ok(());
        };

        match event {
            ServerEvent::ResponseCreated { response } => self.on_response_created(response),
            ServerEvent::AudioDelta { at, delta } => {
                if self.is_cancelled(&at.response_id) {
                    trace!(response_id = %at.response_id, "Dropping audio of cancelled response");
                } else {
                    self.audio.handle_outbound_audio_delta(delta).await;
                }
            }
            ServerEvent::AudioDone { .. } => {
                self.audio.stop_stream().await;
            }
            ServerEvent::InputTranscriptionDelta { item_id, delta, .. } => {
                self.transcripts.on_delta(TranscriptRole::User, item_id, delta);
            }
            ServerEvent::InputTranscriptionCompleted {
                item_id,
                transcript,
                ..
            } => {
                self.transcripts.on_done(TranscriptRole::User, item_id, transcript);
            }
            ServerEvent::InputTranscriptionFailed { item_id, error } => {
                warn!(item_id = %item_id, code = error.kind(), "Input transcription failed");
            }
            ServerEvent::AudioTranscriptDelta { at, delta } => {
                self.transcripts
                    .on_delta(TranscriptRole::Assistant, &at.item_id, delta);
            }
            ServerEvent::AudioTranscriptDone { at, transcript } => {
                self.transcripts
                    .on_done(TranscriptRole::Assistant, &at.item_id, transcript);
            }
            ServerEvent::FunctionCallArgumentsDelta { call_id, delta, .. } => {
                self.functions.on_arguments_delta(call_id, delta);
            }
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
                ..
            } => {
                self.functions
                    .on_arguments_done(call_id, name.as_deref(), arguments);
            }
            _ => {}
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "response_lifecycle"
    }
}

#[async_trait]
impl LogObserver for ResponseLifecycle {
    async fn on_log_event(&self, event: &LogEvent) {
        match &event.event {
            ServerEvent::ResponseDone { response } => self.on_response_done(response).await,
            ServerEvent::SpeechStarted { .. } => self.on_speech_started().await,
            ServerEvent::Error { error } => self.on_upstream_error(error),
            _ => {}
        }
    }
}
