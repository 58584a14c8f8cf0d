//! Per-conversation audio stream handler.
//!
//! Inbound: caller audio is decoded, resampled to the internal rate, run
//! through VAD and quality analysis, padded to the upstream minimum and sent
//! upstream at 24 kHz. Outbound: upstream audio deltas are resampled to the
//! caller's rate and played through a single playback stream.
//!
//! Public entry points never return errors. Failures are logged per chunk and
//! the next chunk is processed normally.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::prelude::*;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::BridgeKind;
use super::pcm::{
    INTERNAL_SAMPLE_RATE, min_chunk_bytes, pad_to_min, pcm16_to_f32, resample_pcm16,
    resampled_byte_len,
};
use super::quality::{QualityAlertCallback, QualityMonitor, QualityThresholds};
use super::recorder::CallRecorder;
use crate::core::realtime::{ClientEvent, OPENAI_REALTIME_SAMPLE_RATE};
use crate::core::telephony::{CALLER_PARTICIPANT, TelephonyOutgoingMessage, TelephonyRoute};
use crate::core::vad::{FrameAccumulator, VADConfig, VADResult, VoiceActivityDetector, create_vad};
use crate::errors::{BridgeError, BridgeResult};

/// Smallest accumulated upstream buffer worth committing (100 ms at 16 kHz).
pub const MIN_COMMIT_BYTES: u64 = 3200;

#[derive(Debug, Clone)]
pub struct AudioHandlerConfig {
    pub bridge_kind: BridgeKind,
    pub vad: VADConfig,
    pub quality_monitoring: bool,
    pub quality_thresholds: QualityThresholds,
}

impl Default for AudioHandlerConfig {
    fn default() -> Self {
        Self {
            bridge_kind: BridgeKind::default(),
            vad: VADConfig::for_sample_rate(INTERNAL_SAMPLE_RATE),
            quality_monitoring: false,
            quality_thresholds: QualityThresholds::default(),
        }
    }
}

/// Audio state for one active call.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationAudioState {
    pub conversation_id: Option<String>,
    pub media_format: String,
    /// At most one playback stream is open at a time
    pub active_stream_id: Option<String>,
    pub chunks_sent: u64,
    /// Upstream-rate bytes of caller audio since the last commit
    pub total_bytes_sent: u64,
    pub speech_active: bool,
    pub internal_sample_rate: u32,
    pub bridge_kind: BridgeKind,
}

impl ConversationAudioState {
    fn new(bridge_kind: BridgeKind) -> Self {
        Self {
            conversation_id: None,
            media_format: bridge_kind.default_media_format().to_string(),
            active_stream_id: None,
            chunks_sent: 0,
            total_bytes_sent: 0,
            speech_active: false,
            internal_sample_rate: INTERNAL_SAMPLE_RATE,
            bridge_kind,
        }
    }
}

/// Detector plus the carry-over buffer that feeds it whole frames.
struct SpeechDetector {
    detector: Box<dyn VoiceActivityDetector>,
    frames: FrameAccumulator,
}

impl SpeechDetector {
    fn process(&mut self, pcm: &[u8]) -> anyhow::Result<Vec<VADResult>> {
        let samples = pcm16_to_f32(pcm);
        self.frames.push(&samples, self.detector.as_mut())
    }

    fn reset(&mut self) {
        self.detector.reset();
        self.frames.clear();
    }
}

pub struct AudioStreamHandler {
    config: AudioHandlerConfig,
    upstream: mpsc::Sender<ClientEvent>,
    telephony: mpsc::Sender<TelephonyRoute>,
    state: tokio::sync::Mutex<ConversationAudioState>,
    vad: Option<Mutex<SpeechDetector>>,
    quality: Option<Mutex<QualityMonitor>>,
    recorder: Option<Arc<dyn CallRecorder>>,
    closed: AtomicBool,
}

impl AudioStreamHandler {
    pub fn new(
        config: AudioHandlerConfig,
        upstream: mpsc::Sender<ClientEvent>,
        telephony: mpsc::Sender<TelephonyRoute>,
    ) -> Self {
        let vad = if config.vad.enabled {
            match create_vad(config.vad.clone()) {
                Ok(detector) => Some(Mutex::new(SpeechDetector {
                    detector,
                    frames: FrameAccumulator::new(config.vad.frame_size),
                })),
                Err(e) => {
                    warn!("VAD disabled, detector could not be created: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let quality = config.quality_monitoring.then(|| {
            Mutex::new(QualityMonitor::new(
                INTERNAL_SAMPLE_RATE,
                config.quality_thresholds.clone(),
            ))
        });

        Self {
            state: tokio::sync::Mutex::new(ConversationAudioState::new(config.bridge_kind)),
            config,
            upstream,
            telephony,
            vad,
            quality,
            recorder: None,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn CallRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Route quality alerts to `callback`. No effect when monitoring is off.
    pub fn with_quality_alert_callback(mut self, callback: QualityAlertCallback) -> Self {
        if self.quality.is_some() {
            let monitor = QualityMonitor::new(INTERNAL_SAMPLE_RATE, self.config.quality_thresholds.clone())
                .with_alert_callback(callback);
            self.quality = Some(Mutex::new(monitor));
        }
        self
    }

    pub fn bridge_kind(&self) -> BridgeKind {
        self.config.bridge_kind
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> ConversationAudioState {
        self.state.lock().await.clone()
    }

    pub async fn has_active_stream(&self) -> bool {
        self.state.lock().await.active_stream_id.is_some()
    }

    /// Start tracking a conversation. Resets counters and speech state.
    pub async fn initialize_stream(&self, conversation_id: &str, media_format: &str) {
        {
            let mut state = self.state.lock().await;
            state.conversation_id = Some(conversation_id.to_string());
            state.media_format = media_format.to_string();
            state.chunks_sent = 0;
            state.total_bytes_sent = 0;
            state.speech_active = false;
        }
        if let Some(vad) = &self.vad {
            vad.lock().reset();
        }
        info!(
            conversation_id,
            media_format,
            bridge_kind = %self.config.bridge_kind,
            "Audio stream initialized"
        );
    }

    // =========================================================================
    // Inbound (caller -> upstream)
    // =========================================================================

    /// Forward one caller audio chunk upstream.
    pub async fn handle_inbound_audio(&self, audio_b64: &str) {
        if self.is_closed() {
            trace!("Dropping inbound audio, handler closed");
            return;
        }
        if self.upstream.is_closed() {
            debug!("Dropping inbound audio, upstream connection closed");
            return;
        }

        if let Err(e) = self.process_inbound(audio_b64).await {
            warn!("Inbound audio chunk dropped: {}", e);
        }
    }

    async fn process_inbound(&self, audio_b64: &str) -> BridgeResult<()> {
        let raw = BASE64_STANDARD.decode(audio_b64)?;
        if raw.is_empty() {
            trace!("Ignoring empty audio chunk");
            return Ok(());
        }

        let source_rate = self.config.bridge_kind.source_sample_rate();
        let internal = resample_pcm16(&raw, source_rate, INTERNAL_SAMPLE_RATE);

        self.detect_speech(&internal).await;

        if let Some(quality) = &self.quality
            && let Err(e) = quality.lock().analyze(&internal)
        {
            debug!("Quality analysis skipped: {}", e);
        }

        if let Some(recorder) = &self.recorder {
            recorder.record_caller_audio(audio_b64);
        }

        let counted = resampled_byte_len(internal.len(), INTERNAL_SAMPLE_RATE, OPENAI_REALTIME_SAMPLE_RATE);
        let padded = pad_to_min(internal, min_chunk_bytes(INTERNAL_SAMPLE_RATE));
        let upstream_pcm = resample_pcm16(&padded, INTERNAL_SAMPLE_RATE, OPENAI_REALTIME_SAMPLE_RATE);

        self.upstream
            .send(ClientEvent::audio_append(&upstream_pcm))
            .await
            .map_err(|_| BridgeError::UpstreamClosed)?;

        let mut state = self.state.lock().await;
        state.chunks_sent += 1;
        state.total_bytes_sent += counted as u64;
        trace!(
            chunks_sent = state.chunks_sent,
            total_bytes_sent = state.total_bytes_sent,
            forwarded = upstream_pcm.len(),
            "Forwarded caller audio"
        );
        Ok(())
    }

    /// Run VAD and emit speech events on state flips only.
    async fn detect_speech(&self, pcm: &[u8]) {
        let Some(vad) = &self.vad else {
            return;
        };

        let results = match vad.lock().process(pcm) {
            Ok(results) => results,
            Err(e) => {
                debug!("VAD failed, treating chunk as no detection: {}", e);
                return;
            }
        };
        if results.is_empty() {
            return;
        }

        let (conversation_id, edges) = {
            let mut state = self.state.lock().await;
            let mut edges = Vec::new();
            for result in &results {
                if result.is_speech != state.speech_active {
                    state.speech_active = result.is_speech;
                    edges.push((result.is_speech, result.probability));
                }
            }
            (state.conversation_id.clone().unwrap_or_default(), edges)
        };

        for (started, probability) in edges {
            let message = if started {
                debug!(conversation_id = %conversation_id, probability, "Caller speech started");
                TelephonyOutgoingMessage::SpeechStarted {
                    conversation_id: conversation_id.clone(),
                    participant: CALLER_PARTICIPANT.to_string(),
                }
            } else {
                debug!(conversation_id = %conversation_id, probability, "Caller speech stopped");
                TelephonyOutgoingMessage::SpeechStopped {
                    conversation_id: conversation_id.clone(),
                    participant: CALLER_PARTICIPANT.to_string(),
                }
            };
            if let Err(e) = self.send_telephony(message).await {
                debug!("Speech event not delivered: {}", e);
            }
        }
    }

    /// Commit the upstream input buffer if enough audio has been sent.
    ///
    /// Returns whether a commit was sent. Short buffers are skipped, since the
    /// upstream API rejects commits under 100 ms.
    pub async fn commit_audio_buffer(&self) -> bool {
        if self.is_closed() {
            return false;
        }

        let mut state = self.state.lock().await;
        if state.total_bytes_sent < MIN_COMMIT_BYTES {
            debug!(
                total_bytes_sent = state.total_bytes_sent,
                min = MIN_COMMIT_BYTES,
                "Skipping commit, buffer too short"
            );
            return false;
        }

        if let Err(e) = self.upstream.send(ClientEvent::InputAudioBufferCommit).await {
            warn!("Failed to commit audio buffer: {}", e);
            return false;
        }

        info!(
            chunks = state.chunks_sent,
            bytes = state.total_bytes_sent,
            "Committed input audio buffer"
        );
        state.chunks_sent = 0;
        state.total_bytes_sent = 0;
        true
    }

    // =========================================================================
    // Outbound (upstream -> caller)
    // =========================================================================

    /// Play one upstream audio delta, opening the playback stream if needed.
    pub async fn handle_outbound_audio_delta(&self, delta_b64: &str) {
        if self.is_closed() {
            trace!("Dropping audio delta, handler closed");
            return;
        }

        let mut state = self.state.lock().await;
        let Some(conversation_id) = state.conversation_id.clone() else {
            debug!("Dropping audio delta, no active conversation");
            return;
        };

        let pcm = match BASE64_STANDARD.decode(delta_b64) {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!(conversation_id = %conversation_id, "Dropping undecodable audio delta: {}", e);
                return;
            }
        };
        let target_rate = self.config.bridge_kind.source_sample_rate();
        let audio_chunk = BASE64_STANDARD.encode(resample_pcm16(&pcm, OPENAI_REALTIME_SAMPLE_RATE, target_rate));

        let stream_id = match state.active_stream_id.clone() {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                let start = TelephonyOutgoingMessage::StreamStart {
                    conversation_id: conversation_id.clone(),
                    stream_id: id.clone(),
                    media_format: state.media_format.clone(),
                };
                if let Err(e) = self.send_telephony(start).await {
                    warn!(conversation_id = %conversation_id, "Failed to start playback stream: {}", e);
                    return;
                }
                info!(conversation_id = %conversation_id, stream_id = %id, "Playback stream started");
                state.active_stream_id = Some(id.clone());
                id
            }
        };

        let chunk = TelephonyOutgoingMessage::StreamChunk {
            conversation_id: conversation_id.clone(),
            stream_id: stream_id.clone(),
            audio_chunk,
        };
        if let Err(e) = self.send_telephony(chunk).await {
            warn!(conversation_id = %conversation_id, stream_id = %stream_id, "Failed to send playback chunk: {}", e);
            state.active_stream_id = None;
            return;
        }
        drop(state);

        if let Some(recorder) = &self.recorder {
            recorder.record_bot_audio(delta_b64);
        }
    }

    /// Stop the playback stream if one is active. Returns whether one was.
    ///
    /// The stream id is cleared even when the stop message cannot be sent.
    pub async fn stop_stream(&self) -> bool {
        let (conversation_id, stream_id) = {
            let mut state = self.state.lock().await;
            match state.active_stream_id.take() {
                Some(id) => (state.conversation_id.clone().unwrap_or_default(), id),
                None => return false,
            }
        };

        let stop = TelephonyOutgoingMessage::StreamStop {
            conversation_id: conversation_id.clone(),
            stream_id: stream_id.clone(),
        };
        match self.send_telephony(stop).await {
            Ok(()) => info!(conversation_id = %conversation_id, stream_id = %stream_id, "Playback stream stopped"),
            Err(e) => debug!(conversation_id = %conversation_id, stream_id = %stream_id, "Stream stop not delivered: {}", e),
        }
        true
    }

    /// Stop playback and refuse further audio. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_stream().await;
        if let Some(vad) = &self.vad {
            vad.lock().reset();
        }
        let state = self.state.lock().await;
        info!(
            conversation_id = state.conversation_id.as_deref().unwrap_or(""),
            "Audio stream handler closed"
        );
    }

    async fn send_telephony(&self, message: TelephonyOutgoingMessage) -> BridgeResult<()> {
        self.telephony
            .send(TelephonyRoute::Outgoing(message))
            .await
            .map_err(|_| BridgeError::TelephonyClosed)
    }
}
