//! Audio path: PCM helpers, quality monitoring, recording and the per-call
//! stream handler.

pub mod handler;
pub mod pcm;
pub mod quality;
pub mod recorder;

pub use handler::{AudioHandlerConfig, AudioStreamHandler, ConversationAudioState, MIN_COMMIT_BYTES};
pub use quality::{QualityAlert, QualityAlertKind, QualityMetrics, QualityMonitor, QualityThresholds};
pub use recorder::{CallRecorder, MemoryRecorder};

use serde::{Deserialize, Serialize};

/// Telephony integration on the caller side of the bridge.
///
/// Both speak the same JSON envelope; they differ in the PCM16 rate of the
/// caller's audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeKind {
    #[default]
    AudioCodes,
    Twilio,
}

impl BridgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AudioCodes => "audiocodes",
            Self::Twilio => "twilio",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "audiocodes" => Some(Self::AudioCodes),
            "twilio" => Some(Self::Twilio),
            _ => None,
        }
    }

    /// Sample rate of caller audio and of the playback the caller expects.
    pub fn source_sample_rate(&self) -> u32 {
        match self {
            Self::AudioCodes => 16_000,
            Self::Twilio => 8_000,
        }
    }

    /// Media format announced when the caller does not offer one.
    pub fn default_media_format(&self) -> &'static str {
        match self {
            Self::AudioCodes => "raw/lpcm16",
            Self::Twilio => "raw/lpcm16_8",
        }
    }
}

impl std::fmt::Display for BridgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
