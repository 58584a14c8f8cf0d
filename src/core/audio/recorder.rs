//! Call recording contract.
//!
//! Recorders receive the base64 payloads exactly as they crossed the bridge.
//! Both calls are fire-and-forget: they must not block and cannot fail the
//! audio path.

use base64::prelude::*;
use parking_lot::Mutex;
use tracing::trace;

pub trait CallRecorder: Send + Sync {
    fn record_caller_audio(&self, audio_b64: &str);
    fn record_bot_audio(&self, audio_b64: &str);
}

/// Keeps both sides of the call in memory as decoded PCM16.
#[derive(Default)]
pub struct MemoryRecorder {
    caller: Mutex<Vec<u8>>,
    bot: Mutex<Vec<u8>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn caller_audio(&self) -> Vec<u8> {
        self.caller.lock().clone()
    }

    pub fn bot_audio(&self) -> Vec<u8> {
        self.bot.lock().clone()
    }

    fn append(target: &Mutex<Vec<u8>>, audio_b64: &str) {
        match BASE64_STANDARD.decode(audio_b64) {
            Ok(pcm) => target.lock().extend_from_slice(&pcm),
            Err(e) => trace!("Recorder skipped undecodable chunk: {}", e),
        }
    }
}

impl CallRecorder for MemoryRecorder {
    fn record_caller_audio(&self, audio_b64: &str) {
        Self::append(&self.caller, audio_b64);
    }

    fn record_bot_audio(&self, audio_b64: &str) {
        Self::append(&self.bot, audio_b64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_recorder_keeps_sides_apart() {
        let recorder = MemoryRecorder::new();
        recorder.record_caller_audio(&BASE64_STANDARD.encode([1u8, 2]));
        recorder.record_caller_audio(&BASE64_STANDARD.encode([3u8, 4]));
        recorder.record_bot_audio(&BASE64_STANDARD.encode([9u8, 9]));
        recorder.record_bot_audio("not base64!");

        assert_eq!(recorder.caller_audio(), vec![1, 2, 3, 4]);
        assert_eq!(recorder.bot_audio(), vec![9, 9]);
    }
}
