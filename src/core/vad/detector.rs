//! Energy-based VAD detector and the frame accumulator that feeds it.

use anyhow::Result;
use tracing::{debug, trace};

use super::config::VADConfig;

/// Result of VAD processing for a single audio frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VADResult {
    /// Whether the current frame contains speech
    pub is_speech: bool,
    /// Speech probability (0.0 - 1.0)
    pub probability: f32,
}

/// Trait for Voice Activity Detection implementations
///
/// Implementations receive exactly `config().frame_size` normalized mono samples
/// per call.
pub trait VoiceActivityDetector: Send + Sync {
    /// Process a single audio frame and return VAD result
    fn process_frame(&mut self, audio: &[f32]) -> Result<VADResult>;

    /// Reset internal state (call when starting a new audio stream)
    fn reset(&mut self);

    /// Get the configuration
    fn config(&self) -> &VADConfig;
}

/// RMS energy detector mapping signal level to a speech probability.
///
/// The level in dBFS goes through a logistic curve centred on
/// `energy_midpoint_dbfs`, then an exponential moving average.
pub struct EnergyVAD {
    config: VADConfig,
    smoothed_probability: f32,
    total_frames: u64,
}

impl EnergyVAD {
    /// Create a new energy detector
    pub fn new(config: VADConfig) -> Result<Self> {
        config.validate()?;
        debug!(
            threshold = config.threshold,
            midpoint_dbfs = config.energy_midpoint_dbfs,
            frame_size = config.frame_size,
            "Energy VAD initialized"
        );
        Ok(Self {
            config,
            smoothed_probability: 0.0,
            total_frames: 0,
        })
    }

    /// Total frames processed since creation or reset
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn level_dbfs(audio: &[f32]) -> f32 {
        if audio.is_empty() {
            return f32::NEG_INFINITY;
        }
        let sum_squares: f32 = audio.iter().map(|s| s * s).sum();
        let rms = (sum_squares / audio.len() as f32).sqrt();
        if rms <= f32::EPSILON {
            f32::NEG_INFINITY
        } else {
            20.0 * rms.log10()
        }
    }
}

impl VoiceActivityDetector for EnergyVAD {
    fn process_frame(&mut self, audio: &[f32]) -> Result<VADResult> {
        if audio.len() != self.config.frame_size {
            anyhow::bail!(
                "VAD frame must contain {} samples, got {}",
                self.config.frame_size,
                audio.len()
            );
        }

        let level = Self::level_dbfs(audio);
        let raw_probability = if level.is_finite() {
            1.0 / (1.0 + (-(level - self.config.energy_midpoint_dbfs) / self.config.energy_slope_db).exp())
        } else {
            0.0
        };

        let alpha = self.config.smoothing_factor;
        self.smoothed_probability = alpha * self.smoothed_probability + (1.0 - alpha) * raw_probability;
        self.total_frames += 1;

        trace!(level_dbfs = level, probability = self.smoothed_probability, "VAD frame");

        Ok(VADResult {
            is_speech: self.smoothed_probability >= self.config.threshold,
            probability: self.smoothed_probability,
        })
    }

    fn reset(&mut self) {
        self.smoothed_probability = 0.0;
        self.total_frames = 0;
    }

    fn config(&self) -> &VADConfig {
        &self.config
    }
}

/// Splits arbitrarily sized chunks into fixed detector frames.
///
/// Samples that do not fill a frame are carried over to the next chunk.
pub struct FrameAccumulator {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameAccumulator {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size * 2),
        }
    }

    /// Append samples and run the detector on every completed frame.
    ///
    /// Returns one result per frame, in order. Stops at the first detector
    /// error; samples of the failing frame are discarded.
    pub fn push(
        &mut self,
        samples: &[f32],
        detector: &mut dyn VoiceActivityDetector,
    ) -> Result<Vec<VADResult>> {
        self.pending.extend_from_slice(samples);

        let mut results = Vec::new();
        let mut consumed = 0;
        let mut outcome = Ok(());
        while self.pending.len() - consumed >= self.frame_size {
            let frame = &self.pending[consumed..consumed + self.frame_size];
            consumed += self.frame_size;
            match detector.process_frame(frame) {
                Ok(result) => results.push(result),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        self.pending.drain(..consumed);

        outcome.map(|_| results)
    }

    /// Samples waiting for the next frame
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
