//! VAD configuration types

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Configuration for Voice Activity Detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VADConfig {
    /// Enable/disable VAD processing on inbound caller audio
    pub enabled: bool,

    /// Speech probability threshold (0.0 - 1.0)
    /// Higher values = stricter detection, fewer false positives
    pub threshold: f32,

    /// Signal level (dBFS) at which the energy detector reports a 0.5 probability
    pub energy_midpoint_dbfs: f32,

    /// Width of the logistic curve around the midpoint, in dB
    pub energy_slope_db: f32,

    /// EMA smoothing factor applied to raw probabilities (0.0 = no smoothing)
    pub smoothing_factor: f32,

    /// Sample rate for audio processing (Hz)
    pub sample_rate: u32,

    /// Frame size in samples (512 at 16kHz = 32ms, 256 at 8kHz)
    pub frame_size: usize,
}

impl Default for VADConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.5,
            energy_midpoint_dbfs: -40.0,
            energy_slope_db: 4.0,
            smoothing_factor: 0.5,
            sample_rate: 16000,
            frame_size: 512, // 32ms at 16kHz
        }
    }
}

impl VADConfig {
    /// Create a new VADConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame size the detector expects at a given sample rate.
    pub fn frame_size_for_rate(sample_rate: u32) -> usize {
        if sample_rate <= 8000 { 256 } else { 512 }
    }

    /// Create a config for the given sample rate with the matching frame size.
    pub fn for_sample_rate(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frame_size: Self::frame_size_for_rate(sample_rate),
            ..Default::default()
        }
    }

    /// Calculate frame duration in milliseconds
    pub fn frame_duration_ms(&self) -> f32 {
        (self.frame_size as f32 / self.sample_rate as f32) * 1000.0
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.threshold < 0.0 || self.threshold > 1.0 {
            anyhow::bail!("VAD threshold must be between 0.0 and 1.0");
        }
        if self.sample_rate != 16000 && self.sample_rate != 8000 {
            anyhow::bail!("VAD only supports 16000 Hz or 8000 Hz sample rates");
        }
        if self.frame_size == 0 {
            anyhow::bail!("VAD frame_size must be greater than 0");
        }
        if !(0.0..1.0).contains(&self.smoothing_factor) {
            anyhow::bail!("VAD smoothing_factor must be in [0.0, 1.0)");
        }
        if self.energy_slope_db <= 0.0 {
            anyhow::bail!("VAD energy_slope_db must be positive");
        }
        Ok(())
    }
}
