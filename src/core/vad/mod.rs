//! Voice Activity Detection (VAD) module
//!
//! Flags whether short frames of caller audio contain speech. The audio
//! handler turns per-frame results into edge-triggered speech events.
//!
//! # Example
//!
//! ```rust,ignore
//! use voice_bridge::core::vad::{create_vad, FrameAccumulator, VADConfig};
//!
//! let config = VADConfig::default();
//! let mut vad = create_vad(config.clone())?;
//! let mut frames = FrameAccumulator::new(config.frame_size);
//!
//! // Chunks of any length; results come back once per 512-sample frame.
//! for result in frames.push(&samples, vad.as_mut())? {
//!     println!("speech={} p={:.2}", result.is_speech, result.probability);
//! }
//! ```

pub mod config;
pub mod detector;

pub use config::VADConfig;
pub use detector::{EnergyVAD, FrameAccumulator, VADResult, VoiceActivityDetector};

use anyhow::Result;

/// Create the default detector for the given configuration
pub fn create_vad(config: VADConfig) -> Result<Box<dyn VoiceActivityDetector>> {
    Ok(Box::new(EnergyVAD::new(config)?))
}
