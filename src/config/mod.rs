//! Configuration module for the voice bridge server
//!
//! Configuration comes from `.env` files, environment variables and an
//! optional YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `env`: Environment variable loading
//! - `yaml`: YAML configuration file loading
//!
//! # Example
//! ```rust,no_run
//! use voice_bridge::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

mod env;
mod yaml;

pub use yaml::YamlConfig;

use crate::bridge::BridgeConfig;
use crate::core::audio::pcm::INTERNAL_SAMPLE_RATE;
use crate::core::audio::{AudioHandlerConfig, BridgeKind, QualityThresholds};
use crate::core::pool::PoolConfig;
use crate::core::realtime::RealtimeSettings;
use crate::core::vad::VADConfig;

/// Caller-side audio processing options.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSettings {
    /// Integration used when the route does not name one
    pub bridge_kind: BridgeKind,
    pub vad_enabled: bool,
    pub vad_threshold: f32,
    pub quality_monitoring: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            bridge_kind: BridgeKind::default(),
            vad_enabled: true,
            vad_threshold: VADConfig::default().threshold,
            quality_monitoring: false,
        }
    }
}

/// Server configuration
///
/// Contains:
/// - Listen address
/// - Upstream realtime session settings (API key zeroized on drop)
/// - Caller audio processing options
/// - Upstream connection pool limits
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub realtime: RealtimeSettings,
    pub audio: AudioSettings,
    pub pool: PoolConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            realtime: RealtimeSettings::default(),
            audio: AudioSettings::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables over defaults.
    ///
    /// The `.env` file is loaded in `main` before this runs, so its values
    /// show up here as ordinary environment variables.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = env::load()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = YamlConfig::from_file(path)?;
        let mut config = env::load()?;
        yaml_config.apply(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the server address as "host:port".
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check value ranges. The API key is checked when a connection is made.
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("PORT must be non-zero".to_string());
        }
        if !(0.0..=1.0).contains(&self.audio.vad_threshold) {
            return Err(format!(
                "VAD threshold must be between 0.0 and 1.0, got {}",
                self.audio.vad_threshold
            ));
        }
        if self.pool.max_size == 0 {
            return Err("Pool max size must be at least 1".to_string());
        }
        if self.pool.max_sessions == 0 {
            return Err("Pool max sessions must be at least 1".to_string());
        }
        if let Some(temperature) = self.realtime.temperature
            && !(0.6..=1.2).contains(&temperature)
        {
            return Err(format!(
                "Realtime temperature must be between 0.6 and 1.2, got {temperature}"
            ));
        }
        Ok(())
    }

    /// Per-conversation bridge settings for one telephony integration.
    pub fn bridge_config(&self, bridge_kind: BridgeKind) -> BridgeConfig {
        let vad = VADConfig {
            enabled: self.audio.vad_enabled,
            threshold: self.audio.vad_threshold,
            ..VADConfig::for_sample_rate(INTERNAL_SAMPLE_RATE)
        };
        BridgeConfig {
            audio: AudioHandlerConfig {
                bridge_kind,
                vad,
                quality_monitoring: self.audio.quality_monitoring,
                quality_thresholds: QualityThresholds::default(),
            },
            turn_detection: self.realtime.turn_detection,
        }
    }
}
