use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use zeroize::Zeroizing;

use super::ServerConfig;
use crate::core::audio::BridgeKind;
use crate::core::realtime::{RealtimeVoice, TurnDetectionMode};

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///
/// openai:
///   api_key: "sk-..."
///   url: "wss://api.openai.com/v1/realtime"
///   model: "gpt-4o-realtime-preview"
///   voice: "alloy"
///   instructions: "You are a helpful phone agent."
///   turn_detection: "server_vad"
///   transcription_model: "whisper-1"
///   temperature: 0.8
///
/// audio:
///   bridge_kind: "audiocodes"
///   vad_enabled: true
///   vad_threshold: 0.5
///   quality_monitoring: false
///
/// pool:
///   max_size: 10
///   max_age_secs: 3600
///   max_idle_secs: 300
///   max_sessions: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub openai: Option<OpenAIYaml>,
    pub audio: Option<AudioYaml>,
    pub pool: Option<PoolYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OpenAIYaml {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    /// "server_vad" or "manual"
    pub turn_detection: Option<String>,
    /// "none" disables caller transcription
    pub transcription_model: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    /// "audiocodes" or "twilio"
    pub bridge_kind: Option<String>,
    pub vad_enabled: Option<bool>,
    pub vad_threshold: Option<f32>,
    pub quality_monitoring: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PoolYaml {
    pub max_size: Option<usize>,
    pub max_age_secs: Option<u64>,
    pub max_idle_secs: Option<u64>,
    pub max_sessions: Option<u32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Required fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }

    /// Override `config` with every value present in this file.
    pub fn apply(self, config: &mut ServerConfig) -> Result<(), String> {
        if let Some(server) = self.server {
            if let Some(host) = server.host {
                config.host = host;
            }
            if let Some(port) = server.port {
                config.port = port;
            }
        }

        if let Some(openai) = self.openai {
            let realtime = &mut config.realtime;
            if let Some(key) = openai.api_key {
                realtime.api_key = Zeroizing::new(key);
            }
            if let Some(url) = openai.url {
                realtime.url = url;
            }
            if let Some(model) = openai.model {
                realtime.model = model;
            }
            if let Some(voice) = openai.voice {
                realtime.voice = RealtimeVoice::from_str_or_default(&voice);
            }
            if let Some(instructions) = openai.instructions {
                realtime.instructions = Some(instructions);
            }
            if let Some(mode) = openai.turn_detection {
                realtime.turn_detection = TurnDetectionMode::from_str_or_default(&mode);
            }
            if let Some(model) = openai.transcription_model {
                realtime.transcription_model =
                    (!model.eq_ignore_ascii_case("none")).then_some(model);
            }
            if let Some(temperature) = openai.temperature {
                realtime.temperature = Some(temperature);
            }
        }

        if let Some(audio) = self.audio {
            if let Some(kind) = audio.bridge_kind {
                config.audio.bridge_kind = BridgeKind::parse(&kind).ok_or_else(|| {
                    format!("Invalid audio.bridge_kind '{kind}': expected audiocodes or twilio")
                })?;
            }
            if let Some(enabled) = audio.vad_enabled {
                config.audio.vad_enabled = enabled;
            }
            if let Some(threshold) = audio.vad_threshold {
                config.audio.vad_threshold = threshold;
            }
            if let Some(enabled) = audio.quality_monitoring {
                config.audio.quality_monitoring = enabled;
            }
        }

        if let Some(pool) = self.pool {
            if let Some(max_size) = pool.max_size {
                config.pool.max_size = max_size;
            }
            if let Some(secs) = pool.max_age_secs {
                config.pool.max_age = Duration::from_secs(secs);
            }
            if let Some(secs) = pool.max_idle_secs {
                config.pool.max_idle = Duration::from_secs(secs);
            }
            if let Some(max_sessions) = pool.max_sessions {
                config.pool.max_sessions = max_sessions;
            }
        }

        Ok(())
    }
}
