//! Environment variable loading.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use zeroize::Zeroizing;

use super::ServerConfig;
use crate::core::audio::BridgeKind;
use crate::core::realtime::{RealtimeVoice, TurnDetectionMode};

/// Every variable read by [`load`].
pub(super) const ENV_VARS: [&str; 18] = [
    "HOST",
    "PORT",
    "OPENAI_API_KEY",
    "OPENAI_REALTIME_URL",
    "OPENAI_REALTIME_MODEL",
    "OPENAI_REALTIME_VOICE",
    "OPENAI_TEMPERATURE",
    "REALTIME_INSTRUCTIONS",
    "TURN_DETECTION",
    "TRANSCRIPTION_MODEL",
    "BRIDGE_KIND",
    "VAD_ENABLED",
    "VAD_THRESHOLD",
    "QUALITY_MONITORING",
    "POOL_MAX_SIZE",
    "POOL_MAX_AGE_SECS",
    "POOL_MAX_IDLE_SECS",
    "POOL_MAX_SESSIONS",
];

/// Build a configuration from environment variables over defaults.
pub(super) fn load() -> Result<ServerConfig, String> {
    let mut config = ServerConfig::default();

    if let Some(host) = var("HOST") {
        config.host = host;
    }
    if let Some(port) = parse("PORT")? {
        config.port = port;
    }

    let realtime = &mut config.realtime;
    if let Some(key) = var("OPENAI_API_KEY") {
        realtime.api_key = Zeroizing::new(key);
    }
    if let Some(url) = var("OPENAI_REALTIME_URL") {
        realtime.url = url;
    }
    if let Some(model) = var("OPENAI_REALTIME_MODEL") {
        realtime.model = model;
    }
    if let Some(voice) = var("OPENAI_REALTIME_VOICE") {
        realtime.voice = RealtimeVoice::from_str_or_default(&voice);
    }
    if let Some(temperature) = parse("OPENAI_TEMPERATURE")? {
        realtime.temperature = Some(temperature);
    }
    if let Some(instructions) = var("REALTIME_INSTRUCTIONS") {
        realtime.instructions = Some(instructions);
    }
    if let Some(mode) = var("TURN_DETECTION") {
        realtime.turn_detection = TurnDetectionMode::from_str_or_default(&mode);
    }
    if let Some(model) = var("TRANSCRIPTION_MODEL") {
        // "none" disables caller transcription
        realtime.transcription_model = (!model.eq_ignore_ascii_case("none")).then_some(model);
    }

    let audio = &mut config.audio;
    if let Some(kind) = var("BRIDGE_KIND") {
        audio.bridge_kind = BridgeKind::parse(&kind)
            .ok_or_else(|| format!("Invalid BRIDGE_KIND '{kind}': expected audiocodes or twilio"))?;
    }
    if let Some(enabled) = parse_bool("VAD_ENABLED")? {
        audio.vad_enabled = enabled;
    }
    if let Some(threshold) = parse("VAD_THRESHOLD")? {
        audio.vad_threshold = threshold;
    }
    if let Some(enabled) = parse_bool("QUALITY_MONITORING")? {
        audio.quality_monitoring = enabled;
    }

    let pool = &mut config.pool;
    if let Some(max_size) = parse("POOL_MAX_SIZE")? {
        pool.max_size = max_size;
    }
    if let Some(secs) = parse("POOL_MAX_AGE_SECS")? {
        pool.max_age = Duration::from_secs(secs);
    }
    if let Some(secs) = parse("POOL_MAX_IDLE_SECS")? {
        pool.max_idle = Duration::from_secs(secs);
    }
    if let Some(max_sessions) = parse("POOL_MAX_SESSIONS")? {
        pool.max_sessions = max_sessions;
    }

    Ok(config)
}

/// A set, non-blank variable.
fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse<T>(name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: Display,
{
    var(name)
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| format!("Invalid {name} value '{v}': {e}"))
        })
        .transpose()
}

fn parse_bool_str(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_bool(name: &str) -> Result<Option<bool>, String> {
    var(name)
        .map(|v| parse_bool_str(&v).ok_or_else(|| format!("Invalid {name} value '{v}': expected a boolean")))
        .transpose()
}
