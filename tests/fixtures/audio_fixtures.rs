//! Audio Test Fixtures
//!
//! Generated audio keeps inputs reproducible without external files.
//! All buffers are 16-bit signed little-endian mono PCM.

use std::f32::consts::PI;

use base64::prelude::*;

/// Number of samples in `duration_ms` at `sample_rate`.
pub fn samples_for_ms(duration_ms: u32, sample_rate: u32) -> usize {
    (sample_rate as usize * duration_ms as usize) / 1000
}

/// Generate silence (zeros)
pub fn generate_silence(duration_samples: usize) -> Vec<i16> {
    vec![0i16; duration_samples]
}

/// Generate a sine wave tone
pub fn generate_sine_wave(
    duration_samples: usize,
    frequency: f32,
    amplitude: f32,
    sample_rate: u32,
) -> Vec<i16> {
    let max_amplitude = amplitude * i16::MAX as f32;
    let angular_freq = 2.0 * PI * frequency / sample_rate as f32;

    (0..duration_samples)
        .map(|i| ((angular_freq * i as f32).sin() * max_amplitude) as i16)
        .collect()
}

pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Base64 PCM16 tone of `duration_ms` at `sample_rate`, as telephony sends it.
pub fn tone_chunk_b64(duration_ms: u32, sample_rate: u32) -> String {
    let samples = generate_sine_wave(
        samples_for_ms(duration_ms, sample_rate),
        440.0,
        0.3,
        sample_rate,
    );
    BASE64_STANDARD.encode(samples_to_bytes(&samples))
}

/// Base64 PCM16 silence of `duration_ms` at `sample_rate`.
pub fn silence_chunk_b64(duration_ms: u32, sample_rate: u32) -> String {
    let samples = generate_silence(samples_for_ms(duration_ms, sample_rate));
    BASE64_STANDARD.encode(samples_to_bytes(&samples))
}

/// Decoded byte length of a base64 payload.
pub fn decoded_len(b64: &str) -> usize {
    BASE64_STANDARD.decode(b64).map(|d| d.len()).unwrap_or(0)
}
