//! PCM 16-bit helpers used on both audio paths.
//!
//! All buffers handled here are signed 16-bit little-endian mono samples.
//! Durations follow `duration_ms = bytes / (sample_rate * 2) * 1000`.

/// Sample rate used inside the bridge for VAD and quality analysis.
pub const INTERNAL_SAMPLE_RATE: u32 = 16_000;

/// Bytes per PCM16 sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Shortest buffer the upstream API accepts, in milliseconds.
pub const MIN_CHUNK_DURATION_MS: u32 = 100;

/// Scale factor for i16 -> f32 normalization.
const PCM_TO_FLOAT_SCALE: f32 = 1.0 / 32768.0;

/// Minimum buffer size in bytes at the given rate (`0.1 * rate * 2`).
#[inline]
pub fn min_chunk_bytes(sample_rate: u32) -> usize {
    bytes_for_duration_ms(MIN_CHUNK_DURATION_MS, sample_rate)
}

/// Byte length of `duration_ms` of audio at `sample_rate`.
#[inline]
pub fn bytes_for_duration_ms(duration_ms: u32, sample_rate: u32) -> usize {
    (sample_rate as usize * duration_ms as usize / 1000) * BYTES_PER_SAMPLE
}

/// Duration in milliseconds of a PCM16 buffer of `bytes` length.
#[inline]
pub fn duration_ms(bytes: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    bytes as f64 / (sample_rate as f64 * BYTES_PER_SAMPLE as f64) * 1000.0
}

/// Byte length of a buffer after [`resample_pcm16`], without resampling it.
#[inline]
pub fn resampled_byte_len(bytes: usize, from_rate: u32, to_rate: u32) -> usize {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return bytes;
    }
    let samples = bytes / BYTES_PER_SAMPLE;
    (samples as u64 * to_rate as u64 / from_rate as u64) as usize * BYTES_PER_SAMPLE
}

/// Decode little-endian bytes into samples. A trailing odd byte is ignored.
pub fn bytes_to_samples(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(BYTES_PER_SAMPLE)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Encode samples as little-endian bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Normalize PCM16 bytes into mono f32 in `[-1.0, 1.0)`.
pub fn pcm16_to_f32(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(BYTES_PER_SAMPLE)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 * PCM_TO_FLOAT_SCALE)
        .collect()
}

/// Resample PCM16 samples with linear interpolation.
///
/// Output length is `floor(len * to_rate / from_rate)`, which keeps the
/// duration of the buffer constant up to one output sample.
pub fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let new_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let ratio = from_rate as f64 / to_rate as f64;
    let last = samples.len() - 1;

    let mut resampled = Vec::with_capacity(new_len);
    for i in 0..new_len {
        let src_idx = i as f64 * ratio;
        let idx0 = (src_idx.floor() as usize).min(last);
        let idx1 = (idx0 + 1).min(last);
        let frac = src_idx - idx0 as f64;

        let sample = samples[idx0] as f64 * (1.0 - frac) + samples[idx1] as f64 * frac;
        resampled.push(sample.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
    }
    resampled
}

/// Resample a PCM16 byte buffer. Convenience wrapper over [`resample_linear`].
pub fn resample_pcm16(data: &[u8], from_rate: u32, to_rate: u32) -> Vec<u8> {
    if from_rate == to_rate {
        return data.to_vec();
    }
    samples_to_bytes(&resample_linear(&bytes_to_samples(data), from_rate, to_rate))
}

/// Right-pad `data` with zero bytes up to `min_len`. Longer buffers are untouched.
pub fn pad_to_min(mut data: Vec<u8>, min_len: usize) -> Vec<u8> {
    if data.len() < min_len {
        data.resize(min_len, 0);
    }
    data
}
