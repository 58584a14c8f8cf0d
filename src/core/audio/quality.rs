//! Inbound audio quality monitoring.
//!
//! Computes level, clipping, SNR and THD estimates for PCM16 chunks, folds
//! them into a 0-100 score and reports threshold breaches through an alert
//! callback. Nothing here affects the audio that is forwarded.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::pcm::pcm16_to_f32;

/// Floor reported for digital silence.
const MIN_DBFS: f32 = -96.0;

/// Samples at or above this magnitude count as clipped.
const CLIP_LEVEL: f32 = 0.99;

/// Chunks whose peak stays below this are treated as silence for alerting.
const SILENCE_PEAK_DBFS: f32 = -70.0;

/// Frame length for SNR energy tracking.
const SNR_FRAME_MS: u32 = 10;

/// Frames of history kept for the noise floor (3 s).
const SNR_HISTORY_FRAMES: usize = 300;

/// Frames required before an SNR estimate is reported (200 ms).
const SNR_MIN_FRAMES: usize = 20;

const MAX_SNR_DB: f32 = 60.0;

/// Highest harmonic included in the THD estimate.
const THD_MAX_HARMONIC: u32 = 5;

#[derive(Debug, Error, PartialEq)]
pub enum QualityError {
    #[error("Empty audio chunk")]
    Empty,
    #[error("PCM16 chunk has odd length {0}")]
    OddLength(usize),
}

/// Alert thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub min_snr_db: f32,
    pub max_thd_percent: f32,
    pub max_clipping_ratio: f32,
    pub min_level_dbfs: f32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_snr_db: 15.0,
            max_thd_percent: 10.0,
            max_clipping_ratio: 0.01,
            min_level_dbfs: -50.0,
        }
    }
}

/// Metrics for one analyzed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityMetrics {
    pub rms_dbfs: f32,
    pub peak_dbfs: f32,
    /// Fraction of samples at full scale
    pub clipping_ratio: f32,
    /// `None` until enough history has been collected
    pub snr_db: Option<f32>,
    /// `None` when no stable fundamental could be found
    pub thd_percent: Option<f32>,
    /// 0 (unusable) to 100 (clean)
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityAlertKind {
    Clipping,
    LowSnr,
    HighDistortion,
    LowLevel,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityAlert {
    pub kind: QualityAlertKind,
    pub value: f32,
    pub threshold: f32,
    pub message: String,
}

pub type QualityAlertCallback = Arc<dyn Fn(QualityAlert) + Send + Sync>;

pub struct QualityMonitor {
    sample_rate: u32,
    thresholds: QualityThresholds,
    on_alert: Option<QualityAlertCallback>,
    energy_history: VecDeque<f32>,
    chunks_analyzed: u64,
}

impl QualityMonitor {
    pub fn new(sample_rate: u32, thresholds: QualityThresholds) -> Self {
        Self {
            sample_rate,
            thresholds,
            on_alert: None,
            energy_history: VecDeque::with_capacity(SNR_HISTORY_FRAMES),
            chunks_analyzed: 0,
        }
    }

    pub fn with_alert_callback(mut self, callback: QualityAlertCallback) -> Self {
        self.on_alert = Some(callback);
        self
    }

    pub fn chunks_analyzed(&self) -> u64 {
        self.chunks_analyzed
    }

    /// Analyze one PCM16 chunk and raise alerts for breached thresholds.
    pub fn analyze(&mut self, pcm: &[u8]) -> Result<QualityMetrics, QualityError> {
        if pcm.is_empty() {
            return Err(QualityError::Empty);
        }
        if pcm.len() % 2 != 0 {
            return Err(QualityError::OddLength(pcm.len()));
        }

        let samples = pcm16_to_f32(pcm);
        let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
        let rms = (sum_squares / samples.len() as f32).sqrt();
        let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        let clipped = samples.iter().filter(|s| s.abs() >= CLIP_LEVEL).count();

        self.track_frame_energies(&samples);

        let mut metrics = QualityMetrics {
            rms_dbfs: to_dbfs(rms),
            peak_dbfs: to_dbfs(peak),
            clipping_ratio: clipped as f32 / samples.len() as f32,
            snr_db: self.estimate_snr(),
            thd_percent: estimate_thd(&samples, self.sample_rate),
            score: 0.0,
        };
        metrics.score = self.score(&metrics);
        self.chunks_analyzed += 1;

        debug!(
            rms_dbfs = metrics.rms_dbfs,
            peak_dbfs = metrics.peak_dbfs,
            clipping_ratio = metrics.clipping_ratio,
            snr_db = ?metrics.snr_db,
            thd_percent = ?metrics.thd_percent,
            score = metrics.score,
            "Audio quality"
        );

        self.raise_alerts(&metrics);
        Ok(metrics)
    }

    fn track_frame_energies(&mut self, samples: &[f32]) {
        let frame_len = (self.sample_rate * SNR_FRAME_MS / 1000).max(1) as usize;
        for frame in samples.chunks(frame_len) {
            let energy = frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32;
            if self.energy_history.len() == SNR_HISTORY_FRAMES {
                self.energy_history.pop_front();
            }
            self.energy_history.push_back(energy);
        }
    }

    /// Ratio of the 90th to the 10th percentile frame energy.
    fn estimate_snr(&self) -> Option<f32> {
        if self.energy_history.len() < SNR_MIN_FRAMES {
            return None;
        }
        let mut energies: Vec<f32> = self.energy_history.iter().copied().collect();
        energies.sort_by(|a, b| a.total_cmp(b));

        let last = energies.len() - 1;
        let noise = energies[last / 10].max(1e-10);
        let signal = energies[last * 9 / 10];
        if signal <= 1e-10 {
            return Some(0.0);
        }
        Some((10.0 * (signal / noise).log10()).clamp(0.0, MAX_SNR_DB))
    }

    fn score(&self, m: &QualityMetrics) -> f32 {
        let t = &self.thresholds;
        let mut score = 100.0f32;

        if m.rms_dbfs < t.min_level_dbfs {
            score -= (t.min_level_dbfs - m.rms_dbfs).min(30.0);
        }
        score -= (m.clipping_ratio * 1000.0).min(40.0);
        if let Some(snr) = m.snr_db
            && snr < t.min_snr_db
        {
            score -= ((t.min_snr_db - snr) * 2.0).min(30.0);
        }
        if let Some(thd) = m.thd_percent
            && thd > t.max_thd_percent
        {
            score -= ((thd - t.max_thd_percent) * 0.5).min(20.0);
        }

        score.clamp(0.0, 100.0)
    }

    fn raise_alerts(&self, m: &QualityMetrics) {
        let t = &self.thresholds;
        let mut alerts = Vec::new();

        if m.clipping_ratio > t.max_clipping_ratio {
            alerts.push(QualityAlert {
                kind: QualityAlertKind::Clipping,
                value: m.clipping_ratio,
                threshold: t.max_clipping_ratio,
                message: format!("{:.1}% of samples clipped", m.clipping_ratio * 100.0),
            });
        }

        if let Some(thd) = m.thd_percent
            && thd > t.max_thd_percent
        {
            alerts.push(QualityAlert {
                kind: QualityAlertKind::HighDistortion,
                value: thd,
                threshold: t.max_thd_percent,
                message: format!("THD {thd:.1}%"),
            });
        }

        // Silence between utterances is expected; only judge chunks with signal.
        if m.peak_dbfs > SILENCE_PEAK_DBFS {
            if m.rms_dbfs < t.min_level_dbfs {
                alerts.push(QualityAlert {
                    kind: QualityAlertKind::LowLevel,
                    value: m.rms_dbfs,
                    threshold: t.min_level_dbfs,
                    message: format!("Input level {:.1} dBFS", m.rms_dbfs),
                });
            }
            if let Some(snr) = m.snr_db
                && snr < t.min_snr_db
            {
                alerts.push(QualityAlert {
                    kind: QualityAlertKind::LowSnr,
                    value: snr,
                    threshold: t.min_snr_db,
                    message: format!("SNR {snr:.1} dB"),
                });
            }
        }

        for alert in alerts {
            warn!(kind = ?alert.kind, value = alert.value, threshold = alert.threshold, "{}", alert.message);
            if let Some(cb) = &self.on_alert {
                cb(alert);
            }
        }
    }
}

fn to_dbfs(linear: f32) -> f32 {
    if linear <= 0.0 {
        MIN_DBFS
    } else {
        (20.0 * linear.log10()).max(MIN_DBFS)
    }
}

/// Fundamental frequency from the spacing of positive-going zero crossings.
fn estimate_fundamental(samples: &[f32], sample_rate: u32) -> Option<f32> {
    let crossings: Vec<usize> = samples
        .windows(2)
        .enumerate()
        .filter(|(_, w)| w[0] < 0.0 && w[1] >= 0.0)
        .map(|(i, _)| i + 1)
        .collect();

    let (first, last) = (*crossings.first()?, *crossings.last()?);
    if crossings.len() < 3 || last == first {
        return None;
    }
    let span_secs = (last - first) as f32 / sample_rate as f32;
    Some((crossings.len() - 1) as f32 / span_secs)
}

fn goertzel_power(samples: &[f32], sample_rate: u32, freq: f32) -> f32 {
    let coeff = 2.0 * (2.0 * PI * freq / sample_rate as f32).cos();
    let (mut s_prev, mut s_prev2) = (0.0f32, 0.0f32);
    for &x in samples {
        let s = x + coeff * s_prev - s_prev2;
        s_prev2 = s_prev;
        s_prev = s;
    }
    (s_prev2 * s_prev2 + s_prev * s_prev - coeff * s_prev * s_prev2).max(0.0)
}

/// Total harmonic distortion of harmonics 2..=5 relative to the fundamental.
fn estimate_thd(samples: &[f32], sample_rate: u32) -> Option<f32> {
    let f0 = estimate_fundamental(samples, sample_rate)?;
    let nyquist = sample_rate as f32 / 2.0;
    if !(50.0..nyquist / 2.0).contains(&f0) {
        return None;
    }

    let fundamental = goertzel_power(samples, sample_rate, f0);
    if fundamental <= f32::EPSILON {
        return None;
    }
    let harmonics: f32 = (2..=THD_MAX_HARMONIC)
        .map(|h| f0 * h as f32)
        .take_while(|f| *f < nyquist)
        .map(|f| goertzel_power(samples, sample_rate, f))
        .sum();

    Some((harmonics / fundamental).sqrt() * 100.0)
}
