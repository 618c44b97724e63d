//! # Configuration Module
//!
//! Two layers of configuration live here:
//! - [`TunerSettings`]: user-facing values owned by the front-end and read
//!   by the core (analysis rate, reference pitch, sensitivity, naming).
//! - [`CaptureConfig`]: the immutable parameters of one capture session,
//!   derived once negotiation and estimator initialisation have succeeded.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;
use crate::tuning::{self, NoteNaming};

/// Default number of analyses per second.
pub const DEFAULT_ANALYSIS_RATE_HZ: u32 = 30;

/// Size of each non-blocking read issued while draining the backlog.
pub const DRAIN_CHUNK_SAMPLES: usize = 8192;

/// The capture buffer holds this many seconds of audio.
pub const BUFFER_SECONDS: usize = 2;

/// A capture sample rate paired with the decimation ratio the estimator
/// applies at that rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCandidate {
    pub rate: u32,
    pub ratio: u32,
}

impl RateCandidate {
    pub const fn new(rate: u32, ratio: u32) -> Self {
        Self { rate, ratio }
    }
}

/// Candidates tried in order. Lower rates come first since they are
/// cheaper to analyse; the ratio keeps the effective rate around 8-12 kHz.
pub const DEFAULT_RATE_CANDIDATES: [RateCandidate; 6] = [
    RateCandidate::new(8000, 1),
    RateCandidate::new(11025, 1),
    RateCandidate::new(16000, 2),
    RateCandidate::new(22050, 2),
    RateCandidate::new(44100, 4),
    RateCandidate::new(48000, 4),
];

/// User settings consumed read-only by the core.
///
/// Every field has a default so a partial JSON file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerSettings {
    /// Analyses per second.
    pub analysis_rate_hz: u32,
    /// Frequency mapped to note 60. Values at or below 55 Hz fall back to 440 Hz.
    pub base_frequency: f32,
    /// Minimum window energy for a sample to be treated as voiced.
    pub min_volume_sensitivity: f64,
    pub note_naming: NoteNaming,
    pub note_min_tolerance_cents: f32,
    pub note_max_tolerance_cents: f32,
    pub rate_candidates: Vec<RateCandidate>,
}

impl Default for TunerSettings {
    fn default() -> Self {
        Self {
            analysis_rate_hz: DEFAULT_ANALYSIS_RATE_HZ,
            base_frequency: tuning::DEFAULT_REFERENCE_HZ,
            min_volume_sensitivity: 5.0,
            note_naming: NoteNaming::English,
            note_min_tolerance_cents: 5.0,
            note_max_tolerance_cents: 15.0,
            rate_candidates: DEFAULT_RATE_CANDIDATES.to_vec(),
        }
    }
}

impl TunerSettings {
    /// The reference frequency with out-of-range values replaced by the default.
    pub fn reference_frequency(&self) -> f32 {
        tuning::sanitize_reference(self.base_frequency)
    }
}

/// Loads settings from a JSON file. Missing fields take their defaults.
pub fn load_settings(path: &Path) -> Result<TunerSettings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading settings from {}", path.display()))?;
    let settings = serde_json::from_str(&content)
        .with_context(|| format!("parsing settings in {}", path.display()))?;
    Ok(settings)
}

/// Parameters of a single capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub downsample_ratio: u32,
    /// Length of every analysis window, in captured samples.
    pub analysis_window_length: usize,
    /// Samples between two consecutive analyses.
    pub analysis_interval_samples: usize,
    pub analysis_rate_hz: u32,
    pub buffer_capacity: usize,
    pub drain_chunk: usize,
    /// Minimum device buffer size reported during negotiation.
    pub buffer_size_hint: usize,
}

impl CaptureConfig {
    pub fn new(
        sample_rate: u32,
        downsample_ratio: u32,
        analysis_window_length: usize,
        analysis_rate_hz: u32,
        buffer_size_hint: usize,
    ) -> Result<Self, CaptureError> {
        if sample_rate == 0 {
            return Err(CaptureError::Config("sample rate must be positive".into()));
        }
        if analysis_rate_hz == 0 {
            return Err(CaptureError::Config("analysis rate must be positive".into()));
        }
        let buffer_capacity = sample_rate as usize * BUFFER_SECONDS;
        if analysis_window_length == 0 || analysis_window_length > buffer_capacity / 2 {
            return Err(CaptureError::Config(format!(
                "analysis window of {} samples does not fit half of a {} sample buffer",
                analysis_window_length, buffer_capacity
            )));
        }

        Ok(Self {
            sample_rate,
            downsample_ratio,
            analysis_window_length,
            analysis_interval_samples: interval_for(sample_rate, analysis_rate_hz),
            analysis_rate_hz,
            buffer_capacity,
            drain_chunk: DRAIN_CHUNK_SAMPLES,
            buffer_size_hint,
        })
    }

    /// Same session parameters with the interval recomputed for a new analysis rate.
    pub fn with_analysis_rate(self, analysis_rate_hz: u32) -> Result<Self, CaptureError> {
        if analysis_rate_hz == 0 {
            return Err(CaptureError::Config("analysis rate must be positive".into()));
        }
        Ok(Self {
            analysis_interval_samples: interval_for(self.sample_rate, analysis_rate_hz),
            analysis_rate_hz,
            ..self
        })
    }
}

fn interval_for(sample_rate: u32, analysis_rate_hz: u32) -> usize {
    ((sample_rate / analysis_rate_hz) as usize).max(1)
}
