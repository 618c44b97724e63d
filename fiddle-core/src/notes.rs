//! # Note Tracking Module
//!
//! Turns the per-window frequency stream into a smoothed note signal.
//!
//! - **Smoothing**: a first-order low-pass on the current note, bypassed
//!   for jumps of 4 semitones or more so real note changes do not lag
//! - **Continuity**: a raw note only counts as stable if the previous raw
//!   note was within half a semitone; only stable notes move the drift state
//! - **Drift**: `mean_note` follows stable notes slowly and `base_note`
//!   re-centers on it with a ±1 semitone dead band

use crate::PitchSample;
use crate::tuning;

/// Consecutive raw notes closer than this are considered continuous.
pub const CONTINUITY_THRESHOLD: f32 = 0.5;
/// Changes at or above this many semitones snap instead of being smoothed.
pub const SNAP_THRESHOLD: f32 = 4.0;
/// Low-pass factor applied to small changes.
pub const SMOOTHING_FACTOR: f32 = 0.5;
/// Rate at which `mean_note` follows stable notes.
pub const MEAN_FACTOR: f32 = 0.02;
/// Half-width of the band `mean_note` may move in before `base_note` follows.
pub const DRIFT_DEAD_BAND: f32 = 1.0;

/// Where the drift state starts before any pitch has been heard.
const INITIAL_NOTE: f32 = 48.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteTrackState {
    /// Smoothed note, NaN while unvoiced.
    pub current_note: f32,
    pub mean_note: f32,
    /// Center of the display, never below 0.
    pub base_note: f32,
    /// Raw note of the previous update, NaN after an unvoiced one.
    pub previous_note: f32,
    /// Latest raw note that passed the continuity check.
    pub last_valid_note: f32,
}

/// Result of one tracker update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteUpdate {
    pub state: NoteTrackState,
    /// Note computed from this sample alone.
    pub raw_note: f32,
    /// Whether `raw_note` continued the previous one.
    pub continuous: bool,
}

#[derive(Debug, Clone)]
pub struct NoteTracker {
    reference: f32,
    state: NoteTrackState,
}

impl NoteTracker {
    pub fn new(reference: f32) -> Self {
        Self {
            reference: tuning::sanitize_reference(reference),
            state: NoteTrackState {
                current_note: f32::NAN,
                mean_note: INITIAL_NOTE,
                base_note: INITIAL_NOTE,
                previous_note: f32::NAN,
                last_valid_note: INITIAL_NOTE,
            },
        }
    }

    pub fn reference(&self) -> f32 {
        self.reference
    }

    pub fn set_reference(&mut self, reference: f32) {
        self.reference = tuning::sanitize_reference(reference);
    }

    pub fn state(&self) -> NoteTrackState {
        self.state
    }

    pub fn update(&mut self, sample: &PitchSample) -> NoteUpdate {
        self.update_frequency(sample.frequency_hz)
    }

    pub fn update_frequency(&mut self, frequency_hz: f32) -> NoteUpdate {
        self.update_note(tuning::frequency_to_note(frequency_hz, self.reference))
    }

    /// Feeds one raw note index (NaN when unvoiced).
    pub fn update_note(&mut self, raw: f32) -> NoteUpdate {
        let state = &mut self.state;

        if raw.is_nan() {
            state.current_note = f32::NAN;
            state.previous_note = f32::NAN;
            return NoteUpdate {
                state: *state,
                raw_note: raw,
                continuous: false,
            };
        }

        // NaN previous notes compare false, which breaks the chain.
        let continuous = (state.previous_note - raw).abs() < CONTINUITY_THRESHOLD;

        if state.current_note.is_finite() && (raw - state.current_note).abs() < SNAP_THRESHOLD {
            state.current_note += SMOOTHING_FACTOR * (raw - state.current_note);
        } else {
            state.current_note = raw;
        }

        if continuous {
            state.last_valid_note = raw;
            state.mean_note += MEAN_FACTOR * (raw - state.mean_note);

            if state.mean_note > state.base_note + DRIFT_DEAD_BAND {
                state.base_note = state.mean_note - DRIFT_DEAD_BAND;
            }
            if state.mean_note < state.base_note - DRIFT_DEAD_BAND {
                state.base_note = (state.mean_note + DRIFT_DEAD_BAND).max(0.0);
            }
        }

        state.previous_note = raw;

        NoteUpdate {
            state: *state,
            raw_note: raw,
            continuous,
        }
    }
}

impl Default for NoteTracker {
    fn default() -> Self {
        Self::new(tuning::DEFAULT_REFERENCE_HZ)
    }
}
