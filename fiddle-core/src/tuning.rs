//! # Musical Tuning Module
//!
//! Conversions between frequencies and the continuous note index used by
//! the trackers, plus note labels for display.
//!
//! ## Note index
//! - Integer values are semitones; fractional values lie between them
//! - The reference frequency (A4, 440 Hz by default) maps to note 60
//! - `note = 12 * log2(f / reference) + 60`

use serde::{Deserialize, Serialize};

/// Default reference pitch for note 60.
pub const DEFAULT_REFERENCE_HZ: f32 = 440.0;

/// Reference values at or below this are rejected.
pub const MIN_REFERENCE_HZ: f32 = 55.0;

/// Note index of the reference pitch.
pub const REFERENCE_NOTE: f32 = 60.0;

const NOTE_NAMES_ENGLISH: [&str; 12] = [
    "A", "A#", "B", "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#",
];
const NOTE_NAMES_FRENCH: [&str; 12] = [
    "La", "La#", "Si", "Do", "Do#", "Re", "Re#", "Mi", "Fa", "Fa#", "Sol", "Sol#",
];

/// Note naming convention. Only affects labels, never tracker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteNaming {
    #[default]
    English,
    French,
}

impl NoteNaming {
    /// The twelve pitch class names starting at A.
    pub fn names(self) -> &'static [&'static str; 12] {
        match self {
            NoteNaming::English => &NOTE_NAMES_ENGLISH,
            NoteNaming::French => &NOTE_NAMES_FRENCH,
        }
    }
}

/// Replaces an unusable reference frequency with the default.
pub fn sanitize_reference(reference: f32) -> f32 {
    if reference.is_finite() && reference > MIN_REFERENCE_HZ {
        reference
    } else {
        DEFAULT_REFERENCE_HZ
    }
}

/// Converts a frequency to a fractional note index.
///
/// Returns NaN for NaN, zero or negative frequencies, so an unvoiced
/// window stays unvoiced through the conversion.
pub fn frequency_to_note(frequency: f32, reference: f32) -> f32 {
    if frequency.is_nan() || frequency <= 0.0 {
        return f32::NAN;
    }
    12.0 * (frequency / reference).log2() + REFERENCE_NOTE
}

/// Converts a note index back to a frequency.
pub fn note_to_frequency(note: f32, reference: f32) -> f32 {
    reference * 2.0_f32.powf((note - REFERENCE_NOTE) / 12.0)
}

/// Deviation from the nearest semitone in cents (-50..=50).
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - Positive values indicate sharpness, negative values indicate flatness
pub fn cents_from_nearest(note: f32) -> f32 {
    (note - note.round()) * 100.0
}

/// Label of an integer note index, e.g. `A4` for 60 or `Do5` in french for 63.
///
/// The name cycles every 12 notes starting at A; the octave changes at C.
pub fn note_label(note: i32, naming: NoteNaming) -> String {
    let name = naming.names()[note.rem_euclid(12) as usize];
    let octave = (note + 9).div_euclid(12) - 1;
    format!("{}{}", name, octave)
}
