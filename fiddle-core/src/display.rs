//! # Display Pipeline Module
//!
//! Consumer-side processing of pitch samples: an optional volume gate,
//! then the note tracker, feeding the scale tracker and the note history.
//! Runs on the consumer's thread; nothing here touches the capture loop.

use log::trace;

use crate::PitchSample;
use crate::config::TunerSettings;
use crate::history::{HistoryEntry, NoteHistory};
use crate::notes::{NoteTracker, NoteUpdate};
use crate::scale::{ScaleTracker, Tolerance};
use crate::tuning::{self, NoteNaming};

/// Decides whether a sample is loud enough to be treated as voiced.
pub trait SampleGate {
    fn admit(&self, sample: &PitchSample) -> bool;
}

impl<F: Fn(&PitchSample) -> bool> SampleGate for F {
    fn admit(&self, sample: &PitchSample) -> bool {
        self(sample)
    }
}

/// Admits every sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenGate;

impl SampleGate for OpenGate {
    fn admit(&self, _sample: &PitchSample) -> bool {
        true
    }
}

/// Admits samples whose energy reaches a minimum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyThreshold {
    pub min_energy: f32,
}

impl SampleGate for EnergyThreshold {
    fn admit(&self, sample: &PitchSample) -> bool {
        sample.energy >= self.min_energy
    }
}

/// Everything a tuner view needs, updated per sample and per frame.
pub struct NoteDisplay<G = EnergyThreshold> {
    gate: G,
    tracker: NoteTracker,
    scale: ScaleTracker,
    history: NoteHistory,
    tolerance: Tolerance,
    naming: NoteNaming,
}

impl NoteDisplay<EnergyThreshold> {
    /// Builds a display gated on the configured minimum volume.
    pub fn from_settings(settings: &TunerSettings, history_len: usize) -> Self {
        let gate = EnergyThreshold {
            min_energy: settings.min_volume_sensitivity as f32,
        };
        let mut display = Self::new(gate, settings.reference_frequency(), history_len);
        display.tolerance = Tolerance::from_cents(
            settings.note_min_tolerance_cents,
            settings.note_max_tolerance_cents,
        );
        display.naming = settings.note_naming;
        display
    }
}

impl<G: SampleGate> NoteDisplay<G> {
    pub fn new(gate: G, reference: f32, history_len: usize) -> Self {
        Self {
            gate,
            tracker: NoteTracker::new(reference),
            scale: ScaleTracker::new(),
            history: NoteHistory::new(history_len),
            tolerance: Tolerance::default(),
            naming: NoteNaming::default(),
        }
    }

    /// Processes one sample from the capture session.
    ///
    /// Gated-out samples count as unvoiced. The history records the
    /// smoothed note for samples that continue the previous one and a gap
    /// for everything else.
    pub fn ingest(&mut self, sample: &PitchSample) -> NoteUpdate {
        let admitted = self.gate.admit(sample);
        if !admitted {
            trace!("sample {} gated at energy {}", sample.sequence, sample.energy);
        }
        let frequency = if admitted && sample.is_voiced() {
            sample.frequency_hz
        } else {
            f32::NAN
        };

        let update = self.tracker.update_frequency(frequency);
        self.scale.update(update.state.current_note);

        let entry = if update.continuous {
            HistoryEntry::from_note(update.state.current_note)
        } else {
            HistoryEntry::Invalid
        };
        self.history.push(entry);

        update
    }

    /// Advances the scale animation by one render frame.
    pub fn tick(&mut self) -> f32 {
        self.scale.tick()
    }

    /// Applies a new history cap computed from the viewport.
    pub fn resize(&mut self, max_count: usize) {
        self.history.trim(max_count);
    }

    pub fn set_reference(&mut self, reference: f32) {
        self.tracker.set_reference(reference);
    }

    pub fn set_naming(&mut self, naming: NoteNaming) {
        self.naming = naming;
    }

    pub fn tracker(&self) -> &NoteTracker {
        &self.tracker
    }

    pub fn scale(&self) -> &ScaleTracker {
        &self.scale
    }

    pub fn history(&self) -> &NoteHistory {
        &self.history
    }

    pub fn tolerance(&self) -> &Tolerance {
        &self.tolerance
    }

    pub fn tolerance_mut(&mut self) -> &mut Tolerance {
        &mut self.tolerance
    }

    /// Label of the note nearest to the current one, e.g. `E5`.
    pub fn current_label(&self) -> Option<String> {
        let note = self.tracker.state().current_note;
        note.is_finite()
            .then(|| tuning::note_label(note.round() as i32, self.naming))
    }

    /// Color weight of the current note: 0 in tune, 1 out of tolerance.
    pub fn current_alpha(&self) -> Option<f32> {
        self.tolerance.deviation_alpha(self.tracker.state().current_note)
    }
}
