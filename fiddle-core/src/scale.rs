//! # Scale Tracking Module
//!
//! Keeps the snapped scale position shown by a tuner dial. The target only
//! moves after two consecutive notes agree, and the displayed position
//! eases toward it once per render tick rather than once per sample.

/// Notes at or below this index are treated as spurious detections.
pub const MIN_SCALE_NOTE: f32 = 12.0;
/// Two consecutive notes must be closer than this to move the target.
pub const STABILITY_THRESHOLD: f32 = 0.5;
/// Fraction of the remaining distance covered per render tick.
pub const DEFAULT_DAMPING: f32 = 0.1;

const INITIAL_POSITION: f32 = 48.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleState {
    /// Animated position, in notes.
    pub current_position: f32,
    /// Integer note the position is easing toward.
    pub target_position: f32,
    /// Last accepted note, NaN until one is seen.
    pub previous_stable_note: f32,
}

#[derive(Debug, Clone)]
pub struct ScaleTracker {
    state: ScaleState,
    damping: f32,
    current_note: f32,
    shown_note: f32,
}

impl ScaleTracker {
    pub fn new() -> Self {
        Self::with_damping(DEFAULT_DAMPING)
    }

    pub fn with_damping(damping: f32) -> Self {
        Self {
            state: ScaleState {
                current_position: INITIAL_POSITION,
                target_position: INITIAL_POSITION,
                previous_stable_note: f32::NAN,
            },
            damping: damping.clamp(0.0, 1.0),
            current_note: f32::NAN,
            shown_note: f32::NAN,
        }
    }

    pub fn state(&self) -> ScaleState {
        self.state
    }

    /// The latest note received, NaN if it was unvoiced.
    pub fn current_note(&self) -> f32 {
        self.current_note
    }

    /// Feeds one smoothed note. Only finite notes above [`MIN_SCALE_NOTE`]
    /// are considered; the target snaps to the nearest integer when the
    /// note is within [`STABILITY_THRESHOLD`] of the previous accepted one.
    pub fn update(&mut self, note: f32) -> ScaleState {
        self.current_note = note;

        if note.is_finite() && note > MIN_SCALE_NOTE {
            if (self.state.previous_stable_note - note).abs() < STABILITY_THRESHOLD {
                self.state.target_position = note.round();
            }
            self.state.previous_stable_note = note;
        }

        self.state
    }

    /// Advances the animation by one render frame and returns the position.
    pub fn tick(&mut self) -> f32 {
        let state = &mut self.state;
        state.current_position += self.damping * (state.target_position - state.current_position);

        if self.current_note.is_finite()
            && (self.current_note - state.current_position).abs() < STABILITY_THRESHOLD
        {
            self.shown_note = self.current_note;
        }
        state.current_position
    }

    /// Offset of the shown note from the animated position, within ±0.5.
    ///
    /// Keeps showing the last note that was close enough, so a single
    /// unvoiced window does not make the cursor flicker. `None` once the
    /// position has moved more than half a semitone away from it.
    pub fn cursor(&self) -> Option<f32> {
        let offset = self.shown_note - self.state.current_position;
        if offset.abs() < STABILITY_THRESHOLD {
            Some(offset.clamp(-0.5, 0.5))
        } else {
            None
        }
    }
}

impl Default for ScaleTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Tolerance band, in semitones, used to color a note by how far it is
/// from the nearest semitone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    min: f32,
    max: f32,
}

const MIN_TOLERANCE_GAP: f32 = 0.01;

impl Tolerance {
    pub fn from_cents(min_cents: f32, max_cents: f32) -> Self {
        let max = max_cents / 100.0;
        let min = (min_cents / 100.0).min(max - MIN_TOLERANCE_GAP);
        Self { min, max }
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    /// Sets the lower bound, kept at least 1 cent below the upper one.
    pub fn set_min_cents(&mut self, cents: f32) {
        self.min = (cents / 100.0).min(self.max - MIN_TOLERANCE_GAP);
    }

    /// Sets the upper bound, kept at least 1 cent above the lower one.
    pub fn set_max_cents(&mut self, cents: f32) {
        self.max = (cents / 100.0).max(self.min + MIN_TOLERANCE_GAP);
    }

    /// 0 when `note` is within `min` of a semitone, 1 beyond `max`, linear between.
    /// `None` for an unvoiced note.
    pub fn deviation_alpha(&self, note: f32) -> Option<f32> {
        if !note.is_finite() {
            return None;
        }
        let pos = (note - note.round()).clamp(-0.5, 0.5).abs();
        Some(((pos - self.min) / (self.max - self.min)).clamp(0.0, 1.0))
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::from_cents(5.0, 15.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-4;

    #[test]
    fn target_moves_after_two_agreeing_notes() {
        let mut scale = ScaleTracker::new();
        assert_eq!(scale.update(62.2).target_position, 48.0);
        assert_eq!(scale.update(62.4).target_position, 62.0);
    }

    #[test]
    fn single_outlier_does_not_move_target() {
        let mut scale = ScaleTracker::new();
        scale.update(60.0);
        scale.update(60.1);
        assert_eq!(scale.state().target_position, 60.0);

        scale.update(67.0);
        assert_eq!(scale.state().target_position, 60.0);
        scale.update(60.1);
        assert_eq!(scale.state().target_position, 60.0);
    }

    #[test]
    fn low_and_unvoiced_notes_are_ignored() {
        let mut scale = ScaleTracker::new();
        scale.update(60.0);
        scale.update(f32::NAN);
        scale.update(5.0);
        assert_eq!(scale.state().previous_stable_note, 60.0);
        // Still continuous with the note before the gap.
        assert_eq!(scale.update(60.2).target_position, 60.0);
    }

    #[test]
    fn position_eases_toward_target_per_tick() {
        let mut scale = ScaleTracker::new();
        scale.update(58.0);
        scale.update(58.0);
        assert!((scale.tick() - 49.0).abs() < EPS);
        assert!((scale.tick() - 49.9).abs() < EPS);
        for _ in 0..200 {
            scale.tick();
        }
        assert!((scale.state().current_position - 58.0).abs() < 1e-3);
    }

    #[test]
    fn cursor_keeps_last_shown_note() {
        let mut scale = ScaleTracker::with_damping(1.0);
        scale.update(60.2);
        scale.update(60.2);
        scale.tick();
        assert!((scale.cursor().unwrap() - 0.2).abs() < EPS);

        scale.update(f32::NAN);
        scale.tick();
        assert!((scale.cursor().unwrap() - 0.2).abs() < EPS);

        scale.update(70.0);
        scale.update(70.1);
        scale.tick();
        assert!(scale.cursor().is_some_and(|c| (c - 0.1).abs() < EPS));
    }

    #[test]
    fn alpha_ramps_between_tolerances() {
        let tolerance = Tolerance::default();
        assert_eq!(tolerance.deviation_alpha(60.03), Some(0.0));
        assert!((tolerance.deviation_alpha(59.9).unwrap() - 0.5).abs() < 1e-3);
        assert_eq!(tolerance.deviation_alpha(60.4), Some(1.0));
        assert_eq!(tolerance.deviation_alpha(f32::NAN), None);
    }

    #[test]
    fn tolerance_bounds_stay_ordered() {
        let mut tolerance = Tolerance::from_cents(20.0, 10.0);
        assert!(tolerance.min() < tolerance.max());
        tolerance.set_max_cents(0.0);
        assert!((tolerance.max() - (tolerance.min() + 0.01)).abs() < EPS);
        tolerance.set_min_cents(50.0);
        assert!(tolerance.min() < tolerance.max());
    }
}
