// fiddle-core/src/lib.rs

//! The core logic for the fiddle tuner.
//! This crate captures microphone audio, schedules fixed-length analysis
//! windows at a fixed cadence, and stabilises the resulting pitch stream
//! into a note track and scale position for display. It is completely
//! headless and contains no rendering code.

pub mod audio;
pub mod buffer;
pub mod config;
pub mod display;
pub mod error;
pub mod estimator;
pub mod fft;
pub mod history;
pub mod notes;
pub mod rate;
pub mod scale;
pub mod scheduler;
pub mod tuning;

pub use config::{CaptureConfig, TunerSettings};
pub use error::CaptureError;
pub use scheduler::{CaptureScheduler, CaptureSession, SessionHandle, StopHandle};

/// The result of analysing one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchSample {
    /// Detected frequency in Hz. NaN means no discernible pitch.
    pub frequency_hz: f32,
    /// Energy of the window, used for volume gating.
    pub energy: f32,
    /// Position of the window in the session, starting at 0.
    pub sequence: u64,
}

impl PitchSample {
    pub fn is_voiced(&self) -> bool {
        self.frequency_hz.is_finite() && self.frequency_hz > 0.0
    }
}
