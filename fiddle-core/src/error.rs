//! # Error Module
//!
//! Terminal failures of a capture session. Each variant is a distinct
//! status the caller can match on; none of them is retried automatically.
//! An unvoiced window (NaN frequency) is not an error and never shows up here.

use std::fmt;
use thiserror::Error;

/// Which part of the capture loop issued a failing read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPhase {
    /// Non-blocking catch-up reads.
    Drain,
    /// Blocking read of the remaining countdown.
    Fill,
}

impl fmt::Display for ReadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadPhase::Drain => write!(f, "drain"),
            ReadPhase::Fill => write!(f, "fill"),
        }
    }
}

/// A negative result reported by the device on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("device read failed with code {code}")]
pub struct ReadError {
    pub code: i32,
}

/// A negative result reported by the estimator on initialisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("estimator initialisation failed with code {code}")]
pub struct EstimatorInitError {
    pub code: i32,
}

/// Errors that end a capture session.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No candidate rate was accepted by the device. The session never started.
    #[error("no candidate sample rate is supported by the input device")]
    NoSupportedRate,

    /// The estimator refused the negotiated rate. Nothing was captured.
    #[error("pitch estimator rejected {rate} Hz (ratio {ratio}): code {code}")]
    EstimatorInit { rate: u32, ratio: u32, code: i32 },

    /// The device accepted the rate during negotiation but could not open a stream.
    #[error("failed to open input stream at {rate} Hz: {message}")]
    DeviceOpen { rate: u32, message: String },

    /// A read returned an error mid-session.
    #[error("audio read failed during {phase} phase: code {code}")]
    Read { phase: ReadPhase, code: i32 },

    /// The capture parameters violate a buffer invariant.
    #[error("invalid capture configuration: {0}")]
    Config(String),

    /// The capture thread could not be started.
    #[error("failed to spawn capture thread")]
    Spawn(#[source] std::io::Error),

    /// The capture thread panicked before reporting a result.
    #[error("capture thread panicked")]
    Panicked,
}

impl CaptureError {
    pub(crate) fn read(phase: ReadPhase, err: ReadError) -> Self {
        CaptureError::Read {
            phase,
            code: err.code,
        }
    }
}
