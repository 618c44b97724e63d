//! # Rate Negotiation Module
//!
//! Picks the first candidate sample rate the input device accepts.

use log::{debug, info};

use crate::audio::CaptureDevice;
use crate::config::RateCandidate;
use crate::error::CaptureError;

/// Outcome of a successful negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedRate {
    pub rate: u32,
    pub ratio: u32,
    pub buffer_size_hint: usize,
}

/// Tries candidate rates in order against a device.
#[derive(Debug, Clone)]
pub struct RateNegotiator<'a> {
    candidates: &'a [RateCandidate],
}

impl<'a> RateNegotiator<'a> {
    pub fn new(candidates: &'a [RateCandidate]) -> Self {
        Self { candidates }
    }

    /// Returns the first candidate with a positive minimum buffer size.
    ///
    /// Failure is terminal: the caller must not start a session.
    pub fn negotiate<D: CaptureDevice + ?Sized>(
        &self,
        device: &D,
    ) -> Result<NegotiatedRate, CaptureError> {
        for candidate in self.candidates {
            match device.min_buffer_size(candidate.rate) {
                Some(size) if size > 0 => {
                    info!(
                        "Selected sample rate: {} Hz (ratio {}, buffer hint {})",
                        candidate.rate, candidate.ratio, size
                    );
                    return Ok(NegotiatedRate {
                        rate: candidate.rate,
                        ratio: candidate.ratio,
                        buffer_size_hint: size,
                    });
                }
                _ => debug!("{} Hz rejected by input device", candidate.rate),
            }
        }
        Err(CaptureError::NoSupportedRate)
    }
}
