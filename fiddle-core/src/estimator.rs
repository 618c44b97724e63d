//! # Pitch Estimation Module
//!
//! The estimator is an opaque collaborator of the capture loop: it is
//! initialised for a sample rate, turns a window of samples into a
//! frequency and an energy, and must be released once.
//!
//! ## Contents
//! - [`PitchEstimator`]: the boundary the capture loop calls through
//! - [`EstimatorSession`]: scoped ownership guaranteeing a single dispose
//! - [`SpectralEstimator`]: harmonic-spacing estimator built on [`crate::fft`]

use log::{debug, warn};

use crate::error::{CaptureError, EstimatorInitError};
use crate::fft::{FFT_SIZE, SpectrumAnalyzer, gaussian_window};

/// Frequency and energy estimation over a window of samples.
pub trait PitchEstimator {
    /// Prepares the estimator for `sample_rate`, decimating by `ratio`.
    /// Returns the analysis window length in captured samples.
    fn init(&mut self, sample_rate: u32, ratio: u32) -> Result<usize, EstimatorInitError>;

    /// Fundamental frequency in Hz, or NaN when no pitch is discernible.
    fn compute_frequency(&mut self, window: &[i16]) -> f32;

    fn compute_energy(&mut self, window: &[i16]) -> f32;

    /// Releases whatever `init` acquired. Calling it again must be harmless.
    fn dispose(&mut self);
}

impl<E: PitchEstimator + ?Sized> PitchEstimator for Box<E> {
    fn init(&mut self, sample_rate: u32, ratio: u32) -> Result<usize, EstimatorInitError> {
        (**self).init(sample_rate, ratio)
    }

    fn compute_frequency(&mut self, window: &[i16]) -> f32 {
        (**self).compute_frequency(window)
    }

    fn compute_energy(&mut self, window: &[i16]) -> f32 {
        (**self).compute_energy(window)
    }

    fn dispose(&mut self) {
        (**self).dispose()
    }
}

/// An initialised estimator, disposed exactly once when dropped.
pub struct EstimatorSession<E: PitchEstimator> {
    estimator: E,
    window_length: usize,
    disposed: bool,
}

impl<E: PitchEstimator> EstimatorSession<E> {
    /// Initialises `estimator`. A failed init is still disposed before returning.
    pub fn start(mut estimator: E, sample_rate: u32, ratio: u32) -> Result<Self, CaptureError> {
        match estimator.init(sample_rate, ratio) {
            Ok(window_length) => {
                debug!(
                    "estimator ready at {} Hz (ratio {}), window {} samples",
                    sample_rate, ratio, window_length
                );
                Ok(Self {
                    estimator,
                    window_length,
                    disposed: false,
                })
            }
            Err(err) => {
                estimator.dispose();
                Err(CaptureError::EstimatorInit {
                    rate: sample_rate,
                    ratio,
                    code: err.code,
                })
            }
        }
    }

    pub fn window_length(&self) -> usize {
        self.window_length
    }

    /// Frequency and energy of one window.
    pub fn analyze(&mut self, window: &[i16]) -> (f32, f32) {
        let frequency = self.estimator.compute_frequency(window);
        let energy = self.estimator.compute_energy(window);
        (frequency, energy)
    }

    /// Releases the estimator now. Later calls, including the one from `Drop`, do nothing.
    pub fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.estimator.dispose();
            debug!("estimator disposed");
        }
    }
}

impl<E: PitchEstimator> Drop for EstimatorSession<E> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Width of the spectral smoothing, in Hz.
const SPECTRAL_SIGMA_HZ: f64 = 20.0;
/// Peaks below this frequency are ignored.
const MIN_PEAK_HZ: f32 = 290.0;
/// A peak must reach this fraction of the strongest bin.
const PEAK_RELATIVE_THRESHOLD: f32 = 0.05;
/// More peaks than this means noise rather than a harmonic series.
const MAX_PEAKS: usize = 15;
/// Number of strongest peaks used to estimate the harmonic spacing.
const MAX_HARMONICS: usize = 8;
/// Index (after sorting by frequency, with 0 prepended) of the peak divided
/// down to the fundamental.
const REFERENCE_HARMONIC: usize = 5;

const ERR_WINDOW_TOO_LONG: i32 = -1;
const ERR_INVALID_RATE: i32 = -2;

struct SpectralState {
    sample_rate: u32,
    ratio: usize,
    window: Vec<f32>,
    decimated: Vec<f32>,
    freq_factor: f32,
    min_bin: usize,
    analyzer: SpectrumAnalyzer,
}

/// Estimates the fundamental from the spacing of harmonic peaks.
///
/// The window is decimated by the negotiated ratio, reversed so the
/// newest samples come first, Gaussian-windowed (σ equivalent to 20 Hz in
/// the spectrum, spanning 6σ) and zero padded into an FFT. Local maxima
/// above 5 % of the strongest bin are treated as harmonics.
#[derive(Default)]
pub struct SpectralEstimator {
    state: Option<SpectralState>,
}

impl SpectralEstimator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PitchEstimator for SpectralEstimator {
    fn init(&mut self, sample_rate: u32, ratio: u32) -> Result<usize, EstimatorInitError> {
        if sample_rate == 0 || ratio == 0 {
            return Err(EstimatorInitError { code: ERR_INVALID_RATE });
        }

        let effective_rate = sample_rate as f64 / ratio as f64;
        let sigma = 1.0 / (2.0 * std::f64::consts::PI * SPECTRAL_SIGMA_HZ);
        // 3σ on each side of the center.
        let length = (6.0 * effective_rate * sigma + 1.0) as usize;
        if length > FFT_SIZE {
            return Err(EstimatorInitError { code: ERR_WINDOW_TOO_LONG });
        }

        let freq_factor = (effective_rate / FFT_SIZE as f64) as f32;
        self.state = Some(SpectralState {
            sample_rate,
            ratio: ratio as usize,
            window: gaussian_window(length, 1.0 / effective_rate, sigma),
            decimated: Vec::with_capacity(length),
            freq_factor,
            min_bin: (MIN_PEAK_HZ / freq_factor).ceil() as usize,
            analyzer: SpectrumAnalyzer::new(),
        });

        Ok(length * ratio as usize)
    }

    fn compute_frequency(&mut self, window: &[i16]) -> f32 {
        let Some(state) = self.state.as_mut() else {
            warn!("compute_frequency called on an uninitialised estimator");
            return f32::NAN;
        };

        state.decimated.clear();
        state.decimated.extend(
            window
                .chunks_exact(state.ratio)
                .rev()
                .zip(&state.window)
                .map(|(chunk, w)| {
                    let sum: i32 = chunk.iter().map(|&s| s as i32).sum();
                    (sum as f32 / state.ratio as f32) * w
                }),
        );

        let spectrum = state.analyzer.magnitudes(&state.decimated);
        find_frequency(spectrum, state.min_bin) * state.freq_factor
    }

    fn compute_energy(&mut self, window: &[i16]) -> f32 {
        let Some(state) = self.state.as_ref() else {
            return f32::NAN;
        };
        let sum: f64 = window.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum / state.sample_rate as f64) as f32
    }

    fn dispose(&mut self) {
        self.state = None;
    }
}

/// Fundamental in (fractional) bins, or NaN.
fn find_frequency(spectrum: &[f32], min_bin: usize) -> f32 {
    let max = spectrum.iter().copied().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return f32::NAN;
    }
    let threshold = max * PEAK_RELATIVE_THRESHOLD;

    let mut peaks: Vec<usize> = (min_bin.max(1)..spectrum.len().saturating_sub(1))
        .filter(|&i| {
            spectrum[i] >= threshold
                && spectrum[i - 1] <= spectrum[i]
                && spectrum[i + 1] <= spectrum[i]
        })
        .collect();

    match peaks.len() {
        0 => f32::NAN,
        1 => interpolate_peak(spectrum, peaks[0]),
        n if n > MAX_PEAKS => f32::NAN,
        _ => {
            // Strongest first, then keep the main harmonics back in frequency order.
            peaks.sort_by(|&a, &b| spectrum[b].total_cmp(&spectrum[a]));
            peaks.truncate(MAX_HARMONICS);
            peaks.push(0);
            peaks.sort_unstable();

            let top = peaks[(peaks.len() - 1).min(REFERENCE_HARMONIC)] as f32;
            let mut spacings: Vec<usize> = peaks.windows(2).map(|w| w[1] - w[0]).collect();
            spacings.sort_unstable();
            let spacing = spacings[spacings.len() / 2] as f32;

            let harmonic = (top / spacing + 0.5).floor().max(1.0);
            top / harmonic
        }
    }
}

/// Refines a peak position with parabolic interpolation on log magnitudes,
/// which is exact for a Gaussian-windowed sinusoid.
fn interpolate_peak(spectrum: &[f32], peak: usize) -> f32 {
    if peak == 0 || peak + 1 >= spectrum.len() {
        return peak as f32;
    }
    let y1 = spectrum[peak - 1].ln();
    let y2 = spectrum[peak].ln();
    let y3 = spectrum[peak + 1].ln();
    if !y1.is_finite() || !y2.is_finite() || !y3.is_finite() {
        return peak as f32;
    }

    let denominator = 2.0 * y2 - y1 - y3;
    if denominator.abs() < 1e-6 {
        return peak as f32;
    }
    peak as f32 + (y3 - y1) / (2.0 * denominator)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harmonic_signal(
        sample_rate: u32,
        fundamental: f32,
        amplitudes: &[f32],
        len: usize,
    ) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                let value: f32 = amplitudes
                    .iter()
                    .enumerate()
                    .map(|(h, a)| {
                        let phase = 2.0 * std::f32::consts::PI * fundamental * (h + 1) as f32 * t;
                        a * phase.sin()
                    })
                    .sum();
                (value * 8000.0) as i16
            })
            .collect()
    }

    #[test]
    fn window_length_scales_with_rate_and_ratio() {
        let mut estimator = SpectralEstimator::new();
        assert_eq!(estimator.init(8000, 1).unwrap(), 382);
        assert_eq!(estimator.init(16000, 2).unwrap(), 764);
        assert_eq!(estimator.init(8000, 0), Err(EstimatorInitError { code: ERR_INVALID_RATE }));
        assert_eq!(
            estimator.init(2_000_000, 1),
            Err(EstimatorInitError { code: ERR_WINDOW_TOO_LONG })
        );
    }

    #[test]
    fn detects_fundamental_from_harmonics() {
        let mut estimator = SpectralEstimator::new();
        let len = estimator.init(8000, 1).unwrap();
        let signal = harmonic_signal(8000, 440.0, &[1.0, 0.6, 0.4, 0.3], len);
        let freq = estimator.compute_frequency(&signal);
        assert!((freq - 440.0).abs() < 3.0, "got {freq}");
    }

    #[test]
    fn detects_fundamental_after_decimation() {
        let mut estimator = SpectralEstimator::new();
        let len = estimator.init(16000, 2).unwrap();
        let signal = harmonic_signal(16000, 660.0, &[1.0, 0.5, 0.3], len);
        let freq = estimator.compute_frequency(&signal);
        assert!((freq - 660.0).abs() < 4.0, "got {freq}");
    }

    #[test]
    fn single_tone_is_interpolated() {
        let mut estimator = SpectralEstimator::new();
        let len = estimator.init(8000, 1).unwrap();
        let signal = harmonic_signal(8000, 600.0, &[1.0], len);
        let freq = estimator.compute_frequency(&signal);
        assert!((freq - 600.0).abs() < 2.0, "got {freq}");
    }

    #[test]
    fn silence_is_unvoiced() {
        let mut estimator = SpectralEstimator::new();
        let len = estimator.init(8000, 1).unwrap();
        let silence = vec![0i16; len];
        assert!(estimator.compute_frequency(&silence).is_nan());
        assert_eq!(estimator.compute_energy(&silence), 0.0);
    }

    #[test]
    fn energy_is_sum_of_squares_over_rate() {
        let mut estimator = SpectralEstimator::new();
        estimator.init(8000, 1).unwrap();
        let window = vec![100i16; 80];
        assert!((estimator.compute_energy(&window) - 100.0).abs() < 1e-3);
    }

    #[test]
    fn disposed_estimator_reports_nan() {
        let mut estimator = SpectralEstimator::new();
        let len = estimator.init(8000, 1).unwrap();
        estimator.dispose();
        estimator.dispose();
        assert!(estimator.compute_frequency(&vec![1000i16; len]).is_nan());
    }
}
