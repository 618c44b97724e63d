//! # Capture Scheduling Module
//!
//! Runs the capture loop that turns an irregular device stream into
//! fixed-length analysis windows at a fixed cadence.
//!
//! ## Loop
//! Each iteration:
//! 1. **Drain**: non-blocking reads until the device has nothing more, so
//!    any backlog built up while analysing is consumed and the next window
//!    is the freshest data available
//! 2. **Fill**: one blocking read for whatever is left of the countdown
//! 3. **Trigger**: once the countdown reaches zero, analyse the trailing
//!    window, send the result to the consumer and restart the countdown
//!
//! ## Stopping
//! Stop is cooperative. The flag is checked once per iteration, so an
//! in-flight blocking read completes first: the worst-case stop latency is
//! one drain, fill and trigger cycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};

use crate::PitchSample;
use crate::audio::{CaptureDevice, CaptureStream, ReadMode};
use crate::buffer::SampleBuffer;
use crate::config::{CaptureConfig, TunerSettings};
use crate::error::{CaptureError, ReadPhase};
use crate::estimator::{EstimatorSession, PitchEstimator};
use crate::rate::RateNegotiator;

/// Lifecycle of a capture scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Negotiating,
    Capturing,
    Stopping,
    Stopped,
    Error,
}

/// Cross-thread stop request. Setting it more than once, or after the
/// loop has exited, has no further effect.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Requests applied by the capture loop between iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Change the number of analyses per second.
    SetAnalysisRate(u32),
}

/// What a finished session did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub config: CaptureConfig,
    pub windows_analyzed: u64,
    pub samples_read: u64,
    pub compactions: u64,
}

/// Owns one capture session from negotiation to cleanup.
pub struct CaptureScheduler {
    settings: TunerSettings,
    stop: StopHandle,
    control: Option<Receiver<Control>>,
    state: SchedulerState,
}

impl CaptureScheduler {
    pub fn new(settings: TunerSettings) -> Self {
        Self {
            settings,
            stop: StopHandle::new(),
            control: None,
            state: SchedulerState::Idle,
        }
    }

    /// Accepts [`Control`] requests while capturing.
    pub fn with_control(mut self, control: Receiver<Control>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    fn transition(&mut self, next: SchedulerState) {
        debug!("capture scheduler: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Runs a whole session on the current thread.
    ///
    /// The estimator is initialised only after negotiation succeeds and is
    /// disposed exactly once on every exit path. The stream is closed on
    /// every exit path after it was opened; a failing close is logged and
    /// never hides the session's own outcome.
    pub fn run<D, E>(
        &mut self,
        device: &D,
        estimator: E,
        sink: &Sender<PitchSample>,
    ) -> Result<SessionSummary, CaptureError>
    where
        D: CaptureDevice + ?Sized,
        E: PitchEstimator,
    {
        self.transition(SchedulerState::Negotiating);
        let result = self.negotiate_and_capture(device, estimator, sink);
        match &result {
            Ok(summary) => {
                self.transition(SchedulerState::Stopped);
                info!(
                    "Capture stopped after {} windows ({} samples)",
                    summary.windows_analyzed, summary.samples_read
                );
            }
            Err(err) => {
                self.transition(SchedulerState::Error);
                error!("Capture session failed: {}", err);
            }
        }
        result
    }

    fn negotiate_and_capture<D, E>(
        &mut self,
        device: &D,
        estimator: E,
        sink: &Sender<PitchSample>,
    ) -> Result<SessionSummary, CaptureError>
    where
        D: CaptureDevice + ?Sized,
        E: PitchEstimator,
    {
        let negotiated = RateNegotiator::new(&self.settings.rate_candidates).negotiate(device)?;
        let mut estimator = EstimatorSession::start(estimator, negotiated.rate, negotiated.ratio)?;

        let config = CaptureConfig::new(
            negotiated.rate,
            negotiated.ratio,
            estimator.window_length(),
            self.settings.analysis_rate_hz,
            negotiated.buffer_size_hint,
        )?;
        let mut buffer = SampleBuffer::new(config.buffer_capacity, config.analysis_window_length)?;

        let mut stream = device
            .open(config.sample_rate, config.buffer_size_hint)
            .map_err(|e| CaptureError::DeviceOpen {
                rate: config.sample_rate,
                message: format!("{:#}", e),
            })?;

        info!(
            "Capturing at {} Hz: window {} samples, analysis every {} samples",
            config.sample_rate, config.analysis_window_length, config.analysis_interval_samples
        );
        self.transition(SchedulerState::Capturing);
        let outcome = self.capture_loop(&mut stream, &mut estimator, &mut buffer, config, sink);
        if outcome.is_ok() {
            self.transition(SchedulerState::Stopping);
        }

        if let Err(e) = stream.close() {
            warn!("Error closing input stream: {:#}", e);
        }
        estimator.dispose();
        outcome
    }

    fn capture_loop<S, E>(
        &mut self,
        stream: &mut S,
        estimator: &mut EstimatorSession<E>,
        buffer: &mut SampleBuffer,
        mut config: CaptureConfig,
        sink: &Sender<PitchSample>,
    ) -> Result<SessionSummary, CaptureError>
    where
        S: CaptureStream + ?Sized,
        E: PitchEstimator,
    {
        let mut samples_read: u64 = 0;
        let mut windows_analyzed: u64 = 0;
        // The first analysis waits for one full window.
        let mut next_analysis = config.analysis_window_length as i64;

        while !self.stop.is_stopped() {
            self.apply_control(&mut config);

            // Drain: catch up with anything already buffered by the device.
            loop {
                let slot = buffer.prepare_write(config.drain_chunk);
                let read = stream
                    .read(slot, ReadMode::NonBlocking)
                    .map_err(|e| CaptureError::read(ReadPhase::Drain, e))?;
                buffer.commit(read);
                samples_read += read as u64;
                next_analysis -= read as i64;
                if read == 0 {
                    break;
                }
            }

            // Fill: block for the rest of the countdown.
            if next_analysis > 0 {
                let slot = buffer.prepare_write(next_analysis as usize);
                let read = stream
                    .read(slot, ReadMode::Blocking)
                    .map_err(|e| CaptureError::read(ReadPhase::Fill, e))?;
                buffer.commit(read);
                samples_read += read as u64;
                next_analysis -= read as i64;
            }

            // Trigger.
            if next_analysis <= 0 {
                match buffer.latest_window() {
                    Some(window) => {
                        let (frequency_hz, energy) = estimator.analyze(buffer.samples(window));
                        let sample = PitchSample {
                            frequency_hz,
                            energy,
                            sequence: windows_analyzed,
                        };
                        windows_analyzed += 1;
                        if sink.send(sample).is_err() {
                            info!("Pitch consumer disconnected, stopping capture");
                            self.stop.stop();
                        }
                    }
                    None => warn!("Analysis triggered with only {} samples buffered", buffer.len()),
                }
                next_analysis = config.analysis_interval_samples as i64;
            }
        }

        Ok(SessionSummary {
            config,
            windows_analyzed,
            samples_read,
            compactions: buffer.compactions(),
        })
    }

    fn apply_control(&mut self, config: &mut CaptureConfig) {
        let Some(control) = &self.control else {
            return;
        };
        while let Ok(request) = control.try_recv() {
            match request {
                Control::SetAnalysisRate(hz) => match config.with_analysis_rate(hz) {
                    Ok(updated) => {
                        info!(
                            "Analysis rate set to {} Hz ({} samples)",
                            hz, updated.analysis_interval_samples
                        );
                        *config = updated;
                    }
                    Err(e) => warn!("Ignoring analysis rate {} Hz: {}", hz, e),
                },
            }
        }
    }
}

/// Starts capture sessions on a dedicated thread.
pub struct CaptureSession;

impl CaptureSession {
    /// Spawns the capture thread and returns its handle together with the
    /// ordered stream of pitch samples. The capture thread never waits on
    /// the consumer.
    pub fn spawn<D, E>(
        device: D,
        estimator: E,
        settings: TunerSettings,
    ) -> Result<(SessionHandle, Receiver<PitchSample>), CaptureError>
    where
        D: CaptureDevice + Send + 'static,
        E: PitchEstimator + Send + 'static,
    {
        let (sample_tx, sample_rx) = crossbeam_channel::unbounded();
        let (control_tx, control_rx) = crossbeam_channel::unbounded();

        let mut scheduler = CaptureScheduler::new(settings).with_control(control_rx);
        let stop = scheduler.stop_handle();

        let thread = thread::Builder::new()
            .name("capture".into())
            .spawn(move || scheduler.run(&device, estimator, &sample_tx))
            .map_err(CaptureError::Spawn)?;

        Ok((
            SessionHandle {
                stop,
                control: control_tx,
                thread: Some(thread),
            },
            sample_rx,
        ))
    }
}

/// Handle to a running capture thread. Dropping it requests a stop
/// without waiting for the thread.
pub struct SessionHandle {
    stop: StopHandle,
    control: Sender<Control>,
    thread: Option<JoinHandle<Result<SessionSummary, CaptureError>>>,
}

impl SessionHandle {
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Changes the analysis rate of the running session. Returns false if
    /// the session has already ended.
    pub fn set_analysis_rate(&self, hz: u32) -> bool {
        self.control.send(Control::SetAnalysisRate(hz)).is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Waits for the capture thread and returns the session outcome.
    ///
    /// Does not request a stop by itself; call [`stop`](Self::stop) first
    /// unless the session is expected to end on its own.
    pub fn join(mut self) -> Result<SessionSummary, CaptureError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| CaptureError::Panicked)?,
            None => Err(CaptureError::Panicked),
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.stop.stop();
    }
}
