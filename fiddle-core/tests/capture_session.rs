//! End-to-end tests of the capture loop against a scripted device.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fiddle_core::audio::{CaptureDevice, CaptureStream, ReadMode};
use fiddle_core::config::{RateCandidate, TunerSettings};
use fiddle_core::error::{CaptureError, EstimatorInitError, ReadError, ReadPhase};
use fiddle_core::estimator::PitchEstimator;
use fiddle_core::scheduler::{CaptureScheduler, CaptureSession, Control, SchedulerState, StopHandle};
use fiddle_core::PitchSample;

const RATE: u32 = 8000;
const WINDOW: usize = 382;
const INTERVAL: usize = 266; // 8000 / 30

#[derive(Default)]
struct Counters {
    opens: AtomicUsize,
    closes: AtomicUsize,
    inits: AtomicUsize,
    disposes: AtomicUsize,
}

/// Produces a ramp so every sample identifies its position in the stream.
struct ScriptedStream {
    delivered: usize,
    total: Option<usize>,
    blocking_chunks: Vec<usize>,
    blocking_index: usize,
    non_blocking: VecDeque<usize>,
    fail: Option<(ReadMode, usize)>,
    stop_when_done: Option<StopHandle>,
    pace: Option<Duration>,
    counters: Arc<Counters>,
}

impl ScriptedStream {
    fn remaining(&self) -> usize {
        self.total.map_or(usize::MAX, |t| t - self.delivered)
    }

    fn deliver(&mut self, dest: &mut [i16], count: usize) -> usize {
        let count = count.min(dest.len()).min(self.remaining());
        for (i, slot) in dest[..count].iter_mut().enumerate() {
            *slot = ((self.delivered + i) % 30000) as i16;
        }
        self.delivered += count;
        if self.remaining() == 0 {
            if let Some(stop) = &self.stop_when_done {
                stop.stop();
            }
        }
        count
    }
}

impl CaptureStream for ScriptedStream {
    fn read(&mut self, dest: &mut [i16], mode: ReadMode) -> Result<usize, ReadError> {
        if let Some((fail_mode, after)) = self.fail {
            if fail_mode == mode && self.delivered >= after {
                return Err(ReadError { code: -5 });
            }
        }
        match mode {
            ReadMode::NonBlocking => {
                let Some(available) = self.non_blocking.pop_front() else {
                    return Ok(0);
                };
                let n = self.deliver(dest, available);
                if n < available && self.remaining() > 0 {
                    self.non_blocking.push_front(available - n);
                }
                Ok(n)
            }
            ReadMode::Blocking => {
                if let Some(pace) = self.pace {
                    std::thread::sleep(pace);
                }
                let chunk = self.blocking_chunks[self.blocking_index % self.blocking_chunks.len()];
                self.blocking_index += 1;
                Ok(self.deliver(dest, chunk))
            }
        }
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedDevice {
    rates: Vec<u32>,
    total: Option<usize>,
    blocking_chunks: Vec<usize>,
    non_blocking: Vec<usize>,
    fail: Option<(ReadMode, usize)>,
    fail_open: bool,
    stop_when_done: Option<StopHandle>,
    pace: Option<Duration>,
    counters: Arc<Counters>,
}

impl ScriptedDevice {
    fn new(total: usize, blocking_chunks: Vec<usize>, counters: Arc<Counters>) -> Self {
        Self {
            rates: vec![RATE],
            total: Some(total),
            blocking_chunks,
            non_blocking: Vec::new(),
            fail: None,
            fail_open: false,
            stop_when_done: None,
            pace: None,
            counters,
        }
    }
}

impl CaptureDevice for ScriptedDevice {
    type Stream = ScriptedStream;

    fn min_buffer_size(&self, sample_rate: u32) -> Option<usize> {
        self.rates.contains(&sample_rate).then_some(640)
    }

    fn open(&self, _sample_rate: u32, _hint: usize) -> anyhow::Result<ScriptedStream> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            anyhow::bail!("device busy");
        }
        Ok(ScriptedStream {
            delivered: 0,
            total: self.total,
            blocking_chunks: self.blocking_chunks.clone(),
            blocking_index: 0,
            non_blocking: self.non_blocking.iter().copied().collect(),
            fail: self.fail,
            stop_when_done: self.stop_when_done.clone(),
            pace: self.pace,
            counters: self.counters.clone(),
        })
    }
}

/// Records every window it is asked to analyse.
struct RecordingEstimator {
    init_code: Option<i32>,
    windows: Arc<Mutex<Vec<Vec<i16>>>>,
    counters: Arc<Counters>,
}

impl RecordingEstimator {
    fn new(counters: Arc<Counters>) -> Self {
        Self {
            init_code: None,
            windows: Arc::new(Mutex::new(Vec::new())),
            counters,
        }
    }
}

impl PitchEstimator for RecordingEstimator {
    fn init(&mut self, _sample_rate: u32, _ratio: u32) -> Result<usize, EstimatorInitError> {
        self.counters.inits.fetch_add(1, Ordering::SeqCst);
        match self.init_code {
            Some(code) => Err(EstimatorInitError { code }),
            None => Ok(WINDOW),
        }
    }

    fn compute_frequency(&mut self, window: &[i16]) -> f32 {
        self.windows.lock().unwrap().push(window.to_vec());
        440.0
    }

    fn compute_energy(&mut self, window: &[i16]) -> f32 {
        window.len() as f32
    }

    fn dispose(&mut self) {
        self.counters.disposes.fetch_add(1, Ordering::SeqCst);
    }
}

fn settings() -> TunerSettings {
    TunerSettings {
        rate_candidates: vec![RateCandidate::new(RATE, 1)],
        ..TunerSettings::default()
    }
}

fn run_sync(
    scheduler: &mut CaptureScheduler,
    device: &ScriptedDevice,
    estimator: RecordingEstimator,
) -> (Result<fiddle_core::scheduler::SessionSummary, CaptureError>, Vec<PitchSample>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let result = scheduler.run(device, estimator, &tx);
    drop(tx);
    (result, rx.iter().collect())
}

fn assert_contiguous(window: &[i16]) {
    for pair in window.windows(2) {
        assert_eq!((pair[0] as i32 + 1) % 30000, pair[1] as i32, "window is not contiguous");
    }
}

#[test]
fn every_window_has_exact_length_with_irregular_reads() {
    let counters = Arc::new(Counters::default());
    let mut scheduler = CaptureScheduler::new(settings());
    let chunks = vec![97, 1013, 3, 250, 4099, 1];
    let mut device = ScriptedDevice::new(RATE as usize * 10, chunks, counters.clone());
    device.non_blocking = vec![0, 77, 1200, 0, 0, 9000, 31, 0];
    device.stop_when_done = Some(scheduler.stop_handle());

    let estimator = RecordingEstimator::new(counters.clone());
    let windows = estimator.windows.clone();
    let (result, samples) = run_sync(&mut scheduler, &device, estimator);

    let summary = result.unwrap();
    let windows = windows.lock().unwrap();
    assert!(!windows.is_empty());
    for window in windows.iter() {
        assert_eq!(window.len(), WINDOW);
        assert_contiguous(window);
    }
    assert_eq!(summary.windows_analyzed as usize, windows.len());
    assert_eq!(samples.len(), windows.len());
    assert_eq!(summary.samples_read, RATE as u64 * 10);
    assert!(summary.compactions > 0);
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}

#[test]
fn cadence_matches_analysis_interval() {
    let counters = Arc::new(Counters::default());
    let total = 80_000;
    let mut scheduler = CaptureScheduler::new(settings());
    let mut device = ScriptedDevice::new(total, vec![128, 61, 300], counters.clone());
    device.stop_when_done = Some(scheduler.stop_handle());

    let (result, samples) = run_sync(&mut scheduler, &device, RecordingEstimator::new(counters));
    result.unwrap();

    // Data only arrives through fill reads, so triggers land exactly on
    // the window length and every interval after it.
    assert_eq!(samples.len(), 1 + (total - WINDOW) / INTERVAL);
    let approx = total as f64 / INTERVAL as f64;
    assert!((samples.len() as f64 - approx).abs() <= 1.0);
    let sequences: Vec<u64> = samples.iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, (0..samples.len() as u64).collect::<Vec<_>>());
}

#[test]
fn backlog_is_drained_before_analysis() {
    let counters = Arc::new(Counters::default());
    let mut scheduler = CaptureScheduler::new(settings());
    let mut device = ScriptedDevice::new(20_000, vec![500], counters.clone());
    device.non_blocking = vec![5000];
    device.stop_when_done = Some(scheduler.stop_handle());

    let estimator = RecordingEstimator::new(counters);
    let windows = estimator.windows.clone();
    let (result, _) = run_sync(&mut scheduler, &device, estimator);
    result.unwrap();

    // The first window ends at the newest backlog sample, not the oldest.
    let windows = windows.lock().unwrap();
    assert_eq!(*windows[0].last().unwrap(), 4999);
    assert_eq!(windows[0][0], (5000 - WINDOW) as i16);
}

#[test]
fn analysis_rate_change_derives_new_interval() {
    let counters = Arc::new(Counters::default());
    let (control_tx, control_rx) = crossbeam_channel::unbounded();
    let mut scheduler = CaptureScheduler::new(settings()).with_control(control_rx);
    let total = 80_000;
    let mut device = ScriptedDevice::new(total, vec![200], counters.clone());
    device.stop_when_done = Some(scheduler.stop_handle());

    control_tx.send(Control::SetAnalysisRate(0)).unwrap();
    control_tx.send(Control::SetAnalysisRate(60)).unwrap();
    let (result, samples) = run_sync(&mut scheduler, &device, RecordingEstimator::new(counters));
    let summary = result.unwrap();

    assert_eq!(summary.config.analysis_interval_samples, 133);
    assert_eq!(summary.config.analysis_rate_hz, 60);
    assert_eq!(samples.len(), 1 + (total - WINDOW) / 133);
}

#[test]
fn read_error_during_fill_cleans_up_once() {
    let counters = Arc::new(Counters::default());
    let mut scheduler = CaptureScheduler::new(settings());
    let mut device = ScriptedDevice::new(50_000, vec![100], counters.clone());
    device.fail = Some((ReadMode::Blocking, 1000));

    let estimator = RecordingEstimator::new(counters.clone());
    let (result, samples) = run_sync(&mut scheduler, &device, estimator);

    assert!(matches!(
        result,
        Err(CaptureError::Read {
            phase: ReadPhase::Fill,
            code: -5
        })
    ));
    assert!(!samples.is_empty());
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    assert_eq!(counters.disposes.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.state(), SchedulerState::Error);
}

#[test]
fn read_error_during_drain_is_reported() {
    let counters = Arc::new(Counters::default());
    let mut scheduler = CaptureScheduler::new(settings());
    let mut device = ScriptedDevice::new(50_000, vec![100], counters.clone());
    device.fail = Some((ReadMode::NonBlocking, 500));

    let (result, _) = run_sync(&mut scheduler, &device, RecordingEstimator::new(counters.clone()));

    assert!(matches!(
        result,
        Err(CaptureError::Read {
            phase: ReadPhase::Drain,
            ..
        })
    ));
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    assert_eq!(counters.disposes.load(Ordering::SeqCst), 1);
}

#[test]
fn unsupported_device_never_initialises_estimator() {
    let counters = Arc::new(Counters::default());
    let mut scheduler = CaptureScheduler::new(settings());
    let mut device = ScriptedDevice::new(1000, vec![100], counters.clone());
    device.rates = vec![44100];

    let (result, _) = run_sync(&mut scheduler, &device, RecordingEstimator::new(counters.clone()));

    assert!(matches!(result, Err(CaptureError::NoSupportedRate)));
    assert_eq!(counters.inits.load(Ordering::SeqCst), 0);
    assert_eq!(counters.disposes.load(Ordering::SeqCst), 0);
    assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
}

#[test]
fn estimator_init_failure_aborts_before_capture() {
    let counters = Arc::new(Counters::default());
    let mut scheduler = CaptureScheduler::new(settings());
    let device = ScriptedDevice::new(1000, vec![100], counters.clone());
    let mut estimator = RecordingEstimator::new(counters.clone());
    estimator.init_code = Some(-1);

    let (result, _) = run_sync(&mut scheduler, &device, estimator);

    assert!(matches!(
        result,
        Err(CaptureError::EstimatorInit {
            rate: RATE,
            ratio: 1,
            code: -1
        })
    ));
    assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
    assert_eq!(counters.disposes.load(Ordering::SeqCst), 1);
}

#[test]
fn open_failure_still_disposes_estimator() {
    let counters = Arc::new(Counters::default());
    let mut scheduler = CaptureScheduler::new(settings());
    let mut device = ScriptedDevice::new(1000, vec![100], counters.clone());
    device.fail_open = true;

    let (result, _) = run_sync(&mut scheduler, &device, RecordingEstimator::new(counters.clone()));

    match result {
        Err(CaptureError::DeviceOpen { rate, message }) => {
            assert_eq!(rate, RATE);
            assert!(message.contains("device busy"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(counters.disposes.load(Ordering::SeqCst), 1);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 0);
}

#[test]
fn dropped_consumer_stops_capture() {
    let counters = Arc::new(Counters::default());
    let mut scheduler = CaptureScheduler::new(settings());
    let mut device = ScriptedDevice::new(0, vec![100], counters.clone());
    device.total = None;

    let (tx, rx) = crossbeam_channel::unbounded();
    drop(rx);
    let summary = scheduler
        .run(&device, RecordingEstimator::new(counters.clone()), &tx)
        .unwrap();

    assert_eq!(summary.windows_analyzed, 1);
    assert_eq!(counters.disposes.load(Ordering::SeqCst), 1);
}

#[test]
fn threaded_session_stops_idempotently() {
    let counters = Arc::new(Counters::default());
    let mut device = ScriptedDevice::new(0, vec![64], counters.clone());
    device.total = None;
    device.pace = Some(Duration::from_millis(1));

    let estimator = RecordingEstimator::new(counters.clone());
    let (handle, samples) = CaptureSession::spawn(device, estimator, settings()).unwrap();
    let stop = handle.stop_handle();

    for _ in 0..3 {
        let sample = samples.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(sample.frequency_hz, 440.0);
        assert_eq!(sample.energy, WINDOW as f32);
    }
    assert!(handle.set_analysis_rate(15));

    handle.stop();
    handle.stop();
    let summary = handle.join().unwrap();
    stop.stop();

    assert!(summary.windows_analyzed >= 3);
    assert_eq!(counters.disposes.load(Ordering::SeqCst), 1);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}
