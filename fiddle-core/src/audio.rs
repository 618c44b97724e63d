//! # Audio Capture Module
//!
//! This module defines the device boundary the capture loop reads from and
//! provides a CPAL (Cross-Platform Audio Library) implementation of it.
//!
//! ## Features
//! - Rate probing against the device's supported input ranges
//! - Mono 16-bit delivery regardless of the device's native format
//! - Blocking and non-blocking reads on top of CPAL's callback model

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat, SupportedBufferSize, SupportedStreamConfigRange};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, info, warn};

use crate::error::ReadError;

/// How a read waits for data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Wait until `dest` is full (or the device gives up).
    Blocking,
    /// Return whatever is already available, possibly nothing.
    NonBlocking,
}

/// An input device that can be probed for rates and opened as a mono 16-bit stream.
pub trait CaptureDevice {
    type Stream: CaptureStream;

    /// Minimum viable buffer size for mono 16-bit capture at `sample_rate`,
    /// or `None` if the rate is not supported.
    fn min_buffer_size(&self, sample_rate: u32) -> Option<usize>;

    fn open(&self, sample_rate: u32, buffer_size_hint: usize) -> Result<Self::Stream>;
}

/// An open capture stream.
pub trait CaptureStream {
    /// Reads up to `dest.len()` samples, returning how many were written.
    fn read(&mut self, dest: &mut [i16], mode: ReadMode) -> Result<usize, ReadError>;

    /// Stops the stream and releases the device.
    fn close(&mut self) -> Result<()>;
}

/// Error code reported when the CPAL callback side went away.
pub const ERROR_DISCONNECTED: i32 = -1;
/// Error code reported after CPAL signalled a stream error.
pub const ERROR_STREAM: i32 = -2;

/// Longest a blocking read waits for one chunk before returning a partial count.
const BLOCKING_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Input formats the callback knows how to convert.
const SUPPORTED_FORMATS: [SampleFormat; 3] =
    [SampleFormat::I16, SampleFormat::F32, SampleFormat::U16];

/// Fallback buffer hint when the device does not report a range: 20 ms.
fn default_buffer_size(sample_rate: u32) -> usize {
    (sample_rate as usize / 50).max(1)
}

/// The default CPAL input device.
pub struct CpalDevice {
    device: cpal::Device,
    configs: Vec<SupportedStreamConfigRange>,
}

impl CpalDevice {
    /// Selects the default input device of the default host.
    pub fn default_input() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No input device available"))?;

        info!("Using audio input device: {}", device.name()?);

        let configs = device.supported_input_configs()?.collect::<Vec<_>>();
        Ok(Self { device, configs })
    }

    /// Picks the input range covering `sample_rate`, preferring mono and 16-bit.
    fn find_supported_config(&self, sample_rate: u32) -> Option<&SupportedStreamConfigRange> {
        self.configs
            .iter()
            .filter(|c| SUPPORTED_FORMATS.contains(&c.sample_format()))
            .filter(|c| {
                c.min_sample_rate().0 <= sample_rate && sample_rate <= c.max_sample_rate().0
            })
            .min_by_key(|c| {
                let format_rank = if c.sample_format() == SampleFormat::I16 { 0 } else { 1 };
                (c.channels(), format_rank)
            })
    }
}

impl CaptureDevice for CpalDevice {
    type Stream = CpalStream;

    fn min_buffer_size(&self, sample_rate: u32) -> Option<usize> {
        let range = self.find_supported_config(sample_rate)?;
        match range.buffer_size() {
            SupportedBufferSize::Range { min, .. } if *min > 0 => Some(*min as usize),
            _ => Some(default_buffer_size(sample_rate)),
        }
    }

    fn open(&self, sample_rate: u32, buffer_size_hint: usize) -> Result<CpalStream> {
        let range = *self
            .find_supported_config(sample_rate)
            .ok_or_else(|| anyhow!("{} Hz is not supported by the input device", sample_rate))?;

        let sample_format = range.sample_format();
        let channels = (range.channels() as usize).max(1);
        let mut config: cpal::StreamConfig =
            range.with_sample_rate(cpal::SampleRate(sample_rate)).into();
        if let SupportedBufferSize::Range { min, max } = range.buffer_size() {
            let hint = (buffer_size_hint as u32).max(*min).min(*max);
            config.buffer_size = cpal::BufferSize::Fixed(hint);
        }

        info!(
            "Opening input stream: {} Hz, {} channel(s), {:?}, buffer {:?}",
            sample_rate, channels, sample_format, config.buffer_size
        );

        let (sender, receiver) = crossbeam_channel::unbounded::<Vec<i16>>();
        let error_code = Arc::new(AtomicI32::new(0));

        let device = &self.device;
        let errors = error_code.clone();
        let stream = match sample_format {
            SampleFormat::I16 => {
                build_input_stream::<i16>(device, &config, channels, sender, errors)?
            }
            SampleFormat::F32 => {
                build_input_stream::<f32>(device, &config, channels, sender, errors)?
            }
            SampleFormat::U16 => {
                build_input_stream::<u16>(device, &config, channels, sender, errors)?
            }
            f => return Err(anyhow!("Unsupported sample format: {}", f)),
        };

        stream.play()?;

        Ok(CpalStream {
            stream: Some(stream),
            receiver,
            pending: Vec::new(),
            pending_pos: 0,
            error_code,
        })
    }
}

/// Builds a stream whose callback downmixes each frame to one i16 sample.
fn build_input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    sender: Sender<Vec<i16>>,
    error_code: Arc<AtomicI32>,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample,
    i16: cpal::FromSample<T>,
{
    let err_fn = move |err: cpal::StreamError| {
        error!("An error occurred on the audio stream: {}", err);
        error_code.store(ERROR_STREAM, Ordering::Release);
    };

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let chunk: Vec<i16> = data
                .chunks_exact(channels)
                .map(|frame| {
                    let sum: i32 = frame
                        .iter()
                        .map(|&s| s.to_sample::<i16>() as i32)
                        .sum();
                    (sum / channels as i32) as i16
                })
                .collect();

            // The reader may already be gone during shutdown.
            let _ = sender.send(chunk);
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Read side of a CPAL input stream.
pub struct CpalStream {
    stream: Option<cpal::Stream>,
    receiver: Receiver<Vec<i16>>,
    pending: Vec<i16>,
    pending_pos: usize,
    error_code: Arc<AtomicI32>,
}

impl CpalStream {
    /// Copies as much of the leftover callback chunk as fits.
    fn take_pending(&mut self, dest: &mut [i16]) -> usize {
        let available = &self.pending[self.pending_pos..];
        let n = available.len().min(dest.len());
        dest[..n].copy_from_slice(&available[..n]);
        self.pending_pos += n;
        n
    }

    fn check_error(&self) -> Result<(), ReadError> {
        match self.error_code.load(Ordering::Acquire) {
            0 => Ok(()),
            code => Err(ReadError { code }),
        }
    }
}

impl CaptureStream for CpalStream {
    fn read(&mut self, dest: &mut [i16], mode: ReadMode) -> Result<usize, ReadError> {
        self.check_error()?;

        let mut written = self.take_pending(dest);
        while written < dest.len() {
            let next = match mode {
                ReadMode::NonBlocking => match self.receiver.try_recv() {
                    Ok(chunk) => chunk,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        return Err(ReadError { code: ERROR_DISCONNECTED });
                    }
                },
                ReadMode::Blocking => match self.receiver.recv_timeout(BLOCKING_READ_TIMEOUT) {
                    Ok(chunk) => chunk,
                    Err(RecvTimeoutError::Timeout) => {
                        warn!(
                            "Input stream stalled, returning {} of {} samples",
                            written,
                            dest.len()
                        );
                        break;
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(ReadError { code: ERROR_DISCONNECTED });
                    }
                },
            };
            self.pending = next;
            self.pending_pos = 0;
            written += self.take_pending(&mut dest[written..]);
        }

        self.check_error()?;
        Ok(written)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            debug!("Pausing input stream");
            stream.pause()?;
        }
        Ok(())
    }
}
