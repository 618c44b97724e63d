//! # Sample Buffer Module
//!
//! Flat storage for captured 16-bit samples. Reads land at the write
//! cursor; when a read would run past the end, the trailing analysis
//! window is moved to the front so the next window stays contiguous.
//! Compacting only every couple of seconds keeps copies rare.

use log::debug;

use crate::error::CaptureError;

/// A contiguous span of the buffer submitted to the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisWindow {
    pub offset: usize,
    pub length: usize,
}

/// Growable view over a fixed-capacity sample array.
///
/// Owned and mutated by the capture loop only.
#[derive(Debug)]
pub struct SampleBuffer {
    storage: Vec<i16>,
    write_cursor: usize,
    window_length: usize,
    compactions: u64,
}

impl SampleBuffer {
    /// Creates an empty buffer. The window must fit in half of the capacity.
    pub fn new(capacity: usize, window_length: usize) -> Result<Self, CaptureError> {
        if window_length == 0 || window_length > capacity / 2 {
            return Err(CaptureError::Config(format!(
                "window of {} samples needs a buffer of at least {} samples, got {}",
                window_length,
                window_length * 2,
                capacity
            )));
        }
        Ok(Self {
            storage: vec![0; capacity],
            write_cursor: 0,
            window_length,
            compactions: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn len(&self) -> usize {
        self.write_cursor
    }

    pub fn is_empty(&self) -> bool {
        self.write_cursor == 0
    }

    pub fn window_length(&self) -> usize {
        self.window_length
    }

    /// Number of times the buffer has been compacted.
    pub fn compactions(&self) -> u64 {
        self.compactions
    }

    /// Returns the free space for a read of up to `wanted` samples.
    ///
    /// Compacts first if `wanted` samples would reach the end of the
    /// storage. The returned slice may be shorter than `wanted` when even
    /// a compacted buffer cannot hold all of it. Call [`commit`] with the
    /// number of samples actually written.
    ///
    /// [`commit`]: SampleBuffer::commit
    pub fn prepare_write(&mut self, wanted: usize) -> &mut [i16] {
        if self.write_cursor + wanted >= self.storage.len() {
            self.compact();
        }
        let end = (self.write_cursor + wanted).min(self.storage.len());
        &mut self.storage[self.write_cursor..end]
    }

    /// Advances the cursor over `count` freshly written samples.
    pub fn commit(&mut self, count: usize) {
        debug_assert!(self.write_cursor + count <= self.storage.len());
        self.write_cursor = (self.write_cursor + count).min(self.storage.len());
    }

    /// Moves the trailing window (or everything, if less is buffered) to the front.
    pub fn compact(&mut self) {
        let keep = self.write_cursor.min(self.window_length);
        let start = self.write_cursor - keep;
        self.storage.copy_within(start..self.write_cursor, 0);
        self.write_cursor = keep;
        self.compactions += 1;
        debug!("compacted sample buffer, kept {} samples", keep);
    }

    /// The most recent full window, if enough samples have been captured.
    pub fn latest_window(&self) -> Option<AnalysisWindow> {
        if self.write_cursor < self.window_length {
            return None;
        }
        Some(AnalysisWindow {
            offset: self.write_cursor - self.window_length,
            length: self.window_length,
        })
    }

    pub fn samples(&self, window: AnalysisWindow) -> &[i16] {
        &self.storage[window.offset..window.offset + window.length]
    }

    /// Everything written since the last compaction.
    pub fn filled(&self) -> &[i16] {
        &self.storage[..self.write_cursor]
    }
}
