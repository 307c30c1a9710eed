//! Sample buffers for the capture path
//!
//! [`CircularCaptureBuffer`] sits between the hardware capture callback and
//! the transmit path. It never blocks and never refuses a write: a reader
//! that falls behind simply reads newer data, and a reader that runs ahead
//! gets whatever the slots currently hold (zeros before the first lap).

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::MixerError;

/// Mono block of signed 16-bit PCM samples
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioFrame {
    /// Samples, one per frame
    pub samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// All-zero frame of `len` samples
    pub fn silence(len: usize) -> Self {
        Self {
            samples: vec![0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[i16] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }

    /// Get frame duration in microseconds
    pub fn duration_us(&self, sample_rate: u32) -> u64 {
        (self.samples.len() as u64 * 1_000_000) / sample_rate as u64
    }
}

impl From<Vec<i16>> for AudioFrame {
    fn from(samples: Vec<i16>) -> Self {
        Self::new(samples)
    }
}

impl From<&[i16]> for AudioFrame {
    fn from(samples: &[i16]) -> Self {
        Self::new(samples.to_vec())
    }
}

impl AsRef<[i16]> for AudioFrame {
    fn as_ref(&self) -> &[i16] {
        &self.samples
    }
}

struct RingState {
    slots: Box<[i16]>,
    write_pos: usize,
    read_pos: usize,
}

/// Fixed-capacity sample ring with independent read and write cursors
pub struct CircularCaptureBuffer {
    state: Mutex<RingState>,
    capacity: usize,
    samples_written: AtomicU64,
    samples_read: AtomicU64,
}

impl CircularCaptureBuffer {
    /// Create a zero-filled ring holding `capacity` samples
    pub fn with_capacity(capacity: usize) -> Result<Self, MixerError> {
        if capacity == 0 {
            return Err(MixerError::InvalidFrameLength(capacity));
        }

        Ok(Self {
            state: Mutex::new(RingState {
                slots: vec![0; capacity].into_boxed_slice(),
                write_pos: 0,
                read_pos: 0,
            }),
            capacity,
            samples_written: AtomicU64::new(0),
            samples_read: AtomicU64::new(0),
        })
    }

    /// Create a ring long enough for `seconds` of mono audio
    pub fn for_duration(sample_rate: u32, seconds: u32) -> Result<Self, MixerError> {
        Self::with_capacity(sample_rate as usize * seconds as usize)
    }

    /// Copy `samples` in at the write cursor, overwriting unread data if needed.
    ///
    /// Writing more than `capacity` samples at once leaves the ring exactly as
    /// a sample-by-sample write would: only the newest `capacity` survive.
    pub fn write(&self, samples: &[i16]) {
        if samples.is_empty() {
            return;
        }

        let skip = samples.len().saturating_sub(self.capacity);
        let tail = &samples[skip..];

        {
            let mut state = self.state.lock();
            let start = (state.write_pos + skip) % self.capacity;
            state.write_pos = copy_into_ring(&mut state.slots, start, tail);
        }

        self.samples_written
            .fetch_add(samples.len() as u64, Ordering::Relaxed);
    }

    /// Read exactly `count` samples from the read cursor
    pub fn read(&self, count: usize) -> AudioFrame {
        let mut frame = AudioFrame::silence(count);
        self.read_into(&mut frame.samples);
        frame
    }

    /// Fill `out` from the read cursor, wrapping as many times as needed
    pub fn read_into(&self, out: &mut [i16]) {
        if out.is_empty() {
            return;
        }

        {
            let mut state = self.state.lock();
            let mut pos = state.read_pos;
            let mut filled = 0;
            while filled < out.len() {
                let n = (self.capacity - pos).min(out.len() - filled);
                out[filled..filled + n].copy_from_slice(&state.slots[pos..pos + n]);
                filled += n;
                pos = (pos + n) % self.capacity;
            }
            state.read_pos = pos;
        }

        self.samples_read
            .fetch_add(out.len() as u64, Ordering::Relaxed);
    }

    /// Zero every slot and rewind both cursors
    pub fn reset(&self) {
        {
            let mut state = self.state.lock();
            state.slots.fill(0);
            state.write_pos = 0;
            state.read_pos = 0;
        }
        self.samples_written.store(0, Ordering::Relaxed);
        self.samples_read.store(0, Ordering::Relaxed);
    }

    /// Get buffer capacity in samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CaptureBufferStats {
        CaptureBufferStats {
            capacity: self.capacity,
            samples_written: self.samples_written.load(Ordering::Relaxed),
            samples_read: self.samples_read.load(Ordering::Relaxed),
        }
    }
}

/// Copy `src` (at most one ring length) starting at `start`; returns the new cursor
fn copy_into_ring(slots: &mut [i16], start: usize, src: &[i16]) -> usize {
    let capacity = slots.len();
    debug_assert!(src.len() <= capacity);

    let first = (capacity - start).min(src.len());
    slots[start..start + first].copy_from_slice(&src[..first]);
    let rest = src.len() - first;
    slots[..rest].copy_from_slice(&src[first..]);

    (start + src.len()) % capacity
}

/// Capture ring counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureBufferStats {
    pub capacity: usize,
    pub samples_written: u64,
    pub samples_read: u64,
}

impl CaptureBufferStats {
    /// Samples written but not yet read, counting ones already overwritten
    pub fn unread(&self) -> u64 {
        self.samples_written.saturating_sub(self.samples_read)
    }

    /// Samples the reader lost because the writer lapped it
    pub fn overwritten(&self) -> u64 {
        self.unread().saturating_sub(self.capacity as u64)
    }
}
