//! Mix-minus summing
//!
//! For a target participant, every *other* participant's buffer is summed
//! sample by sample into an `i32` accumulator and the total is hard-clipped
//! to the 16-bit range once. Clipping only the final sum keeps the result
//! independent of the order participants are visited in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::buffer::AudioFrame;
use crate::constants::{MAX_DEVICES, SAMPLE_MAX, SAMPLE_MIN};
use crate::mixer::registry::{DeviceId, DeviceRegistry, RegistrySnapshot};

/// Mix a snapshot into `out`, skipping `exclude`. Returns the number of
/// clipped samples.
///
/// Buffers shorter than `out` contribute only to the overlapping prefix.
pub fn mix_minus(
    snapshot: &RegistrySnapshot,
    exclude: Option<DeviceId>,
    out: &mut [i16],
) -> usize {
    let empty: &[i16] = &[];
    let mut sources = [empty; MAX_DEVICES];
    let mut count = 0;
    for (id, frame) in snapshot.iter() {
        if Some(id) == exclude || frame.is_empty() {
            continue;
        }
        sources[count] = frame.as_slice();
        count += 1;
    }
    let sources = &sources[..count];

    let mut clipped = 0;
    for (i, sample) in out.iter_mut().enumerate() {
        let sum: i32 = sources
            .iter()
            .filter_map(|source| source.get(i))
            .map(|&s| s as i32)
            .sum();
        let clamped = sum.clamp(SAMPLE_MIN, SAMPLE_MAX);
        if clamped != sum {
            clipped += 1;
        }
        *sample = clamped as i16;
    }

    clipped
}

/// Computes per-participant mixes from a shared registry
pub struct MixMinusEngine {
    registry: Arc<DeviceRegistry>,
    clipped_samples: AtomicU64,
}

impl MixMinusEngine {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            registry,
            clipped_samples: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Everything `target` should hear, exactly `frame_count` samples long.
    ///
    /// `target` does not have to be registered; an unknown target hears
    /// every registered participant.
    pub fn mix_for_device(&self, target: DeviceId, frame_count: usize) -> AudioFrame {
        let mut frame = AudioFrame::silence(frame_count);
        self.mix_into(target, &mut frame.samples);
        frame
    }

    /// Allocation-free [`mix_for_device`](Self::mix_for_device) writing into `out`
    pub fn mix_into(&self, target: DeviceId, out: &mut [i16]) {
        self.mix_excluding(Some(target), out);
    }

    /// Sum of every registered participant
    pub fn mix_all_into(&self, out: &mut [i16]) {
        self.mix_excluding(None, out);
    }

    fn mix_excluding(&self, exclude: Option<DeviceId>, out: &mut [i16]) {
        if out.is_empty() {
            return;
        }

        // Registry lock is released before summing
        let snapshot = self.registry.snapshot();
        let clipped = mix_minus(&snapshot, exclude, out);

        if clipped > 0 {
            self.clipped_samples
                .fetch_add(clipped as u64, Ordering::Relaxed);
        }
    }

    /// Total samples hard-clipped so far
    pub fn clipped_samples(&self) -> u64 {
        self.clipped_samples.load(Ordering::Relaxed)
    }

    pub fn reset_stats(&self) {
        self.clipped_samples.store(0, Ordering::Relaxed);
    }
}
