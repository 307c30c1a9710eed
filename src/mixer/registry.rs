//! Bounded registry of participant buffers
//!
//! A fixed array of [`MAX_DEVICES`] slots scanned linearly. Buffers are held
//! behind `Arc` so that updates and snapshots only swap or clone handles while
//! the lock is held; sample data is never copied and replaced buffers are
//! dropped after the lock is released.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::audio::buffer::AudioFrame;
use crate::constants::MAX_DEVICES;
use crate::error::MixerError;

/// Caller-assigned participant identifier
pub type DeviceId = u32;

/// Immutable, shareable participant buffer
pub type SharedFrame = Arc<AudioFrame>;

/// Outcome of a successful registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// A new slot was taken
    Added,
    /// The id was already live; its buffer was reset to empty
    Reset,
}

#[derive(Debug, Clone)]
struct DeviceSlot {
    device_id: DeviceId,
    buffer: SharedFrame,
}

type Slots = [Option<DeviceSlot>; MAX_DEVICES];

/// Participant id → most recent audio frame, at most [`MAX_DEVICES`] entries
pub struct DeviceRegistry {
    slots: Mutex<Slots>,
    /// Shared empty buffer handed to fresh slots
    empty: SharedFrame,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Default::default()),
            empty: Arc::new(AudioFrame::default()),
        }
    }

    /// Register a participant with an empty buffer.
    ///
    /// Registering a live id always succeeds and clears its buffer, even when
    /// every slot is taken.
    pub fn register(&self, device_id: DeviceId) -> Result<Registration, MixerError> {
        let (registration, _replaced) = {
            let mut slots = self.slots.lock();

            if let Some(slot) = find_mut(&mut slots, device_id) {
                let old = std::mem::replace(&mut slot.buffer, self.empty.clone());
                (Registration::Reset, Some(old))
            } else {
                let free = slots
                    .iter_mut()
                    .find(|slot| slot.is_none())
                    .ok_or(MixerError::AtCapacity { max: MAX_DEVICES })?;
                *free = Some(DeviceSlot {
                    device_id,
                    buffer: self.empty.clone(),
                });
                (Registration::Added, None)
            }
        };

        Ok(registration)
    }

    /// Remove a participant. Returns whether it was registered.
    pub fn deregister(&self, device_id: DeviceId) -> bool {
        let removed = {
            let mut slots = self.slots.lock();
            slots
                .iter_mut()
                .find(|slot| matches!(slot, Some(s) if s.device_id == device_id))
                .and_then(Option::take)
        };

        removed.is_some()
    }

    /// Replace a participant's buffer, or fail with `NotRegistered`
    pub fn try_update_buffer(
        &self,
        device_id: DeviceId,
        frame: AudioFrame,
    ) -> Result<(), MixerError> {
        let incoming = Arc::new(frame);
        let _replaced = self.replace_buffer(device_id, incoming)?;
        Ok(())
    }

    /// Swap in a prepared buffer handle and hand back the one it replaced.
    ///
    /// The returned handle is released by the caller outside the lock, or
    /// recycled for the next update once no snapshot still holds it.
    pub fn replace_buffer(
        &self,
        device_id: DeviceId,
        buffer: SharedFrame,
    ) -> Result<SharedFrame, MixerError> {
        let mut slots = self.slots.lock();
        let slot = find_mut(&mut slots, device_id)
            .ok_or(MixerError::NotRegistered(device_id))?;
        Ok(std::mem::replace(&mut slot.buffer, buffer))
    }

    /// Replace a participant's buffer; updates for unknown ids are dropped.
    ///
    /// Returns whether the update was applied.
    pub fn update_buffer(&self, device_id: DeviceId, frame: AudioFrame) -> bool {
        self.try_update_buffer(device_id, frame).is_ok()
    }

    /// Remove every participant
    pub fn clear_all(&self) {
        let _drained: Slots = {
            let mut slots = self.slots.lock();
            std::mem::take(&mut *slots)
        };
    }

    /// Point-in-time view of all participants, in slot order
    pub fn snapshot(&self) -> RegistrySnapshot {
        let slots = self.slots.lock();
        let mut entries: [Option<(DeviceId, SharedFrame)>; MAX_DEVICES] = Default::default();
        for (entry, slot) in entries.iter_mut().zip(slots.iter()) {
            *entry = slot
                .as_ref()
                .map(|s| (s.device_id, s.buffer.clone()));
        }
        RegistrySnapshot { entries }
    }

    /// Current buffer of a participant
    pub fn buffer(&self, device_id: DeviceId) -> Option<SharedFrame> {
        let slots = self.slots.lock();
        slots
            .iter()
            .flatten()
            .find(|s| s.device_id == device_id)
            .map(|s| s.buffer.clone())
    }

    pub fn contains(&self, device_id: DeviceId) -> bool {
        self.slots
            .lock()
            .iter()
            .flatten()
            .any(|s| s.device_id == device_id)
    }

    /// Get participant count
    pub fn len(&self) -> usize {
        self.slots.lock().iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get all registered ids, in slot order
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.slots
            .lock()
            .iter()
            .flatten()
            .map(|s| s.device_id)
            .collect()
    }

    pub fn capacity(&self) -> usize {
        MAX_DEVICES
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn find_mut(slots: &mut Slots, device_id: DeviceId) -> Option<&mut DeviceSlot> {
    slots
        .iter_mut()
        .flatten()
        .find(|s| s.device_id == device_id)
}

/// Consistent copy of the registry's buffer handles
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    entries: [Option<(DeviceId, SharedFrame)>; MAX_DEVICES],
}

impl RegistrySnapshot {
    /// Build a snapshot directly from buffers (at most [`MAX_DEVICES`] are kept)
    pub fn from_buffers<I>(buffers: I) -> Self
    where
        I: IntoIterator<Item = (DeviceId, AudioFrame)>,
    {
        let mut entries: [Option<(DeviceId, SharedFrame)>; MAX_DEVICES] = Default::default();
        for (entry, (id, frame)) in entries.iter_mut().zip(buffers) {
            *entry = Some((id, Arc::new(frame)));
        }
        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, &AudioFrame)> + '_ {
        self.entries
            .iter()
            .flatten()
            .map(|(id, frame)| (*id, &**frame))
    }

    pub fn get(&self, device_id: DeviceId) -> Option<&AudioFrame> {
        self.iter()
            .find(|(id, _)| *id == device_id)
            .map(|(_, frame)| frame)
    }

    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(value: i16, len: usize) -> AudioFrame {
        AudioFrame::new(vec![value; len])
    }

    #[test]
    fn test_register_up_to_capacity() {
        let registry = DeviceRegistry::new();

        assert_eq!(registry.register(1), Ok(Registration::Added));
        assert_eq!(registry.register(2), Ok(Registration::Added));
        assert_eq!(registry.register(3), Ok(Registration::Added));
        assert_eq!(registry.register(4), Err(MixerError::AtCapacity { max: 3 }));

        assert_eq!(registry.len(), 3);
        assert!(!registry.contains(4));
    }

    #[test]
    fn test_reregister_resets_buffer() {
        let registry = DeviceRegistry::new();
        registry.register(1).unwrap();
        assert!(registry.update_buffer(1, frame(5, 10)));

        assert_eq!(registry.register(1), Ok(Registration::Reset));
        assert!(registry.buffer(1).unwrap().is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reregister_at_capacity_succeeds() {
        let registry = DeviceRegistry::new();
        for id in 1..=3 {
            registry.register(id).unwrap();
        }

        assert_eq!(registry.register(2), Ok(Registration::Reset));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_deregister_frees_slot() {
        let registry = DeviceRegistry::new();
        for id in 1..=3 {
            registry.register(id).unwrap();
        }

        assert!(registry.deregister(2));
        assert_eq!(registry.register(9), Ok(Registration::Added));
        assert_eq!(registry.device_ids(), vec![1, 9, 3]);
    }

    #[test]
    fn test_teardown_on_empty_registry_is_noop() {
        let registry = DeviceRegistry::new();

        assert!(!registry.deregister(42));
        registry.clear_all();
        registry.clear_all();

        assert!(registry.is_empty());
    }

    #[test]
    fn test_update_for_unknown_device_is_dropped() {
        let registry = DeviceRegistry::new();
        registry.register(1).unwrap();
        registry.deregister(1);

        assert!(!registry.update_buffer(1, frame(100, 4)));
        assert!(!registry.contains(1));
        assert_eq!(
            registry.try_update_buffer(1, frame(100, 4)),
            Err(MixerError::NotRegistered(1))
        );
    }

    #[test]
    fn test_update_replaces_wholesale() {
        let registry = DeviceRegistry::new();
        registry.register(1).unwrap();

        registry.update_buffer(1, frame(1, 100));
        registry.update_buffer(1, frame(2, 10));

        assert_eq!(*registry.buffer(1).unwrap(), frame(2, 10));
    }

    #[test]
    fn test_snapshot_is_point_in_time() {
        let registry = DeviceRegistry::new();
        registry.register(1).unwrap();
        registry.update_buffer(1, frame(10, 4));

        let snapshot = registry.snapshot();
        registry.update_buffer(1, frame(20, 4));
        registry.clear_all();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get(1), Some(&frame(10, 4)));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_clear_all_races_with_updates() {
        let registry = std::sync::Arc::new(DeviceRegistry::new());
        for id in 1..=3 {
            registry.register(id).unwrap();
        }

        let updater = {
            let registry = registry.clone();
            thread::spawn(move || {
                for i in 0..500 {
                    registry.update_buffer(1 + (i % 3), frame(i as i16, 32));
                }
            })
        };

        registry.clear_all();
        updater.join().unwrap();

        // Late updates never resurrect cleared participants
        assert!(registry.is_empty());
    }

    #[test]
    fn test_replace_buffer_returns_previous_handle() {
        let registry = DeviceRegistry::new();
        registry.register(1).unwrap();
        registry.update_buffer(1, frame(10, 4));

        let previous = registry.replace_buffer(1, Arc::new(frame(20, 4))).unwrap();
        assert_eq!(*previous, frame(10, 4));
        // Only the caller holds the replaced buffer now
        assert_eq!(Arc::strong_count(&previous), 1);
        assert_eq!(*registry.buffer(1).unwrap(), frame(20, 4));

        assert_eq!(
            registry.replace_buffer(7, previous),
            Err(MixerError::NotRegistered(7))
        );
    }
}
