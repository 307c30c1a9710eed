//! The mixing pipeline
//!
//! [`AudioPipeline`] owns the participant registry, the mix-minus engine and
//! the capture ring for as long as the engine is active. Stream drivers talk
//! to it through [`StreamHandler`]; transports and control code use the
//! participant methods directly.
//!
//! Stream callbacks never return errors, never log and never block beyond a
//! single short lock per component.
//!
//! Every mutating entry point holds the lifecycle flag's read lock across its
//! membership check and the change it makes, and `stop` takes the write lock
//! for teardown. A stopped pipeline therefore never picks up a participant or
//! capture data after it was cleared.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::audio::buffer::{AudioFrame, CircularCaptureBuffer};
use crate::config::EngineConfig;
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::error::PipelineError;
use crate::mixer::{DeviceId, DeviceRegistry, MixMinusEngine, Registration, SharedFrame};

/// Callback interface invoked by an external stream driver once per period
pub trait StreamHandler: Send + Sync {
    /// Freshly captured mono samples
    fn on_capture(&self, samples: &[i16]);

    /// Fill `out` with the next block to play
    fn on_playback(&self, out: &mut [i16]);
}

/// Events emitted on participant and lifecycle changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    ParticipantAdded(DeviceId),
    /// Already registered; buffer was reset
    ParticipantReset(DeviceId),
    ParticipantRemoved(DeviceId),
    /// Registration refused, participant stays unmixed
    ParticipantRejected(DeviceId),
    Cleared,
    Stopped,
}

/// Point-in-time pipeline counters
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub running: bool,
    pub participants: Vec<DeviceId>,
    pub sample_rate: u32,
    pub ring_capacity: usize,
    pub samples_captured: u64,
    pub samples_read: u64,
    pub playback_requests: u64,
    pub clipped_samples: u64,
    pub dropped_updates: u64,
}

/// Mix-minus pipeline for one engine session
pub struct AudioPipeline {
    config: EngineConfig,
    registry: Arc<DeviceRegistry>,
    mixer: MixMinusEngine,
    capture: CircularCaptureBuffer,
    /// Lifecycle flag; `true` until `stop`
    running: RwLock<bool>,
    /// Previous local buffer, refilled in place once no snapshot holds it
    local_spare: Mutex<Option<SharedFrame>>,
    event_tx: broadcast::Sender<PipelineEvent>,
    playback_requests: AtomicU64,
    dropped_updates: AtomicU64,
}

impl AudioPipeline {
    /// Validate `config` and build an active pipeline.
    ///
    /// The local participant, if configured, is registered immediately.
    pub fn start(config: EngineConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let capture = CircularCaptureBuffer::with_capacity(config.ring_capacity())?;
        let registry = Arc::new(DeviceRegistry::new());
        let mixer = MixMinusEngine::new(registry.clone());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        if let Some(local_id) = config.local_device_id {
            registry.register(local_id)?;
        }

        tracing::info!(
            sample_rate = config.sample_rate,
            ring_capacity = capture.capacity(),
            local_device_id = ?config.local_device_id,
            "Audio pipeline started"
        );

        Ok(Self {
            config,
            registry,
            mixer,
            capture,
            running: RwLock::new(true),
            local_spare: Mutex::new(None),
            event_tx,
            playback_requests: AtomicU64::new(0),
            dropped_updates: AtomicU64::new(0),
        })
    }

    /// Release all participant and capture state. Safe to call repeatedly.
    pub fn stop(&self) {
        {
            let mut running = self.running.write();
            if !*running {
                return;
            }
            *running = false;

            self.registry.clear_all();
            self.capture.reset();
            self.local_spare.lock().take();
            let _ = self.event_tx.send(PipelineEvent::Stopped);
        }

        tracing::info!("Audio pipeline stopped");
    }

    /// Check if the pipeline is active
    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    /// Subscribe to pipeline events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Push one hardware period of captured audio
    pub fn on_capture_frame(&self, raw: &[i16]) {
        let running = self.running.read();
        if !*running {
            return;
        }

        self.capture.write(raw);

        if let Some(local_id) = self.config.local_device_id {
            let buffer = self.fill_local_buffer(raw);
            match self.registry.replace_buffer(local_id, buffer) {
                Ok(previous) => *self.local_spare.lock() = Some(previous),
                Err(_) => {
                    self.dropped_updates.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Copy `raw` into the spare local buffer when nothing else references it.
    ///
    /// With a steady period size this settles into two buffers alternating
    /// between the registry and the spare, so capture stops allocating.
    fn fill_local_buffer(&self, raw: &[i16]) -> SharedFrame {
        let spare = self.local_spare.lock().take();
        if let Some(mut buffer) = spare {
            if let Some(frame) = Arc::get_mut(&mut buffer) {
                frame.samples.clear();
                frame.samples.extend_from_slice(raw);
                return buffer;
            }
        }
        Arc::new(AudioFrame::from(raw))
    }

    /// Next block for the local speaker
    pub fn on_playback_request(&self, frame_count: usize) -> AudioFrame {
        let mut frame = AudioFrame::silence(frame_count);
        self.on_playback_into(&mut frame.samples);
        frame
    }

    /// Allocation-free [`on_playback_request`](Self::on_playback_request)
    pub fn on_playback_into(&self, out: &mut [i16]) {
        self.playback_requests.fetch_add(1, Ordering::Relaxed);

        if !self.is_running() {
            out.fill(0);
            return;
        }

        match self.config.local_device_id {
            Some(local_id) => self.mixer.mix_into(local_id, out),
            None => self.mixer.mix_all_into(out),
        }
    }

    /// Register a participant
    pub fn add_participant(&self, device_id: DeviceId) -> Result<(), PipelineError> {
        let result = {
            let running = self.running.read();
            if !*running {
                return Err(PipelineError::NotRunning);
            }

            let result = self.registry.register(device_id);
            let event = match result {
                Ok(Registration::Added) => PipelineEvent::ParticipantAdded(device_id),
                Ok(Registration::Reset) => PipelineEvent::ParticipantReset(device_id),
                Err(_) => PipelineEvent::ParticipantRejected(device_id),
            };
            let _ = self.event_tx.send(event);
            result
        };

        match result {
            Ok(Registration::Added) => {
                tracing::debug!(device_id, "Participant added");
                Ok(())
            }
            Ok(Registration::Reset) => {
                tracing::debug!(device_id, "Participant re-registered, buffer reset");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(device_id, "Participant rejected: {}", e);
                Err(e.into())
            }
        }
    }

    /// Deregister a participant; unknown ids and calls after `stop` are ignored
    pub fn remove_participant(&self, device_id: DeviceId) {
        let removed = {
            let running = self.running.read();
            let removed = *running && self.registry.deregister(device_id);
            if removed {
                let _ = self.event_tx.send(PipelineEvent::ParticipantRemoved(device_id));
            }
            removed
        };

        if removed {
            tracing::debug!(device_id, "Participant removed");
        }
    }

    /// Drop every participant, including the local one. No-op after `stop`.
    pub fn clear_participants(&self) {
        {
            let running = self.running.read();
            if !*running {
                return;
            }
            self.registry.clear_all();
            let _ = self.event_tx.send(PipelineEvent::Cleared);
        }

        tracing::debug!("All participants cleared");
    }

    /// Audio for a remote participant that arrived over a transport.
    ///
    /// Dropped silently if the participant is not (or no longer) registered.
    pub fn submit_participant_audio(&self, device_id: DeviceId, frame: AudioFrame) {
        let applied = {
            let running = self.running.read();
            if !*running {
                return;
            }
            self.registry.update_buffer(device_id, frame)
        };

        if !applied {
            self.dropped_updates.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(device_id, "Dropped audio for unregistered participant");
        }
    }

    /// What should be sent to `device_id`
    pub fn request_mix(&self, device_id: DeviceId, frame_count: usize) -> AudioFrame {
        if !self.is_running() {
            return AudioFrame::silence(frame_count);
        }
        self.mixer.mix_for_device(device_id, frame_count)
    }

    /// Read captured audio for transmission
    pub fn read_capture(&self, count: usize) -> AudioFrame {
        self.capture.read(count)
    }

    /// Get registered participant ids
    pub fn participants(&self) -> Vec<DeviceId> {
        self.registry.device_ids()
    }

    /// Get participant count
    pub fn participant_count(&self) -> usize {
        self.registry.len()
    }

    pub fn stats(&self) -> PipelineStats {
        let capture = self.capture.stats();
        PipelineStats {
            running: self.is_running(),
            participants: self.participants(),
            sample_rate: self.config.sample_rate,
            ring_capacity: capture.capacity,
            samples_captured: capture.samples_written,
            samples_read: capture.samples_read,
            playback_requests: self.playback_requests.load(Ordering::Relaxed),
            clipped_samples: self.mixer.clipped_samples(),
            dropped_updates: self.dropped_updates.load(Ordering::Relaxed),
        }
    }
}

impl StreamHandler for AudioPipeline {
    fn on_capture(&self, samples: &[i16]) {
        self.on_capture_frame(samples);
    }

    fn on_playback(&self, out: &mut [i16]) {
        self.on_playback_into(out);
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SampleFormat;
    use crate::error::MixerError;
    use std::thread;

    fn pipeline() -> AudioPipeline {
        AudioPipeline::start(EngineConfig::default()).unwrap()
    }

    fn frame(value: i16, len: usize) -> AudioFrame {
        AudioFrame::new(vec![value; len])
    }

    #[test]
    fn test_start_rejects_invalid_config() {
        let config = EngineConfig {
            format: SampleFormat::F32,
            ..Default::default()
        };
        assert!(matches!(
            AudioPipeline::start(config),
            Err(PipelineError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_local_participant_registered_on_start() {
        let pipeline = pipeline();
        assert_eq!(pipeline.participants(), vec![0]);
    }

    #[test]
    fn test_local_and_remote_mix_minus() {
        let pipeline = pipeline();
        pipeline.add_participant(1).unwrap();
        pipeline.add_participant(2).unwrap();

        pipeline.on_capture_frame(&[100; 48]);
        pipeline.submit_participant_audio(1, frame(200, 48));
        pipeline.submit_participant_audio(2, frame(300, 48));

        assert_eq!(pipeline.on_playback_request(48).samples, vec![500; 48]);
        assert_eq!(pipeline.request_mix(1, 48).samples, vec![400; 48]);
        assert_eq!(pipeline.request_mix(2, 48).samples, vec![300; 48]);
    }

    #[test]
    fn test_capture_reaches_transmit_path() {
        let pipeline = pipeline();
        let samples: Vec<i16> = (0..480).map(|i| i as i16).collect();

        pipeline.on_capture_frame(&samples);
        assert_eq!(pipeline.read_capture(480).samples, samples);
    }

    #[test]
    fn test_without_local_participant_plays_everyone() {
        let pipeline = AudioPipeline::start(EngineConfig {
            local_device_id: None,
            ..Default::default()
        })
        .unwrap();
        pipeline.add_participant(1).unwrap();
        pipeline.add_participant(2).unwrap();
        pipeline.submit_participant_audio(1, frame(10, 8));
        pipeline.submit_participant_audio(2, frame(20, 8));

        // Capture still feeds the ring but no participant
        pipeline.on_capture_frame(&[1000; 8]);

        assert_eq!(pipeline.on_playback_request(8).samples, vec![30; 8]);
        assert_eq!(pipeline.read_capture(8).samples, vec![1000; 8]);
    }

    #[test]
    fn test_capacity_counts_local_participant() {
        let pipeline = pipeline();
        let mut events = pipeline.subscribe();

        pipeline.add_participant(1).unwrap();
        pipeline.add_participant(2).unwrap();
        let err = pipeline.add_participant(3).unwrap_err();

        assert_eq!(err, PipelineError::Mixer(MixerError::AtCapacity { max: 3 }));
        assert_eq!(pipeline.participant_count(), 3);

        assert_eq!(events.try_recv().unwrap(), PipelineEvent::ParticipantAdded(1));
        assert_eq!(events.try_recv().unwrap(), PipelineEvent::ParticipantAdded(2));
        assert_eq!(events.try_recv().unwrap(), PipelineEvent::ParticipantRejected(3));
    }

    #[test]
    fn test_participant_events() {
        let pipeline = pipeline();
        let mut events = pipeline.subscribe();

        pipeline.add_participant(5).unwrap();
        pipeline.add_participant(5).unwrap();
        pipeline.remove_participant(5);
        pipeline.remove_participant(5);
        pipeline.clear_participants();

        assert_eq!(events.try_recv().unwrap(), PipelineEvent::ParticipantAdded(5));
        assert_eq!(events.try_recv().unwrap(), PipelineEvent::ParticipantReset(5));
        assert_eq!(events.try_recv().unwrap(), PipelineEvent::ParticipantRemoved(5));
        assert_eq!(events.try_recv().unwrap(), PipelineEvent::Cleared);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_late_audio_for_removed_participant_is_dropped() {
        let pipeline = pipeline();
        pipeline.add_participant(1).unwrap();
        pipeline.remove_participant(1);

        pipeline.submit_participant_audio(1, frame(500, 16));

        assert_eq!(pipeline.participants(), vec![0]);
        assert_eq!(pipeline.on_playback_request(16).samples, vec![0; 16]);
        assert_eq!(pipeline.stats().dropped_updates, 1);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let pipeline = pipeline();
        let mut events = pipeline.subscribe();
        pipeline.add_participant(1).unwrap();
        pipeline.submit_participant_audio(1, frame(42, 4));
        pipeline.on_capture_frame(&[7; 4]);

        pipeline.stop();
        pipeline.stop();

        assert!(!pipeline.is_running());
        assert!(pipeline.participants().is_empty());
        assert_eq!(pipeline.request_mix(9, 4).samples, vec![0; 4]);
        assert_eq!(pipeline.on_playback_request(4).samples, vec![0; 4]);
        assert_eq!(pipeline.read_capture(4).samples, vec![0; 4]);
        assert_eq!(pipeline.add_participant(2), Err(PipelineError::NotRunning));

        assert_eq!(events.try_recv().unwrap(), PipelineEvent::ParticipantAdded(1));
        assert_eq!(events.try_recv().unwrap(), PipelineEvent::Stopped);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_capture_ignored_after_stop() {
        let pipeline = pipeline();
        pipeline.stop();
        pipeline.on_capture_frame(&[1; 32]);
        pipeline.submit_participant_audio(0, frame(1, 32));

        let stats = pipeline.stats();
        assert_eq!(stats.samples_captured, 0);
        assert!(!stats.running);
    }

    #[test]
    fn test_stream_handler_from_driver_thread() {
        let pipeline = Arc::new(pipeline());
        pipeline.add_participant(1).unwrap();
        pipeline.submit_participant_audio(1, frame(250, 240));

        let handler: Arc<dyn StreamHandler> = pipeline.clone();
        let driver = thread::spawn(move || {
            let mut out = vec![0i16; 240];
            for _ in 0..100 {
                handler.on_capture(&[50; 240]);
                handler.on_playback(&mut out);
                assert!(out.iter().all(|&s| s == 250));
            }
        });

        for _ in 0..100 {
            let to_remote = pipeline.request_mix(1, 240);
            assert!(to_remote.samples.iter().all(|&s| s == 0 || s == 50));
        }
        driver.join().unwrap();

        let stats = pipeline.stats();
        assert_eq!(stats.samples_captured, 24_000);
        assert_eq!(stats.playback_requests, 100);
    }

    #[test]
    fn test_membership_calls_after_stop_are_silent() {
        let pipeline = pipeline();
        pipeline.add_participant(1).unwrap();
        let mut events = pipeline.subscribe();

        pipeline.stop();
        pipeline.remove_participant(1);
        pipeline.clear_participants();

        assert_eq!(events.try_recv().unwrap(), PipelineEvent::Stopped);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_stop_racing_control_and_capture_leaves_nothing_behind() {
        let config = EngineConfig {
            sample_rate: 100,
            ring_buffer_seconds: 1,
            ..Default::default()
        };

        for _ in 0..200 {
            let pipeline = Arc::new(AudioPipeline::start(config.clone()).unwrap());

            let worker = {
                let pipeline = pipeline.clone();
                thread::spawn(move || {
                    for i in 0..50u32 {
                        pipeline.on_capture_frame(&[9; 10]);
                        let _ = pipeline.add_participant(1 + i % 2);
                        pipeline.submit_participant_audio(1, frame(5, 10));
                    }
                })
            };

            pipeline.stop();
            worker.join().unwrap();

            assert!(pipeline.participants().is_empty());
            assert_eq!(pipeline.read_capture(100).samples, vec![0; 100]);
        }
    }

    #[test]
    fn test_local_capture_recycles_buffers() {
        let pipeline = pipeline();
        pipeline.on_capture_frame(&[1; 8]);
        pipeline.on_capture_frame(&[2; 8]);
        let second = Arc::as_ptr(&pipeline.registry.buffer(0).unwrap());

        pipeline.on_capture_frame(&[3; 8]);
        pipeline.on_capture_frame(&[4; 8]);

        let current = pipeline.registry.buffer(0).unwrap();
        assert_eq!(Arc::as_ptr(&current), second);
        assert_eq!(current.samples, vec![4; 8]);
    }

    #[test]
    fn test_local_capture_never_mutates_a_held_snapshot() {
        let pipeline = pipeline();
        pipeline.add_participant(1).unwrap();
        pipeline.on_capture_frame(&[1; 4]);
        pipeline.on_capture_frame(&[2; 4]);

        let held = pipeline.registry.snapshot();
        pipeline.on_capture_frame(&[3; 4]);
        pipeline.on_capture_frame(&[4; 4]);

        assert_eq!(held.get(0), Some(&frame(2, 4)));
        assert_eq!(pipeline.request_mix(1, 4).samples, vec![4; 4]);
    }

    #[test]
    fn test_stats_serialize() {
        let pipeline = pipeline();
        let json = serde_json::to_value(pipeline.stats()).unwrap();

        assert_eq!(json["running"], true);
        assert_eq!(json["participants"], serde_json::json!([0]));
        assert_eq!(json["ring_capacity"], 96_000);
    }
}
