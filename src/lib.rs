//! # Mix-Minus Intercom
//!
//! Low-latency voice routing for a small group of participants. Every
//! participant hears the sum of all *other* participants, never itself.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                 External stream driver (audio::driver)               │
//! │        capture callback                     playback callback        │
//! └───────────┬──────────────────────────────────────────▲───────────────┘
//!             │ on_capture(&[i16])                       │ on_playback(&mut [i16])
//!             ▼                                          │
//! ┌──────────────────────────────────────────────────────┴───────────────┐
//! │                        AudioPipeline (pipeline)                       │
//! │                                                                       │
//! │  ┌──────────────────────┐   ┌──────────────────┐   ┌───────────────┐  │
//! │  │ CircularCaptureBuffer│   │  DeviceRegistry  │──▶│ MixMinusEngine│  │
//! │  │  (audio::buffer)     │   │ (mixer::registry)│   │(mixer::engine)│  │
//! │  │  2 s ring, own lock  │   │ ≤3 slots, own lock   │ snapshot, sum,│  │
//! │  └──────────┬───────────┘   └────────▲─────────┘   │ hard clip     │  │
//! │             │                        │             └───────┬───────┘  │
//! └─────────────┼────────────────────────┼─────────────────────┼──────────┘
//!               │ read_capture           │ submit_participant  │ request_mix
//!               ▼                        │ _audio              ▼
//! ┌──────────────────────────────────────┴───────────────────────────────┐
//! │                 Transport / control path (external)                   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod mixer;
pub mod pipeline;

pub use audio::buffer::{AudioFrame, CircularCaptureBuffer};
pub use error::{Error, Result};
pub use mixer::{DeviceId, DeviceRegistry, MixMinusEngine};
pub use pipeline::{AudioPipeline, PipelineEvent, PipelineStats, StreamHandler};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Voice is mono end to end
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Maximum number of simultaneously registered participants
    pub const MAX_DEVICES: usize = 3;

    /// Capture ring length in seconds
    pub const DEFAULT_RING_SECONDS: u32 = 2;

    /// Device id used for the local microphone/speaker pair
    pub const DEFAULT_LOCAL_DEVICE_ID: u32 = 0;

    /// Pipeline event channel capacity
    pub const EVENT_CHANNEL_CAPACITY: usize = 64;

    /// Smallest representable sample
    pub const SAMPLE_MIN: i32 = i16::MIN as i32;

    /// Largest representable sample
    pub const SAMPLE_MAX: i32 = i16::MAX as i32;
}
