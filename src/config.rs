//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::path::PathBuf;

use crate::constants::*;
use crate::error::PipelineError;
use crate::mixer::DeviceId;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Mixing pipeline configuration
    pub engine: EngineConfig,

    /// Hardware stream configuration
    pub driver: DriverConfig,
}

/// PCM sample format delivered by the stream driver
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    #[default]
    I16,
    F32,
}

/// Settings handed to [`AudioPipeline::start`](crate::AudioPipeline::start)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Shared sample rate of every participant
    pub sample_rate: u32,

    /// Channel count (only mono is accepted)
    pub channels: u16,

    /// Sample format (only 16-bit PCM is accepted)
    pub format: SampleFormat,

    /// Length of the capture ring in seconds
    pub ring_buffer_seconds: u32,

    /// Participant id fed by the local capture path; `None` disables it
    pub local_device_id: Option<DeviceId>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            format: SampleFormat::I16,
            ring_buffer_seconds: DEFAULT_RING_SECONDS,
            local_device_id: Some(DEFAULT_LOCAL_DEVICE_ID),
        }
    }
}

impl EngineConfig {
    /// Check the stream contract the pipeline relies on
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.sample_rate == 0 {
            return Err(PipelineError::InvalidConfig("sample rate must be positive".into()));
        }
        if self.channels != 1 {
            return Err(PipelineError::UnsupportedFormat(format!(
                "{} channels, only mono is supported",
                self.channels
            )));
        }
        if self.format != SampleFormat::I16 {
            return Err(PipelineError::UnsupportedFormat(format!(
                "{:?} samples, only 16-bit PCM is supported",
                self.format
            )));
        }
        if self.ring_buffer_seconds == 0 {
            return Err(PipelineError::InvalidConfig(
                "capture ring must hold at least one second".into(),
            ));
        }
        Ok(())
    }

    /// Capture ring capacity in samples
    pub fn ring_capacity(&self) -> usize {
        self.sample_rate as usize * self.ring_buffer_seconds as usize
    }

    /// Calculate frame count from milliseconds
    pub fn frames_for_ms(&self, ms: f32) -> usize {
        (self.sample_rate as f32 * ms / 1000.0) as usize
    }
}

/// Hardware device selection
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DriverConfig {
    /// Input device name, default device if unset
    pub input_device: Option<String>,

    /// Output device name, default device if unset
    pub output_device: Option<String>,

    /// Fixed period size in frames, backend default if unset
    pub buffer_frames: Option<u32>,
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "mixminus", "intercom")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
