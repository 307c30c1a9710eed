//! Error types
//!
//! Each subsystem has its own enum. Nothing here is ever produced on the
//! stream callback path: the callbacks swallow membership races instead of
//! returning errors.

use thiserror::Error;

use crate::mixer::DeviceId;

/// Crate-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Mixer(#[from] MixerError),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Registry and mixing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MixerError {
    /// Registration rejected because every slot is taken
    #[error("participant limit reached ({max})")]
    AtCapacity { max: usize },

    #[error("device {0} is not registered")]
    NotRegistered(DeviceId),

    /// A positive length was required
    #[error("invalid frame length: {0}")]
    InvalidFrameLength(usize),
}

/// Pipeline lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    #[error("unsupported stream format: {0}")]
    UnsupportedFormat(String),

    #[error("pipeline is stopped")]
    NotRunning,

    #[error(transparent)]
    Mixer(#[from] MixerError),
}

/// Hardware stream driver errors
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("no default {0} device")]
    NoDefaultDevice(&'static str),

    #[error("unsupported device format: {0}")]
    UnsupportedFormat(String),

    #[error("stream error: {0}")]
    StreamError(String),
}
