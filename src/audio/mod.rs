//! Audio buffers and the hardware stream driver

pub mod buffer;
#[cfg(feature = "hardware")]
pub mod driver;

pub use buffer::{AudioFrame, CaptureBufferStats, CircularCaptureBuffer};
#[cfg(feature = "hardware")]
pub use driver::HardwareDriver;
