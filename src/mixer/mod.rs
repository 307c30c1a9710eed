//! Mix-minus routing: participant registry and summing engine

pub mod engine;
pub mod registry;

pub use engine::{mix_minus, MixMinusEngine};
pub use registry::{DeviceId, DeviceRegistry, Registration, RegistrySnapshot, SharedFrame};
