//! lanpulse-core — shared wire format and configuration.
//! All other lanpulse crates depend on this one.

pub mod config;
pub mod wire;

pub use config::{ConfigError, LanpulseConfig};
pub use wire::{Frame, Message, WireError, FRAME_LEN};
