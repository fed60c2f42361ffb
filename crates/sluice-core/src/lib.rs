//! sluice-core: configuration shared by every Sluice crate.

pub mod config;

pub use config::{AdmissionConfig, ConfigError, QueueOverride, QueueSettings, SluiceConfig};
