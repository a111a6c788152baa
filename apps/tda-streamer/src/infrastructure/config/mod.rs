//! Configuration Module
//!
//! Environment-driven configuration for the streamer binary.

mod settings;

pub use settings::{ConfigError, ReconnectSettings, StreamerConfig, TimeoutSettings};
