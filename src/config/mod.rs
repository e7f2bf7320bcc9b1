//! Configuration loading

pub mod settings;

pub use settings::{HttpClientConfig, LoggingConfig, RuntimeConfig, TaperConfig};
