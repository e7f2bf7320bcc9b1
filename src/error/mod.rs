//! Error handling module for the throttling proxy

use thiserror::Error;

/// Custom error type for the proxy
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file error: {0}")]
    ConfigFile(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request build error: {0}")]
    RequestBuild(#[from] hyper::http::Error),
}

/// Result type for the proxy
pub type Result<T> = std::result::Result<T, Error>;
