//! Proxy configuration settings

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::Profile;

/// Main configuration for the throttling proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaperConfig {
    /// Address the forward proxy listens on
    pub proxy_listen_addr: SocketAddr,

    /// Address the control API listens on
    pub api_listen_addr: SocketAddr,

    /// Log level configuration
    pub log_level: String,

    /// Level selected at startup
    pub initial_level: i64,

    /// Available network profiles
    pub profiles: Vec<Profile>,

    /// Upstream HTTP client configuration
    pub http_client: HttpClientConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Runtime configuration
    pub runtime: RuntimeConfig,
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Maximum idle connections per host
    pub max_idle_per_host: usize,

    /// Idle timeout in seconds
    pub idle_timeout_secs: u64,

    /// Connection timeout in seconds, also used when dialing CONNECT targets
    pub connect_timeout_secs: u64,

    /// Enable TCP keepalive
    pub tcp_keepalive: bool,

    /// TCP keepalive interval in seconds
    pub tcp_keepalive_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write logs to a daily rolling file
    pub enable_file_logging: bool,

    /// Directory for rolling log files
    pub log_dir: String,
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime mode: "single_threaded" or "multi_threaded"
    pub mode: String,

    /// Number of worker threads for multi-threaded mode (None = auto-detect CPU cores)
    pub worker_threads: Option<usize>,
}

impl Default for TaperConfig {
    fn default() -> Self {
        Self {
            proxy_listen_addr: SocketAddr::from(([127, 0, 0, 1], 8807)),
            api_listen_addr: SocketAddr::from(([127, 0, 0, 1], 5507)),
            log_level: "info".to_string(),
            initial_level: 10,
            profiles: Profile::default_profiles(),
            http_client: HttpClientConfig::default(),
            logging: LoggingConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 50,
            idle_timeout_secs: 90,
            connect_timeout_secs: 10,
            tcp_keepalive: true,
            tcp_keepalive_interval_secs: 30,
        }
    }
}

impl HttpClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enable_file_logging: false,
            log_dir: "logs".to_string(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: "multi_threaded".to_string(),
            worker_threads: None,
        }
    }
}

impl TaperConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: TaperConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from `path` when it exists (defaults otherwise),
    /// apply environment overrides and validate the result.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = if path.as_ref().exists() {
            Self::from_yaml_file(path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Environment variables take precedence over the file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("TAPER_PROXY_ADDR") {
            if let Ok(addr) = addr.parse() {
                self.proxy_listen_addr = addr;
            }
        }

        if let Ok(addr) = std::env::var("TAPER_API_ADDR") {
            if let Ok(addr) = addr.parse() {
                self.api_listen_addr = addr;
            }
        }

        if let Ok(level) = std::env::var("TAPER_INITIAL_LEVEL") {
            if let Ok(level) = level.parse() {
                self.initial_level = level;
            }
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.log_level = log_level;
        }
    }

    /// Check the profile table before it is handed to the store
    pub fn validate(&self) -> Result<()> {
        if self.profiles.is_empty() {
            return Err(Error::Config("no profiles configured".to_string()));
        }

        let mut seen = HashSet::new();
        for profile in &self.profiles {
            if !seen.insert(profile.level) {
                return Err(Error::Config(format!(
                    "profile level {} is defined more than once",
                    profile.level
                )));
            }
        }

        if !seen.contains(&self.initial_level) {
            return Err(Error::Config(format!(
                "initial level {} does not match any profile",
                self.initial_level
            )));
        }

        if self.proxy_listen_addr == self.api_listen_addr {
            return Err(Error::Config(format!(
                "proxy and control API cannot share {}",
                self.proxy_listen_addr
            )));
        }

        Ok(())
    }
}
