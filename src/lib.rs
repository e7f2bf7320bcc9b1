//! Taper - a throttling HTTP/HTTPS forward proxy
//!
//! Plain HTTP requests and CONNECT tunnels are relayed under a switchable
//! network profile (latency plus per-direction byte rates). The active
//! profile is changed at runtime through a small JSON control API.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod proxy;
pub mod throttle;
pub mod utils;

// Re-export commonly used items
pub use api::ControlApi;
pub use config::TaperConfig;
pub use error::{Error, Result};
pub use logging::{init_logger_with_config, log_debug, log_error, log_info, log_trace, log_transfer, log_warning};
pub use models::{Profile, StatusResponse, TransferKind, TransferLog};
pub use proxy::ProxyServer;
pub use throttle::{relay, ProfileStore};

/// Runtime utilities for creating single-threaded vs multi-threaded Tokio runtimes
pub mod runtime {
    use crate::config::RuntimeConfig;
    use anyhow::{Context, Result};
    use tokio::runtime::{Builder, Runtime};

    /// Create a Tokio runtime based on the configuration
    pub fn create_runtime(config: &RuntimeConfig) -> Result<Runtime> {
        match config.mode.as_str() {
            "single_threaded" => {
                tracing::info!("🧵 Initializing single-threaded runtime");
                Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context("Failed to create single-threaded runtime")
            }
            "multi_threaded" => {
                let mut builder = Builder::new_multi_thread();
                builder.enable_all();

                match config.worker_threads {
                    Some(threads) if threads > 0 => {
                        tracing::info!("🧵 Initializing multi-threaded runtime with {} worker threads", threads);
                        builder.worker_threads(threads);
                    }
                    _ => tracing::info!("🧵 Initializing multi-threaded runtime with auto-detected CPU cores"),
                }

                builder.build().context("Failed to create multi-threaded runtime")
            }
            _ => {
                tracing::warn!("⚠️  Unknown runtime mode '{}', defaulting to multi-threaded", config.mode);
                Builder::new_multi_thread()
                    .enable_all()
                    .build()
                    .context("Failed to create default multi-threaded runtime")
            }
        }
    }

    /// Execute an async function with the configured runtime
    pub fn run_with_runtime<F, T>(config: &RuntimeConfig, future: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let runtime = create_runtime(config)?;
        runtime.block_on(future)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_runs_future_on_each_mode() {
            for mode in ["single_threaded", "multi_threaded", "bogus"] {
                let config = RuntimeConfig {
                    mode: mode.to_string(),
                    worker_threads: Some(2),
                };
                let value = run_with_runtime(&config, async { Ok(21 * 2) }).unwrap();
                assert_eq!(value, 42);
            }
        }
    }
}
