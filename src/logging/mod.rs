use crate::config::LoggingConfig;
use crate::models::TransferLog;
use anyhow::{Context, Result};
use log::{debug, error, info, trace, warn};
use std::sync::Once;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Filter for the resolved level. `RUST_LOG` is folded into the settings
/// before this point, so the command line always wins over it.
fn build_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level).with_context(|| format!("Invalid log level: {}", level))
}

/// Initialize the global subscriber: console output filtered by `level`,
/// plus a daily rolling file when enabled.
///
/// Keep the returned guard alive for as long as file output is wanted.
pub fn init_logger_with_config(level: &str, logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let mut guard = None;
    let mut outcome = Ok(());

    INIT.call_once(|| {
        outcome = (|| -> Result<()> {
            let filter = build_filter(level)?;

            let console = fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true);

            let file = if logging.enable_file_logging {
                let appender = tracing_appender::rolling::daily(&logging.log_dir, "taper.log");
                let (writer, worker_guard) = tracing_appender::non_blocking(appender);
                guard = Some(worker_guard);
                Some(fmt::layer().with_ansi(false).with_writer(writer))
            } else {
                None
            };

            let subscriber = tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(file);
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to install tracing subscriber")?;

            // Bridge `log` records (and the macros below) into tracing
            LogTracer::init().context("Failed to initialize LogTracer")?;
            Ok(())
        })();
    });

    outcome.map(|_| guard)
}

/// Log a finished transfer: one summary line, full record at debug level
pub fn log_transfer(entry: &TransferLog) {
    let outcome = entry.error.as_deref().unwrap_or("ok");
    info!(
        "📊 {:?} {} [{} / level {}] ↓{}B ↑{}B in {}ms ({})",
        entry.kind,
        entry.target,
        entry.profile,
        entry.level,
        entry.bytes_down,
        entry.bytes_up,
        entry.duration_ms,
        outcome
    );

    match serde_json::to_string(entry) {
        Ok(json) => debug!("TRANSFER: {}", json),
        Err(e) => warn!("Failed to serialize transfer record: {}", e),
    }
}

/// Log an error message
pub fn log_error(message: &str) {
    error!("{}", message);
}

/// Log an info message
pub fn log_info(message: &str) {
    info!("{}", message);
}

/// Log a warning message
pub fn log_warning(message: &str) {
    warn!("{}", message);
}

/// Log a debug message
pub fn log_debug(message: &str) {
    debug!("{}", message);
}

/// Log a trace message
pub fn log_trace(message: &str) {
    trace!("{}", message);
}

/// Convenience macro for logging errors
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error(&format!($($arg)*));
    };
}

/// Convenience macro for logging info messages
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info(&format!($($arg)*));
    };
}

/// Convenience macro for logging warning messages
#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        $crate::logging::log_warning(&format!($($arg)*));
    };
}

/// Convenience macro for logging debug messages
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_debug(&format!($($arg)*));
    };
}

/// Convenience macro for logging trace messages
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        $crate::logging::log_trace(&format!($($arg)*));
    };
}
