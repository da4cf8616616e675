//! Usage: Process-wide tracing setup (stderr + optional daily-rolling file) and panic hook.

use crate::shared::error::{AuthError, AuthResult};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "info";
const LOG_FILE_PREFIX: &str = "spotify-auth.log";

/// Installs the global subscriber. `RUST_LOG` overrides the default `info` filter.
///
/// With `log_dir` set, records are also written to a daily file there; the
/// returned guard flushes that writer on drop and must outlive all logging.
pub fn init(log_dir: Option<&Path>) -> AuthResult<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| AuthError::Internal(format!("failed to install tracing subscriber: {e}")))?;

    install_panic_hook();
    tracing::debug!(file_logging = guard.is_some(), "logging initialized");
    Ok(guard)
}

/// Payload is not logged; it may carry token material.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        tracing::error!(location = %location, "PANIC at {location}; see preceding log lines for context");
    }));
}
