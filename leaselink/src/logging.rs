//! Logging bootstrap for host applications.
//!
//! The core itself only emits `tracing` events; the embedding application
//! decides where they go. This module provides the file-based setup used
//! by the reference hosts: call [`init`] once at startup and hold the
//! returned guard until shutdown so buffered entries are flushed.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;

/// Initialize file-based logging.
///
/// `RUST_LOG` takes precedence over `level` when set. Returns `None` when
/// the log path has no usable parent directory or file name, or when a
/// global subscriber is already installed.
pub fn init(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("leaselink.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let installed = tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .try_init()
        .is_ok();
    if !installed {
        tracing::debug!("global subscriber already set, keeping existing logging");
    }

    Some(guard)
}
