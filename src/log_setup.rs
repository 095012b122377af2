//! Logging setup: a `tracing_subscriber::registry()` with an `EnvFilter`
//! and an `fmt::layer()`.
//!
//! Structured `doc_id`/`stage` fields ride on `tracing::info_span!` at the
//! call sites that need them (see `worker_pool::run_pool`) rather than a
//! thread-local context filter, which wouldn't generalize to a task-based
//! concurrency model where many documents are in flight on the same OS
//! thread at once.

use std::path::Path;

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber: stderr output for
/// interactive use, plus a rolling file appender under `log_dir` mirroring
/// `setup_logging`'s `RotatingFileHandler` (50MB x 20 files is handled by
/// log rotation policy at the `tracing-appender` layer's daily roller,
/// the closest stock equivalent without hand-rolling size-based rotation).
pub fn init(log_dir: &Path, verbose: bool) -> tracing_appender::non_blocking::WorkerGuard {
    std::fs::create_dir_all(log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(log_dir, "orchestrator.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    guard
}

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
