//! Structured logging setup shared by the CLI binary and integration tests.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;

/// Initializes the global tracing subscriber.
///
/// Respects `RUST_LOG` for filter directives, falling back to a crate-scoped
/// default. If the `LOG_DIR` environment variable is set, a second layer
/// writes daily-rolling files under that path in addition to stderr;
/// otherwise logs go to stderr only.
///
/// Returns the file appender's [`WorkerGuard`] when a `LOG_DIR` layer was
/// installed; the caller must keep it alive for the process lifetime, since
/// dropping it stops the background writer thread and flushes no further
/// lines.
#[must_use = "dropping the WorkerGuard stops the file log writer"]
pub fn init() -> Option<WorkerGuard> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "nidsfuzz=debug".into());

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match log_dir() {
        Some(dir) => {
            if let Err(err) = std::fs::create_dir_all(&dir) {
                tracing::warn!(?dir, %err, "failed to create LOG_DIR, logging to stderr only");
                registry.init();
                return None;
            }
            let file_appender = tracing_appender::rolling::daily(&dir, "nidsfuzz.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();
            tracing::info!(?dir, "writing daily-rolling logs under LOG_DIR");
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

/// Resolves the optional `LOG_DIR` environment variable into a directory
/// path. Does not create the directory.
pub fn log_dir() -> Option<PathBuf> {
    std::env::var_os("LOG_DIR").map(PathBuf::from)
}
