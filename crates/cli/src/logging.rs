//! Tracing setup: a console layer plus an optional per-run log file.

use std::fs::{self, File};
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Keeps the file writer flushing until dropped at the end of `main`.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
///
/// The console honours `RUST_LOG`, falling back to `level`. When `run_log`
/// is given the file is truncated and receives everything at debug level.
pub fn init(level: &str, run_log: Option<&Path>) -> LogGuard {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console = fmt::layer()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let mut setup_error = None;
    let (file_layer, guard) = match run_log.map(open_truncated) {
        Some(Ok(file)) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(LevelFilter::DEBUG);
            (Some(layer), Some(guard))
        }
        Some(Err(e)) => {
            setup_error = Some(e);
            (None, None)
        }
        None => (None, None),
    };

    Registry::default().with(console).with(file_layer).init();

    if let (Some(path), Some(e)) = (run_log, setup_error) {
        tracing::warn!(path = %path.display(), error = %e, "run log unavailable, logging to console only");
    }

    LogGuard { _file: guard }
}

fn open_truncated(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    File::create(path)
}
