//! Logging setup.
//!
//! Every run writes to stderr and to a fresh file
//! `<directory>/<prefix>_<YYYYmmdd_HHMMSS>.log`.

use crate::config::LoggingSettings;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Keeps the file writer flushing; hold it until the program exits.
pub struct LogGuard {
    _file_guard: WorkerGuard,
    pub log_file: PathBuf,
}

/// Name of the log file for a run started now.
pub fn log_file_name(prefix: &str) -> String {
    format!("{}_{}.log", prefix, chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

/// Filter used when `RUST_LOG` is unset.
fn default_filter(settings: &LoggingSettings, verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { settings.level.as_str() };
    EnvFilter::try_new(format!("tidywatch={level}"))
        .unwrap_or_else(|_| EnvFilter::new("tidywatch=info"))
}

/// Initialize tracing with a file writer and stderr output.
pub fn init_logging(settings: &LoggingSettings, verbose: bool) -> io::Result<LogGuard> {
    fs::create_dir_all(&settings.directory)?;
    let file_name = log_file_name(&settings.file_prefix);
    let log_file = settings.directory.join(&file_name);

    let appender = tracing_appender::rolling::never(&settings.directory, &file_name);
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);

    let make_filter = || {
        if verbose {
            default_filter(settings, true)
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(settings, false))
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true)
                .with_filter(make_filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(make_filter()),
        )
        .init();

    Ok(LogGuard {
        _file_guard: file_guard,
        log_file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_name_format() {
        let name = log_file_name("tidywatch");
        assert!(name.starts_with("tidywatch_"));
        assert!(name.ends_with(".log"));
        // tidywatch_YYYYmmdd_HHMMSS.log
        assert_eq!(name.len(), "tidywatch_".len() + 15 + ".log".len());
    }
}
