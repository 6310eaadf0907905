//! Logging infrastructure for codex-title
//!
//! The wrapped agent owns the terminal, so logs only ever go to a file:
//! `~/.local/state/codex-title/codex-title.log` by default, or the path in
//! `CODEX_TITLE_LOG_PATH`. An empty override disables logging altogether.

use crate::config::LoggingConfig;
use crate::error::{Error, Result};
use std::path::PathBuf;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize the logging system
///
/// Returns `Ok(None)` when logging is disabled. Otherwise sets up tracing with
/// a non-blocking file writer and a level taken from the config or `RUST_LOG`.
pub fn init(config: &LoggingConfig) -> Result<Option<LoggingGuard>> {
    let Some(log_file) = config.log_file() else {
        return Ok(None);
    };

    let (log_dir, file_name) = split_log_path(&log_file)?;
    std::fs::create_dir_all(&log_dir)?;

    // Single append-only file; the tool is short-lived per terminal tab.
    let file_appender = tracing_appender::rolling::never(&log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    tracing::info!(
        log_file = %log_file.display(),
        level = %config.level,
        pid = std::process::id(),
        "Logging initialized"
    );

    Ok(Some(LoggingGuard { _guard: guard }))
}

/// Initialize logging for tests (logs to the test writer)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Guard that keeps the logging system alive
///
/// When dropped, flushes any pending log writes.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

fn split_log_path(path: &std::path::Path) -> Result<(PathBuf, std::ffi::OsString)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Logging(format!("log path has no file name: {}", path.display())))?
        .to_os_string();
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((dir, file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_split_log_path() {
        let (dir, name) = split_log_path(Path::new("/var/log/ct/codex-title.log")).unwrap();
        assert_eq!(dir, PathBuf::from("/var/log/ct"));
        assert_eq!(name, "codex-title.log");

        let (dir, _) = split_log_path(Path::new("bare.log")).unwrap();
        assert_eq!(dir, PathBuf::from("."));

        assert!(split_log_path(Path::new("/")).is_err());
    }

    #[test]
    fn test_disabled_logging_installs_nothing() {
        let config = LoggingConfig {
            enabled: false,
            ..LoggingConfig::default()
        };
        assert!(init(&config).unwrap().is_none());
    }
}
