//! Structured logging setup using the `tracing` ecosystem.
//!
//! Console output goes to stderr so that `--format json` output on stdout
//! stays machine-readable. The file log rotates daily, is plain text or JSON,
//! and starts with a line naming the host and version.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::constants::APP_VERSION;
use crate::error::SouloResult;
use crate::platform::Platform;

/// Environment variable that overrides the configured filter.
pub const LOG_ENV: &str = "SOULO_LOG";

/// Dependencies that are chatty at debug level.
const QUIET_DEPENDENCIES: &[&str] = &["hyper=warn", "hyper_util=warn", "reqwest=warn", "r2d2=warn", "rustls=warn"];

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Guard that keeps the non-blocking log writer alive.
/// Drop this to flush and close the log file.
pub struct LogGuard {
    _guard: WorkerGuard,
}

/// Filter for `level`, unless `SOULO_LOG` is set. Accepts plain levels and
/// full directives ("info,soulo_services::rag=debug").
pub fn build_filter(level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return filter;
    }
    let directives = std::iter::once(level)
        .chain(QUIET_DEPENDENCIES.iter().copied())
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn console_layer() -> BoxedLayer {
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .boxed()
}

fn file_layer(writer: tracing_appender::non_blocking::NonBlocking, json: bool) -> BoxedLayer {
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);
    if json {
        layer.json().with_thread_ids(true).boxed()
    } else {
        layer.with_ansi(false).boxed()
    }
}

/// Initialize the global tracing subscriber: console on stderr plus a daily
/// file under `log_dir`.
pub fn init_logging(level: &str, log_dir: &Path, json_output: bool) -> SouloResult<LogGuard> {
    std::fs::create_dir_all(log_dir)?;
    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, "soulo.log"));

    tracing_subscriber::registry()
        .with(vec![console_layer(), file_layer(writer, json_output)])
        .with(build_filter(level))
        .init();

    tracing::info!(
        host = %Platform::hostname(),
        version = APP_VERSION,
        "logging to {} at {level}",
        log_dir.display()
    );

    Ok(LogGuard { _guard: guard })
}

/// Initialize logging from the `[logging]` config section; `verbose` forces
/// debug level.
pub fn init_from_config(config: &LoggingConfig, log_dir: &Path, verbose: bool) -> SouloResult<LogGuard> {
    let level = if verbose { "debug" } else { config.level.as_str() };
    init_logging(level, log_dir, config.json_output)
}

/// Console-only logger for tests. Later calls are no-ops.
pub fn init_console_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(console_layer())
        .with(build_filter(level))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_logging_does_not_panic() {
        init_console_logging("debug");
        init_console_logging("not a [valid filter");
    }

    #[test]
    fn test_build_filter_quiets_dependencies() {
        if std::env::var(LOG_ENV).is_ok() {
            return;
        }
        let filter = build_filter("debug").to_string();
        assert!(filter.contains("hyper=warn"));
        assert!(filter.contains("debug"));
    }
}
