//! # Logging
//!
//! Process-wide structured logging built on `tracing-subscriber`.
//!
//! Initialization is independent of any transport: call [`init_logging`] once
//! early in `main`, keep the returned [`LoggingGuard`] alive, and every
//! connection, server and resolver logs through the installed subscriber.
//!
//! ## Filtering
//! The filter starts at [`LoggingConfig::log_level`] and applies each entry of
//! [`LoggingConfig::levels`] as a `target=level` directive. Entries that do not
//! have that shape are skipped. A `RUST_LOG` variable replaces the whole
//! configured filter.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use std::io::IsTerminal;
use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Keeps the non-blocking file writer alive; dropping it flushes pending lines
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Parse one `target=level` line.
///
/// Lines without exactly one `=`, with an empty target or an unknown level
/// yield `None`.
pub fn parse_level_directive(line: &str) -> Option<Directive> {
    let mut parts = line.trim().split('=');
    let (target, level) = match (parts.next(), parts.next(), parts.next()) {
        (Some(target), Some(level), None) => (target.trim(), level.trim()),
        _ => return None,
    };

    if target.is_empty() {
        return None;
    }

    let level = level.parse::<LevelFilter>().ok()?;
    format!("{target}={level}").parse().ok()
}

/// Build the filter from a base level and per-target directives.
///
/// Returns the filter and the directives that were rejected.
pub fn filter_from_levels(base: Level, levels: &[String]) -> (EnvFilter, Vec<String>) {
    let mut filter = EnvFilter::default().add_directive(LevelFilter::from_level(base).into());
    let mut rejected = Vec::new();

    for line in levels {
        match parse_level_directive(line) {
            Some(directive) => filter = filter.add_directive(directive),
            None => rejected.push(line.clone()),
        }
    }

    (filter, rejected)
}

/// Filter used by [`init_logging`]: `RUST_LOG` if set, the configuration otherwise
pub fn build_filter(config: &LoggingConfig) -> (EnvFilter, Vec<String>) {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, Vec::new()),
        Err(_) => filter_from_levels(config.log_level, &config.levels),
    }
}

/// Install the global subscriber described by `config`.
///
/// Fails with [`ProtocolError::ConfigError`] when a subscriber is already
/// installed or the log file cannot be opened.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard> {
    let (filter, rejected) = build_filter(config);
    let timer = ChronoLocal::new(TIME_FORMAT.to_string());

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut file_guard = None;

    if config.log_to_console {
        let ansi = std::io::stdout().is_terminal();
        let layer = fmt::layer()
            .with_timer(timer.clone())
            .with_target(true)
            .with_ansi(ansi);

        if config.json_format {
            layers.push(layer.json().boxed());
        } else {
            layers.push(layer.boxed());
        }
    }

    if config.log_to_file {
        let path = config.log_file_path.as_deref().ok_or_else(|| {
            ProtocolError::ConfigError("log_file_path must be set to log to a file".into())
        })?;
        let (writer, guard) = file_writer(Path::new(path))?;
        file_guard = Some(guard);

        let layer = fmt::layer()
            .with_timer(timer)
            .with_target(true)
            .with_ansi(false)
            .with_writer(writer);

        if config.json_format {
            layers.push(layer.json().boxed());
        } else {
            layers.push(layer.boxed());
        }
    }

    Registry::default()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| ProtocolError::ConfigError(format!("Failed to initialize logging: {e}")))?;

    for line in &rejected {
        warn!(directive = %line, "Ignoring malformed log level directive");
    }
    info!(app = %config.app_name, level = %config.log_level, "Logging initialized");

    Ok(LoggingGuard { _file: file_guard })
}

fn file_writer(path: &Path) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| ProtocolError::ConfigError(format!("Invalid log file: {}", path.display())))?;

    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(directory)?;

    let appender = tracing_appender::rolling::never(directory, file_name);
    Ok(tracing_appender::non_blocking(appender))
}
