//! Structured logging setup.
//!
//! One `tracing-subscriber` registry with up to two layers, each carrying its
//! own `EnvFilter`:
//! - console (stderr), plain or JSON, filtered by `log_level`
//! - log file (plain, no ANSI), filtered by `file_log_level`
//!
//! A log file that cannot be opened downgrades to console-only logging with a
//! warning instead of failing startup.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::{TelemetryConfig, TelemetryError};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// What the installed subscriber writes to.
#[derive(Debug, Clone, Default)]
pub struct LoggingHandle {
    /// Log file in use, if file logging is active
    pub log_file: Option<PathBuf>,
}

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &TelemetryConfig) -> Result<LoggingHandle, TelemetryError> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.console_output {
        layers.push(console_layer(config)?);
    }

    let mut handle = LoggingHandle::default();
    let mut file_error = None;
    if let Some(path) = config.log_file_path() {
        match open_log_file(&path) {
            Ok(file) => {
                layers.push(file_layer(config, file)?);
                handle.log_file = Some(path);
            }
            Err(e) => file_error = Some((path, e)),
        }
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

    if let Some((path, error)) = file_error {
        tracing::warn!(
            path = %path.display(),
            error = %error,
            "Log file unavailable, logging to console only"
        );
    }

    tracing::debug!(
        service = %config.service_name,
        console = config.console_output,
        json = config.json_logs,
        log_file = ?handle.log_file,
        "Logging initialized"
    );

    Ok(handle)
}

/// Parse a filter directive such as `info` or `qc_18=debug,warn`.
pub fn build_filter(directive: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(directive).map_err(|e| TelemetryError::Config(format!("{directive}: {e}")))
}

fn console_layer(config: &TelemetryConfig) -> Result<BoxedLayer, TelemetryError> {
    let filter = build_filter(&config.log_level)?;
    let layer = if config.json_logs {
        fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed()
    };
    Ok(layer)
}

fn file_layer(config: &TelemetryConfig, file: File) -> Result<BoxedLayer, TelemetryError> {
    let filter = build_filter(&config.file_log_level)?;
    Ok(fmt::layer()
        .with_ansi(false)
        .with_writer(Arc::new(file))
        .with_filter(filter)
        .boxed())
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
