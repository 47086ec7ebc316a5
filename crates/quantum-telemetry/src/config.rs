//! Telemetry configuration from environment variables and log-config files.

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

use crate::TelemetryError;

/// Log directory used when `QC_HOME` is not set.
pub const DEFAULT_LOG_DIR: &str = "/var/log/quantum-chain";

/// Config directory used when `QC_HOME` is not set.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/quantum-chain";

/// Configuration for logging and metrics.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Service name reported when logging starts
    pub service_name: String,

    /// Console filter directive (trace, debug, info, warn, error or an
    /// `EnvFilter` expression)
    pub log_level: String,

    /// Whether to write logs to stderr
    pub console_output: bool,

    /// Whether console logs are JSON formatted
    pub json_logs: bool,

    /// Directory for the log file. `None` disables file logging.
    pub log_dir: Option<PathBuf>,

    /// File name inside `log_dir`
    pub log_file_name: String,

    /// Filter directive for the log file
    pub file_log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "quantum-chain".to_string(),
            log_level: "warn".to_string(),
            console_output: true,
            json_logs: false,
            log_dir: None,
            log_file_name: "quantum-chain.log".to_string(),
            file_log_level: "debug".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `QC_SERVICE_NAME`: Service name (default: quantum-chain)
    /// - `QC_LOG_LEVEL` or `RUST_LOG`: Console filter (default: warn)
    /// - `QC_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `QC_JSON_LOGS`: Enable JSON logs (default: false in dev, true in containers)
    /// - `QC_LOG_DIR`: Log directory (default: no file logging)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();
        let defaults = Self::default();

        Self {
            service_name: env::var("QC_SERVICE_NAME").unwrap_or(defaults.service_name),

            log_level: env::var("QC_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or(defaults.log_level),

            console_output: env::var("QC_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            json_logs: env::var("QC_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),

            log_dir: env::var_os("QC_LOG_DIR").map(PathBuf::from),

            ..defaults
        }
    }

    /// Parse a TOML log configuration. Missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, TelemetryError> {
        toml::from_str(content).map_err(|e| TelemetryError::Config(e.to_string()))
    }

    /// Load a TOML log configuration file.
    pub fn from_toml_file(path: &Path) -> Result<Self, TelemetryError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TelemetryError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Map a `-v` count onto the console level: 0 = warn, 1 = info,
    /// 2 or more = debug.
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.log_level = match verbosity {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
        .to_string();
        self
    }

    /// Enable file logging into `dir/file_name`.
    pub fn with_log_file(mut self, dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        self.log_dir = Some(dir.into());
        self.log_file_name = file_name.into();
        self
    }

    /// Full path of the log file, if file logging is enabled.
    pub fn log_file_path(&self) -> Option<PathBuf> {
        self.log_dir
            .as_ref()
            .map(|dir| dir.join(&self.log_file_name))
    }
}

/// `$QC_HOME/logs`, else `/var/log/quantum-chain`.
pub fn default_log_dir() -> PathBuf {
    match env::var_os("QC_HOME") {
        Some(home) => PathBuf::from(home).join("logs"),
        None => PathBuf::from(DEFAULT_LOG_DIR),
    }
}

/// `$QC_HOME/etc`, else `/etc/quantum-chain`.
pub fn default_config_dir() -> PathBuf {
    match env::var_os("QC_HOME") {
        Some(home) => PathBuf::from(home).join("etc"),
        None => PathBuf::from(DEFAULT_CONFIG_DIR),
    }
}
