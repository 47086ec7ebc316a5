//! Processor configuration.
//!
//! Loaded from TOML, then overridden by `QC_TP_*` environment variables.
//! Every field has a default, so an empty file is a valid configuration.

use serde::Deserialize;
use shared_types::codec::DEFAULT_MAX_FRAME_LEN;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::channel::DEFAULT_QUEUE_DEPTH;
use crate::domain::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: String, value: String },
}

/// Runtime settings for a [`TransactionProcessor`](crate::TransactionProcessor).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Connect/registration retry budget
    pub retry: RetryPolicy,
    /// Re-establish the session after an established connection is lost
    pub reconnect: bool,
    /// Per registration request
    pub registration_timeout_ms: u64,
    /// Per state, event or receipt call
    pub state_timeout_ms: u64,
    /// How long `stop()` waits for in-flight executions
    pub drain_timeout_ms: u64,
    /// Extra time given to executions after their state calls are cancelled
    pub drain_grace_ms: u64,
    pub unregister_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Concurrency hint announced at registration
    pub max_occupancy: u32,
    pub max_frame_len: usize,
    pub outbound_queue_depth: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            reconnect: true,
            registration_timeout_ms: 10_000,
            state_timeout_ms: 30_000,
            drain_timeout_ms: 10_000,
            drain_grace_ms: 1_000,
            unregister_timeout_ms: 2_000,
            connect_timeout_ms: 5_000,
            max_occupancy: 10,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            outbound_queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl ProcessorConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Apply `QC_TP_*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("QC_TP_RECONNECT") {
            self.reconnect = parse_var("QC_TP_RECONNECT", &v)?;
        }
        if let Some(v) = lookup("QC_TP_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_var("QC_TP_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("QC_TP_REGISTRATION_TIMEOUT_MS") {
            self.registration_timeout_ms = parse_var("QC_TP_REGISTRATION_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("QC_TP_STATE_TIMEOUT_MS") {
            self.state_timeout_ms = parse_var("QC_TP_STATE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("QC_TP_DRAIN_TIMEOUT_MS") {
            self.drain_timeout_ms = parse_var("QC_TP_DRAIN_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("QC_TP_MAX_OCCUPANCY") {
            self.max_occupancy = parse_var("QC_TP_MAX_OCCUPANCY", &v)?;
        }
        if let Some(v) = lookup("QC_TP_CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = parse_var("QC_TP_CONNECT_TIMEOUT_MS", &v)?;
        }
        Ok(())
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }

    pub fn state_timeout(&self) -> Duration {
        Duration::from_millis(self.state_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn unregister_timeout(&self) -> Duration {
        Duration::from_millis(self.unregister_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn parse_var<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var: var.to_string(),
        value: value.to_string(),
    })
}
