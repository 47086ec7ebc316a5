//! Command-line arguments and the configuration they resolve to.

use anyhow::{Context, Result};
use clap::Parser;
use qc_18_transaction_processor::ProcessorConfig;
use quantum_telemetry::{default_log_dir, TelemetryConfig};
use std::path::{Path, PathBuf};

/// Log configuration looked up in the config directory.
pub const LOG_CONFIG_FILE: &str = "intkey_log_config.toml";

pub const DEFAULT_ENDPOINT: &str = "tcp://localhost:40000";

/// Integer-key transaction processor
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "qc-intkey-processor")]
#[command(about = "Integer-key transaction processor for Quantum-Chain validators")]
pub struct Args {
    /// Endpoint for the validator connection
    #[arg(default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Increase output sent to stderr
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Processor configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    pub log_config: Option<PathBuf>,

    /// Directory for the processor log file
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
}

impl Args {
    /// Processor settings: the config file if given, then `QC_TP_*` overrides.
    pub fn processor_config(&self) -> Result<ProcessorConfig> {
        let mut config = match &self.config {
            Some(path) => ProcessorConfig::load(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => ProcessorConfig::default(),
        };
        config
            .apply_overrides(|var| std::env::var(var).ok())
            .context("Invalid QC_TP_* override")?;
        Ok(config)
    }

    /// Logging settings.
    ///
    /// A log config file (`--log-config`, else `intkey_log_config.toml` in
    /// `config_dir`) drives the subscriber when present. Otherwise a log file
    /// named after the processor is written to the log directory. Console
    /// verbosity always follows `-v`.
    pub fn telemetry_config(&self, processor_id: &str, config_dir: &Path) -> Result<TelemetryConfig> {
        let log_config = match &self.log_config {
            Some(path) => Some(path.clone()),
            None => Some(config_dir.join(LOG_CONFIG_FILE)).filter(|p| p.is_file()),
        };

        let config = match log_config {
            Some(path) => TelemetryConfig::from_toml_file(&path)
                .with_context(|| format!("Failed to load log config {}", path.display()))?,
            None => {
                let dir = self.log_dir.clone().unwrap_or_else(default_log_dir);
                TelemetryConfig::from_env().with_log_file(dir, format!("intkey-{processor_id}.log"))
            }
        };

        Ok(TelemetryConfig {
            service_name: "qc-intkey-processor".to_string(),
            ..config.with_verbosity(self.verbose)
        })
    }
}
