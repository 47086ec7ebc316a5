//! # Quantum Telemetry
//!
//! Logging and metrics for Quantum-Chain transaction processors.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` registry with a console layer and an
//!   optional log file layer, each with its own filter
//! - **Metrics**: Prometheus counters, gauges and histograms for executions,
//!   state access and connection health
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quantum_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env().with_verbosity(1);
//!     let _handle = init_telemetry(&config).expect("Failed to init telemetry");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `QC_LOG_LEVEL` / `RUST_LOG` | `warn` | Console filter |
//! | `QC_JSON_LOGS` | `false` | JSON console output |
//! | `QC_LOG_DIR` | unset | Log file directory |
//! | `QC_HOME` | unset | Root for `logs/` and `etc/` |

#![warn(missing_docs)]

mod config;
mod logging;
pub mod metrics;

pub use config::{default_config_dir, default_log_dir, TelemetryConfig};
pub use logging::{build_filter, init_logging, LoggingHandle};
pub use metrics::{
    encode_metrics, register_metrics, TP_EXECUTIONS, TP_EXECUTION_DURATION, TP_IN_FLIGHT,
    TP_PENDING_CORRELATIONS, TP_PROTOCOL_ANOMALIES, TP_RECONNECTS, TP_STATE_CALLS,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Subscriber could not be installed
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Metric registration or encoding failed
    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    /// Bad filter directive or log-config file
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Register metrics and install the logging subscriber.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<LoggingHandle, TelemetryError> {
    register_metrics()?;
    init_logging(config)
}

/// Record a protocol anomaly of the given kind.
pub fn record_anomaly(kind: &str) {
    TP_PROTOCOL_ANOMALIES.with_label_values(&[kind]).inc();
}
