//! Prometheus metrics for transaction processors.
//!
//! All metrics follow the naming convention: `qc_tp_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., executions_total)
//! - **Gauge**: Value that can go up or down (e.g., in_flight)
//! - **Histogram**: Distribution of values (e.g., execution_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, Gauge, HistogramVec, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // EXECUTION METRICS
    // =========================================================================

    /// Execution requests by family and outcome
    pub static ref TP_EXECUTIONS: CounterVec = CounterVec::new(
        Opts::new("qc_tp_executions_total", "Execution requests answered"),
        &["family", "outcome"]  // outcome: ok/invalid/internal_error/unhandled
    ).expect("metric creation failed");

    /// Handler execution duration
    pub static ref TP_EXECUTION_DURATION: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "qc_tp_execution_duration_seconds",
            "Time from dispatch to reply"
        ).buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        &["family"]
    ).expect("metric creation failed");

    /// Executions currently running
    pub static ref TP_IN_FLIGHT: Gauge = Gauge::new(
        "qc_tp_executions_in_flight",
        "Execution tasks currently running"
    ).expect("metric creation failed");

    // =========================================================================
    // STATE ACCESS METRICS
    // =========================================================================

    /// Context proxy calls by operation and outcome
    pub static ref TP_STATE_CALLS: CounterVec = CounterVec::new(
        Opts::new("qc_tp_state_calls_total", "State access round trips"),
        &["operation", "outcome"]  // operation: get/set/delete/event/receipt
    ).expect("metric creation failed");

    // =========================================================================
    // CONNECTION METRICS
    // =========================================================================

    /// Outstanding correlated requests
    pub static ref TP_PENDING_CORRELATIONS: Gauge = Gauge::new(
        "qc_tp_pending_correlations",
        "Requests awaiting a validator reply"
    ).expect("metric creation failed");

    /// Reconnect attempts after channel loss
    pub static ref TP_RECONNECTS: Counter = Counter::new(
        "qc_tp_reconnects_total",
        "Reconnects after unexpected channel loss"
    ).expect("metric creation failed");

    /// Protocol anomalies by kind
    pub static ref TP_PROTOCOL_ANOMALIES: CounterVec = CounterVec::new(
        Opts::new("qc_tp_protocol_anomalies_total", "Non-fatal protocol anomalies"),
        &["kind"]  // kind: unknown_correlation/already_settled/malformed/unexpected_kind/drain_deadline
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once: already registered collectors are skipped.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(TP_EXECUTIONS.clone()),
        Box::new(TP_EXECUTION_DURATION.clone()),
        Box::new(TP_IN_FLIGHT.clone()),
        Box::new(TP_STATE_CALLS.clone()),
        Box::new(TP_PENDING_CORRELATIONS.clone()),
        Box::new(TP_RECONNECTS.clone()),
        Box::new(TP_PROTOCOL_ANOMALIES.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
