//! Prometheus metrics for send and correlation flows.
//!
//! All metrics follow the naming convention: `xcall_<area>_<metric>_<unit>`.
//! Labels are `chain` (NID) and `signature` (logical event name).

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Transactions submitted by the send path
    pub static ref SUBMISSIONS: CounterVec = CounterVec::new(
        Opts::new("xcall_send_submissions_total", "Transactions submitted by the send path"),
        &["chain", "operation"]
    ).expect("metric creation failed");

    /// Transactions rejected or reverted after submission
    pub static ref SUBMISSION_FAILURES: CounterVec = CounterVec::new(
        Opts::new("xcall_send_failures_total", "Submitted transactions that failed on chain"),
        &["chain", "operation"]
    ).expect("metric creation failed");

    /// Correlation waits started
    pub static ref CORRELATIONS_STARTED: CounterVec = CounterVec::new(
        Opts::new("xcall_correlation_started_total", "Correlation waits started"),
        &["chain", "signature"]
    ).expect("metric creation failed");

    /// Correlation waits that found their event
    pub static ref CORRELATIONS_MATCHED: CounterVec = CounterVec::new(
        Opts::new("xcall_correlation_matched_total", "Correlation waits that matched an event"),
        &["chain", "signature"]
    ).expect("metric creation failed");

    /// Correlation waits that ended without a match (timeout, decode, cancel)
    pub static ref CORRELATION_FAILURES: CounterVec = CounterVec::new(
        Opts::new("xcall_correlation_failures_total", "Correlation waits that failed"),
        &["chain", "signature", "reason"]
    ).expect("metric creation failed");

    /// Time from correlation start to match
    pub static ref CORRELATION_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "xcall_correlation_latency_seconds",
            "Time spent waiting for a correlated event"
        ).buckets(exponential_buckets(0.05, 2.0, 12).expect("valid buckets")),
        &["chain", "signature"]
    ).expect("metric creation failed");
}

/// Handle for the registered metrics.
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
///
/// Repeated registration is tolerated so several harness components can
/// call this during setup.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(SUBMISSIONS.clone()),
        Box::new(SUBMISSION_FAILURES.clone()),
        Box::new(CORRELATIONS_STARTED.clone()),
        Box::new(CORRELATIONS_MATCHED.clone()),
        Box::new(CORRELATION_FAILURES.clone()),
        Box::new(CORRELATION_LATENCY.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_twice() {
        assert!(register_metrics().is_ok());
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn test_counter_increment() {
        CORRELATIONS_STARTED
            .with_label_values(&["0x1.test", "CallMessage"])
            .inc();
        assert!(
            CORRELATIONS_STARTED
                .with_label_values(&["0x1.test", "CallMessage"])
                .get()
                >= 1.0
        );
    }

    #[test]
    fn test_encode_contains_metric_names() {
        register_metrics().unwrap();
        SUBMISSIONS.with_label_values(&["0x2.test", "send"]).inc();
        let text = encode_metrics().unwrap();
        assert!(text.contains("xcall_send_submissions_total"));
    }
}
