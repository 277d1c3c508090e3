//! # xCall Telemetry
//!
//! Logging and metrics shared by the correlation harness crates.
//!
//! ## Components
//!
//! - Structured logs through `tracing-subscriber` (pretty or JSON)
//! - Prometheus counters and histograms for send/correlate flows
//!
//! ## Usage
//!
//! ```rust,ignore
//! use xcall_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::from_env())?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_SERVICE_NAME` | `xcall-harness` | Service name attached to logs |
//! | `XCALL_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `XCALL_JSON_LOGS` | `false` | Emit JSON lines instead of pretty output |
//! | `XCALL_CONSOLE_OUTPUT` | `true` | Write logs to stdout at all |
//! | `XCALL_METRICS_FILE` | unset | Prometheus text snapshot written at exit |

#![warn(missing_docs)]

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{
    encode_metrics, register_metrics, MetricsHandle, CORRELATIONS_MATCHED, CORRELATIONS_STARTED,
    CORRELATION_FAILURES, CORRELATION_LATENCY, SUBMISSIONS, SUBMISSION_FAILURES,
};

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Telemetry initialization errors.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The tracing subscriber could not be installed.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Prometheus registration failed.
    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The metrics snapshot could not be written.
    #[error("Failed to write metrics to {path}: {error}")]
    Snapshot {
        /// Target path
        path: String,
        /// I/O error
        error: String,
    },
}

/// Register metrics, then install logging.
///
/// Hold the returned guard for the whole run; dropping it writes the
/// metrics snapshot when `metrics_file` is set.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = register_metrics()?;
    init_logging(&config)?;

    Ok(TelemetryGuard {
        _metrics: metrics,
        metrics_file: config.metrics_file,
    })
}

/// Keeps telemetry alive for a harness run.
pub struct TelemetryGuard {
    _metrics: MetricsHandle,
    metrics_file: Option<PathBuf>,
}

impl TelemetryGuard {
    /// Write the current metrics in Prometheus text format to `path`.
    pub fn write_snapshot(&self, path: &Path) -> Result<(), TelemetryError> {
        let text = encode_metrics()?;
        fs::write(path, text).map_err(|e| TelemetryError::Snapshot {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(path) = self.metrics_file.take() {
            match self.write_snapshot(&path) {
                Ok(()) => tracing::info!(path = %path.display(), "Metrics snapshot written"),
                Err(e) => tracing::warn!(error = %e, "Metrics snapshot failed"),
            }
        }
    }
}

/// Log a correlation-engine event with the standard `chain`, `signature`
/// and `sn` fields.
///
/// ```rust,ignore
/// log_correlation!(info, "0x2.icon", "CallMessage", sn, "Correlated event", height = 42);
/// ```
#[macro_export]
macro_rules! log_correlation {
    ($level:ident, $chain:expr, $signature:expr, $sn:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            chain = %$chain,
            signature = %$signature,
            sn = %$sn,
            $($($field)*,)?
            $msg
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "xcall-harness");
    }

    #[test]
    fn test_snapshot_written() {
        let path = std::env::temp_dir().join(format!("xcall-metrics-{}.prom", std::process::id()));
        let guard = TelemetryGuard {
            _metrics: register_metrics().unwrap(),
            metrics_file: Some(path.clone()),
        };
        SUBMISSIONS.with_label_values(&["0x3.test", "send"]).inc();
        drop(guard);
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("xcall_send_submissions_total"));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_error_display() {
        let err = TelemetryError::Config("bad level".to_string());
        assert!(err.to_string().contains("bad level"));
    }
}
