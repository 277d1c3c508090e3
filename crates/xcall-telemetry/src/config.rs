//! Telemetry settings read from the environment.

use std::env;
use std::path::PathBuf;

/// Logging and metrics settings for one harness process.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Name stamped on the startup log line
    pub service_name: String,

    /// `EnvFilter` directive, e.g. `info` or `xcall_correlation=debug`
    pub log_level: String,

    /// Write logs to stdout at all
    pub console_output: bool,

    /// JSON lines instead of pretty output
    pub json_logs: bool,

    /// Where to write the Prometheus text snapshot when the run ends
    pub metrics_file: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "xcall-harness".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            metrics_file: None,
        }
    }
}

fn flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

impl TelemetryConfig {
    /// Read settings from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `OTEL_SERVICE_NAME`: service name (default: xcall-harness)
    /// - `XCALL_LOG_LEVEL`, then `RUST_LOG`: filter directive (default: info)
    /// - `XCALL_CONSOLE_OUTPUT`: console logging (default: true)
    /// - `XCALL_JSON_LOGS`: JSON lines (default: on under `CI`)
    /// - `XCALL_METRICS_FILE`: metrics snapshot path (default: none)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_name: env::var("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
            log_level: env::var("XCALL_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or(defaults.log_level),
            console_output: flag("XCALL_CONSOLE_OUTPUT").unwrap_or(true),
            json_logs: flag("XCALL_JSON_LOGS").unwrap_or_else(|| env::var("CI").is_ok()),
            metrics_file: env::var_os("XCALL_METRICS_FILE").map(PathBuf::from),
        }
    }

    /// Settings for one tool; the service name becomes `xcall-<tool>`.
    pub fn for_tool(tool: &str) -> Self {
        Self {
            service_name: format!("xcall-{}", tool),
            ..Self::from_env()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "xcall-harness");
        assert!(config.console_output);
        assert!(config.metrics_file.is_none());
    }

    #[test]
    fn test_tool_name() {
        assert_eq!(TelemetryConfig::for_tool("probe").service_name, "xcall-probe");
    }
}
