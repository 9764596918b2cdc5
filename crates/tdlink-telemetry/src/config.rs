//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for log output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    pub service_name: String,

    /// Log filter directive (`info`, `tdlink=debug,warn`, ...)
    pub log_level: String,

    /// Whether to write logs to the console at all
    pub console_output: bool,

    /// JSON lines instead of human-readable output
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "tdlink".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TDLINK_SERVICE_NAME`: Service name (default: tdlink)
    /// - `TDLINK_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `TDLINK_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `TDLINK_JSON_LOGS`: Enable JSON logs (default: false, true in containers)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let is_container =
            lookup("KUBERNETES_SERVICE_HOST").is_some() || lookup("DOCKER_CONTAINER").is_some();

        Self {
            service_name: lookup("TDLINK_SERVICE_NAME").unwrap_or_else(|| "tdlink".to_string()),

            log_level: lookup("TDLINK_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or_else(|| "info".to_string()),

            console_output: lookup("TDLINK_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            json_logs: lookup("TDLINK_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),
        }
    }

    /// Same settings with a different service name.
    pub fn for_service(mut self, service_name: &str) -> Self {
        self.service_name = service_name.to_string();
        self
    }
}
