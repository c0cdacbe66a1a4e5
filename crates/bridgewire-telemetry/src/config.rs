//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging and metrics.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    pub service_name: String,

    /// Endpoint role label (hub or peer)
    pub role: String,

    /// Log level filter (trace, debug, info, warn, error)
    pub log_level: String,

    /// Whether to enable console output
    pub console_output: bool,

    /// Whether to enable JSON formatted logs
    pub json_logs: bool,

    /// Whether to register Prometheus metrics
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "bridgewire".to_string(),
            role: "hub".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            metrics_enabled: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BRIDGEWIRE_SERVICE_NAME`: Service name (default: bridgewire)
    /// - `BRIDGEWIRE_ROLE`: Role label (default: hub)
    /// - `BRIDGEWIRE_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `BRIDGEWIRE_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `BRIDGEWIRE_JSON_LOGS`: Enable JSON logs (default: false, true in containers)
    /// - `BRIDGEWIRE_METRICS`: Register Prometheus metrics (default: true)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("BRIDGEWIRE_SERVICE_NAME")
                .unwrap_or_else(|_| "bridgewire".to_string()),

            role: env::var("BRIDGEWIRE_ROLE").unwrap_or_else(|_| "hub".to_string()),

            log_level: env::var("BRIDGEWIRE_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("BRIDGEWIRE_CONSOLE_OUTPUT")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),

            json_logs: env::var("BRIDGEWIRE_JSON_LOGS")
                .map(|v| parse_flag(&v))
                .unwrap_or(is_container),

            metrics_enabled: env::var("BRIDGEWIRE_METRICS")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),
        }
    }

    /// Configuration for one endpoint role.
    pub fn for_role(role: &str) -> Self {
        let mut config = Self::from_env();
        config.role = role.to_string();
        config
    }

    /// Service name including the role, e.g. `bridgewire-peer`.
    pub fn full_service_name(&self) -> String {
        format!("{}-{}", self.service_name, self.role)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
