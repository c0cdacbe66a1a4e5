//! # Bridgewire Telemetry
//!
//! Logging and metrics for hubs and peers.
//!
//! ## Components
//!
//! - **Logs**: `tracing` subscriber with env filter, pretty or JSON output
//! - **Metrics**: Prometheus counters for bridge traffic and registry activity
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bridgewire_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::for_role("hub"))?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BRIDGEWIRE_SERVICE_NAME` | `bridgewire` | Service name in logs |
//! | `BRIDGEWIRE_ROLE` | `hub` | Role label |
//! | `BRIDGEWIRE_LOG_LEVEL` | `info` | Log level filter |
//! | `BRIDGEWIRE_JSON_LOGS` | `false` | JSON formatted output |
//! | `BRIDGEWIRE_METRICS` | `true` | Register Prometheus metrics |

mod config;
mod logging;
pub mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{
    drop_reason, gather_metrics, record_drop, register_metrics, MetricsHandle, BRIDGES_ACTIVE,
    DELIVERY_DURATION, IDENTIFIERS_ALLOCATED, IDENTIFIER_RESOLVE_TIMEOUTS, MESSAGES_DELIVERED,
    MESSAGES_DROPPED, MESSAGES_PUBLISHED, MIDDLEWARE_FAILURES,
};
pub use tracing_setup::TracingGuard;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and metrics.
///
/// Returns a guard that should be held for the lifetime of the process.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = if config.metrics_enabled {
        Some(register_metrics()?)
    } else {
        None
    };

    let tracing = tracing_setup::init_tracing(&config)?;

    Ok(TelemetryGuard {
        _tracing: tracing,
        _metrics: metrics,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _tracing: TracingGuard,
    _metrics: Option<MetricsHandle>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}
