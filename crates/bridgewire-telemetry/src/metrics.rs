//! Prometheus metrics for Bridgewire endpoints.
//!
//! All metrics follow the naming convention: `bridgewire_<area>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., messages_published_total)
//! - **Gauge**: Value that can go up or down (e.g., bridges_active)
//! - **Histogram**: Distribution of values (e.g., delivery_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Registry holding every Bridgewire metric
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // TRAFFIC
    // =========================================================================

    /// Messages handed to the transport by `publish`
    pub static ref MESSAGES_PUBLISHED: Counter = Counter::new(
        "bridgewire_messages_published_total",
        "Total messages handed to the transport"
    ).expect("metric creation failed");

    /// Subscriber invocations
    pub static ref MESSAGES_DELIVERED: Counter = Counter::new(
        "bridgewire_messages_delivered_total",
        "Total subscriber invocations for accepted inbound messages"
    ).expect("metric creation failed");

    /// Inbound messages dropped before reaching subscribers
    pub static ref MESSAGES_DROPPED: CounterVec = CounterVec::new(
        Opts::new("bridgewire_messages_dropped_total", "Inbound messages dropped"),
        &["reason"]  // rate_limited/malformed_shape/type_mismatch/volume_overflow/undecodable
    ).expect("metric creation failed");

    /// Time spent running inbound middleware and subscriber fan-out
    pub static ref DELIVERY_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "bridgewire_delivery_duration_seconds",
            "Time spent delivering one inbound message to a bridge"
        ).buckets(exponential_buckets(0.00001, 2.0, 15).expect("valid buckets"))
    ).expect("metric creation failed");

    // =========================================================================
    // REGISTRY
    // =========================================================================

    /// Tokens allocated by the hub
    pub static ref IDENTIFIERS_ALLOCATED: Counter = Counter::new(
        "bridgewire_identifiers_allocated_total",
        "Total tokens allocated by the hub"
    ).expect("metric creation failed");

    /// Peer resolutions that fell back to the uncompressed name
    pub static ref IDENTIFIER_RESOLVE_TIMEOUTS: Counter = Counter::new(
        "bridgewire_identifier_resolve_timeouts_total",
        "Peer identifier resolutions that degraded to the uncompressed name"
    ).expect("metric creation failed");

    // =========================================================================
    // BRIDGES
    // =========================================================================

    /// Middleware stages that failed open
    pub static ref MIDDLEWARE_FAILURES: CounterVec = CounterVec::new(
        Opts::new("bridgewire_middleware_failures_total", "Middleware stages that failed open"),
        &["direction"]  // inbound/outbound
    ).expect("metric creation failed");

    /// Live bridges
    pub static ref BRIDGES_ACTIVE: Gauge = Gauge::new(
        "bridgewire_bridges_active",
        "Number of bridges not yet destroyed"
    ).expect("metric creation failed");
}

/// Drop reason label values.
pub mod drop_reason {
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const MALFORMED_SHAPE: &str = "malformed_shape";
    pub const TYPE_MISMATCH: &str = "type_mismatch";
    pub const VOLUME_OVERFLOW: &str = "volume_overflow";
    pub const UNDECODABLE: &str = "undecodable";
}

/// Handle keeping the registry alive
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the crate registry.
///
/// Calling this more than once is harmless.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Traffic
        Box::new(MESSAGES_PUBLISHED.clone()),
        Box::new(MESSAGES_DELIVERED.clone()),
        Box::new(MESSAGES_DROPPED.clone()),
        Box::new(DELIVERY_DURATION.clone()),
        // Registry
        Box::new(IDENTIFIERS_ALLOCATED.clone()),
        Box::new(IDENTIFIER_RESOLVE_TIMEOUTS.clone()),
        // Bridges
        Box::new(MIDDLEWARE_FAILURES.clone()),
        Box::new(BRIDGES_ACTIVE.clone()),
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
pub fn gather_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Count one dropped inbound message.
pub fn record_drop(reason: &str) {
    MESSAGES_DROPPED.with_label_values(&[reason]).inc();
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram)
    };
}
