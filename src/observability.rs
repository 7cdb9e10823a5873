//! Logging and metrics bootstrap
//!
//! Tracing goes through a `tracing-subscriber` registry with an
//! `EnvFilter` (`RUST_LOG` wins over the configured filter) and either the
//! human-readable or the JSON formatter. Metrics live in a process-wide
//! Prometheus registry rendered with [`gather_metrics`].

use crate::config::ObservabilityConfig;
use crate::error::{AppError, Result};
use crate::messaging::init_messaging_metrics;
use lazy_static::lazy_static;
use once_cell::sync::OnceCell;
use prometheus::{GaugeVec, Opts, Registry};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    /// Build information, always 1
    ///
    /// Labels: version
    pub static ref BUILD_INFO: GaugeVec = GaugeVec::new(
        Opts::new("build_info", "Build information").namespace("relay_bus"),
        &["version"]
    )
    .expect("Failed to create build_info metric");
}

/// Outcome of the first registration, replayed to later callers
static METRICS_INIT: OnceCell<std::result::Result<(), String>> = OnceCell::new();

/// Install the global tracing subscriber
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .map_err(|e| AppError::Observability(format!("invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_logs {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };

    result.map_err(|e| AppError::Observability(e.to_string()))
}

/// Register all metrics with [`PROMETHEUS_REGISTRY`].
///
/// Registration runs once; every later call reports the same outcome.
pub fn init_metrics() -> Result<()> {
    init_metrics_in(&METRICS_INIT, &PROMETHEUS_REGISTRY)
}

fn init_metrics_in(
    cell: &OnceCell<std::result::Result<(), String>>,
    registry: &Registry,
) -> Result<()> {
    cell.get_or_init(|| register_metrics(registry).map_err(|e| e.to_string()))
        .clone()
        .map_err(AppError::Observability)
}

fn register_metrics(registry: &Registry) -> std::result::Result<(), prometheus::Error> {
    init_messaging_metrics(registry)?;
    registry.register(Box::new(BUILD_INFO.clone()))?;

    BUILD_INFO
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1.0);
    Ok(())
}

/// Generate Prometheus text format metrics
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
