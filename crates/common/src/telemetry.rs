//! Logging and metrics exporter setup shared by the worker binaries

use crate::config::ObservabilityConfig;
use crate::errors::{AppError, Result};
use crate::metrics::{register_metrics, CLASSIFICATION_BUCKETS, METRICS_PREFIX};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Serve Prometheus metrics on `metrics_port`; port 0 leaves recording a no-op
pub fn install_metrics_exporter(config: &ObservabilityConfig) -> Result<()> {
    if config.metrics_port == 0 {
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_classification_duration_seconds", METRICS_PREFIX)),
            CLASSIFICATION_BUCKETS,
        )
        .map_err(|e| AppError::Configuration {
            message: format!("Invalid histogram buckets: {}", e),
        })?
        .install()
        .map_err(|e| AppError::Configuration {
            message: format!("Failed to install metrics exporter: {}", e),
        })?;

    register_metrics();
    info!(%addr, "Metrics exporter listening");

    Ok(())
}
