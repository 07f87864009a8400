//! Telemetry setup for dnsaas-core.
//!
//! Supports:
//! - Tracing with configurable log levels
//! - Prometheus metrics endpoint (with `prometheus` feature)

#[cfg(feature = "prometheus")]
use std::net::SocketAddr;
#[cfg(feature = "prometheus")]
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

/// Initialize telemetry (tracing, optional metrics exporter).
pub fn init(config: &TelemetryConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    #[cfg(feature = "prometheus")]
    if let Some(addr) = config.prometheus_addr {
        start_prometheus_exporter(addr)?;
    }

    Ok(())
}

/// Start Prometheus metrics HTTP exporter.
#[cfg(feature = "prometheus")]
fn start_prometheus_exporter(
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!(%addr, "Prometheus metrics exporter started");

    Ok(())
}
