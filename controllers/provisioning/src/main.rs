//! Provisioning Controller
//!
//! Drives O-Cloud cluster provisioning from two CRDs:
//! - ClusterTemplate: validated once per generation against its defaults
//! - ProvisioningRequest: moved through hardware allocation, cluster
//!   installation and configuration, one phase per reconciliation
//!
//! Health checks and Prometheus metrics are served on `METRICS_BIND_ADDRESS`.

mod backoff;
mod clusters;
mod config;
mod controller;
mod duration;
mod error;
mod metrics;
mod plugins;
mod reconciler;
mod store;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting Provisioning Controller");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Watch namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Controller namespace: {}", config.controller_namespace);
    info!("  Hardware plugin namespace: {}", config.hwplugin_namespace);
    info!(
        "  Hardware plugin retries: {} every {:?}, timeout {:?}",
        config.hwplugin_retry.max_attempts, config.hwplugin_retry.delay, config.hwplugin_timeout
    );
    info!("  Metrics address: {}", config.metrics_bind_address);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
