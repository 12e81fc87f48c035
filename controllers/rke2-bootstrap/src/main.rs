//! RKE2 Bootstrap Controller
//!
//! Cluster API bootstrap provider for RKE2. Every RKE2Config owned by a
//! Machine is turned into a cloud-init payload Secret:
//! - the first control plane Machine initializes the cluster under a lock
//! - later control plane Machines and workers join through the first
//!   available server of the RKE2ControlPlane

mod controller;
mod error;
mod init_lock;
mod reconciler;
mod token;
mod watcher;

#[cfg(test)]
mod test_utils;

use std::env;
use std::net::SocketAddr;

use controller::{Controller, Settings};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::ControllerError;

const DEFAULT_CONCURRENCY: u16 = 3;
const DEFAULT_PROBE_ADDRESS: &str = "0.0.0.0:8080";

fn settings_from_env() -> Result<Settings, ControllerError> {
    let namespace = env::var("WATCH_NAMESPACE").ok().filter(|ns| !ns.is_empty());

    let concurrency = match env::var("CONTROLLER_CONCURRENCY") {
        Ok(value) => value
            .parse::<u16>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ControllerError::InvalidConfig(format!("CONTROLLER_CONCURRENCY must be a positive integer, got {:?}", value)))?,
        Err(_) => DEFAULT_CONCURRENCY,
    };

    let probe_address = env::var("PROBE_BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_PROBE_ADDRESS.to_string());
    let probe_address = probe_address
        .parse::<SocketAddr>()
        .map_err(|e| ControllerError::InvalidConfig(format!("PROBE_BIND_ADDRESS {:?}: {}", probe_address, e)))?;

    Ok(Settings {
        namespace,
        concurrency,
        probe_address,
    })
}

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube's rustls client needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("rustls crypto provider already installed");
    }

    info!("Starting RKE2 bootstrap controller");

    let settings = settings_from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", settings.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Concurrency: {}", settings.concurrency);
    info!("  Probe address: {}", settings.probe_address);

    let controller = Controller::new(settings).await?;
    controller.run().await?;

    Ok(())
}
