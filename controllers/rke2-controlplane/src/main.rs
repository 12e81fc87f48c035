//! RKE2 Control Plane Controller
//!
//! Cluster API control plane provider for RKE2. Periodically checks the
//! workload cluster's control plane nodes and publishes:
//! - per Machine `AgentHealthy` and `EtcdMemberHealthy` conditions
//! - the RKE2ControlPlane roll-up conditions, replica counts and the server
//!   addresses new nodes join through

mod controller;
mod error;
mod reconciler;
mod watcher;

#[cfg(test)]
mod reconciler_test;
#[cfg(test)]
mod test_utils;

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use controller::{Controller, Settings};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::ControllerError;

const DEFAULT_CONCURRENCY: u16 = 3;
const DEFAULT_PROBE_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_HEALTH_CHECK_INTERVAL_SECONDS: u64 = 30;

/// Parse an optional environment variable, rejecting unparsable values
fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, ControllerError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|e| ControllerError::InvalidConfig(format!("{} {:?}: {}", name, value, e))),
        Err(_) => Ok(default),
    }
}

fn settings_from_env() -> Result<Settings, ControllerError> {
    let namespace = env::var("WATCH_NAMESPACE").ok().filter(|ns| !ns.is_empty());

    let concurrency = env_or("CONTROLLER_CONCURRENCY", DEFAULT_CONCURRENCY)?;
    if concurrency == 0 {
        return Err(ControllerError::InvalidConfig(
            "CONTROLLER_CONCURRENCY must be positive".to_string(),
        ));
    }

    let interval = env_or("HEALTH_CHECK_INTERVAL_SECONDS", DEFAULT_HEALTH_CHECK_INTERVAL_SECONDS)?;
    if interval == 0 {
        return Err(ControllerError::InvalidConfig(
            "HEALTH_CHECK_INTERVAL_SECONDS must be positive".to_string(),
        ));
    }

    let probe_address = match env::var("PROBE_BIND_ADDRESS") {
        Ok(value) => value
            .parse::<SocketAddr>()
            .map_err(|e| ControllerError::InvalidConfig(format!("PROBE_BIND_ADDRESS {:?}: {}", value, e)))?,
        Err(_) => DEFAULT_PROBE_ADDRESS
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("default probe address: {}", e)))?,
    };

    Ok(Settings {
        namespace,
        concurrency,
        probe_address,
        health_check_interval: Duration::from_secs(interval),
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

    info!("Starting RKE2 control plane controller");

    let settings = settings_from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", settings.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Concurrency: {}", settings.concurrency);
    info!("  Probe address: {}", settings.probe_address);
    info!("  Health check interval: {:?}", settings.health_check_interval);

    let controller = Controller::new(settings).await?;
    controller.run().await?;

    Ok(())
}
