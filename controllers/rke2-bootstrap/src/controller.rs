//! Main controller implementation.
//!
//! Wires the kube client, the reconciler and the RKE2Config watcher
//! together, and keeps the watcher and probe server tasks alive.

use std::net::SocketAddr;
use std::sync::Arc;

use cluster_client::KubeClusterClient;
use controller_common::{ProbeState, ReconcileMetrics, serve_probes};
use crds::{Machine, RKE2Config};
use kube::{Api, Client};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;

/// Runtime settings read from the environment
#[derive(Debug, Clone)]
pub struct Settings {
    /// None watches all namespaces
    pub namespace: Option<String>,
    pub concurrency: u16,
    pub probe_address: SocketAddr,
}

/// RKE2 bootstrap controller.
pub struct Controller {
    config_watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<std::io::Result<()>>,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(settings: Settings) -> Result<Self, ControllerError> {
        info!("Initializing RKE2 bootstrap controller");

        let kube_client = Client::try_default().await?;

        let (config_api, machine_api): (Api<RKE2Config>, Api<Machine>) = match settings.namespace.as_deref() {
            Some(ns) => (
                Api::namespaced(kube_client.clone(), ns),
                Api::namespaced(kube_client.clone(), ns),
            ),
            None => (Api::all(kube_client.clone()), Api::all(kube_client.clone())),
        };

        let metrics = ReconcileMetrics::new()?;
        let probes = ProbeState::new(metrics.clone());
        let probe_server = {
            let probes = probes.clone();
            let address = settings.probe_address;
            tokio::spawn(async move { serve_probes(address, probes).await })
        };

        let cluster_client = Arc::new(KubeClusterClient::new(kube_client));
        let reconciler = Arc::new(Reconciler::new(cluster_client));

        let watcher = Watcher::new(reconciler, metrics, config_api, machine_api, settings.concurrency);
        let config_watcher = tokio::spawn(async move { watcher.watch_rke2_configs().await });

        probes.set_ready(true);
        info!("RKE2 bootstrap controller initialized");

        Ok(Self {
            config_watcher,
            probe_server,
        })
    }

    /// Runs until the watcher or the probe server stops.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("RKE2 bootstrap controller running");

        tokio::select! {
            result = &mut self.config_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("RKE2Config watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("RKE2Config watcher error: {}", e)))?;
            }
            result = &mut self.probe_server => {
                result.map_err(|e| ControllerError::Watch(format!("Probe server panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Probe server error: {}", e)))?;
            }
        }

        error!("RKE2 bootstrap controller task exited");
        Ok(())
    }
}
