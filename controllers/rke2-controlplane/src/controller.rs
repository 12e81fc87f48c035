//! Main controller implementation.
//!
//! Starts the RKE2ControlPlane watcher and the probe server and keeps both
//! tasks alive.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cluster_client::KubeClusterClient;
use controller_common::{ProbeState, ReconcileMetrics, serve_probes};
use crds::{Machine, RKE2ControlPlane};
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
    pub health_check_interval: Duration,
}

/// RKE2 control plane controller.
pub struct Controller {
    control_plane_watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<std::io::Result<()>>,
}

impl Controller {
    pub async fn new(settings: Settings) -> Result<Self, ControllerError> {
        info!("Initializing RKE2 control plane controller");

        let kube_client = Client::try_default().await?;

        let (control_plane_api, machine_api): (Api<RKE2ControlPlane>, Api<Machine>) =
            match settings.namespace.as_deref() {
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
        let reconciler = Arc::new(Reconciler::new(cluster_client, settings.health_check_interval));

        let watcher = Watcher::new(
            reconciler,
            metrics,
            control_plane_api,
            machine_api,
            settings.concurrency,
        );
        let control_plane_watcher = tokio::spawn(async move { watcher.watch_control_planes().await });

        probes.set_ready(true);
        info!("RKE2 control plane controller initialized");

        Ok(Self {
            control_plane_watcher,
            probe_server,
        })
    }

    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("RKE2 control plane controller running");

        tokio::select! {
            result = &mut self.control_plane_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("RKE2ControlPlane watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("RKE2ControlPlane watcher error: {}", e)))?;
            }
            result = &mut self.probe_server => {
                result.map_err(|e| ControllerError::Watch(format!("Probe server panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Probe server error: {}", e)))?;
            }
        }

        error!("RKE2 control plane controller task exited");
        Ok(())
    }
}
