//! Kubernetes resource watchers.
//!
//! RKE2ControlPlane objects are reconciled by a `kube_runtime::Controller`
//! that also owns their Machines, so a Machine change triggers an early
//! health cycle. Otherwise cycles follow the requeue interval.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use controller_common::ReconcileMetrics;
use crds::{Machine, RKE2ControlPlane};
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{Controller, watcher};
use tracing::{debug, error, info};

use crate::error::ControllerError;
use crate::reconciler::Reconciler;

/// Name used in logs and metric labels
pub const CONTROLLER_NAME: &str = "rke2-controlplane";

fn object_key(control_plane: &RKE2ControlPlane) -> String {
    format!(
        "{}/{}",
        control_plane.namespace().unwrap_or_default(),
        control_plane.name_any()
    )
}

/// Watches RKE2ControlPlane resources and the Machines they own.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    metrics: ReconcileMetrics,
    control_plane_api: Api<RKE2ControlPlane>,
    machine_api: Api<Machine>,
    concurrency: u16,
}

impl Watcher {
    pub fn new(
        reconciler: Arc<Reconciler>,
        metrics: ReconcileMetrics,
        control_plane_api: Api<RKE2ControlPlane>,
        machine_api: Api<Machine>,
        concurrency: u16,
    ) -> Self {
        Self {
            reconciler,
            metrics,
            control_plane_api,
            machine_api,
            concurrency,
        }
    }

    pub async fn watch_control_planes(&self) -> Result<(), ControllerError> {
        info!("Starting RKE2ControlPlane watcher");

        let metrics = self.metrics.clone();
        let reconcile = move |control_plane: Arc<RKE2ControlPlane>, ctx: Arc<Reconciler>| {
            let metrics = metrics.clone();
            async move {
                debug!("Running health cycle for RKE2ControlPlane {}", object_key(&control_plane));
                let timer = metrics.start(CONTROLLER_NAME);
                let result = ctx.reconcile_control_plane(&control_plane).await;
                timer.finish(result.is_err());
                if result.is_ok() {
                    ctx.backoff().reset(&object_key(&control_plane));
                }
                result
            }
        };

        let controller_config = ControllerConfig::default()
            .debounce(Duration::from_secs(1))
            .concurrency(self.concurrency);

        let controller = Controller::new(self.control_plane_api.clone(), watcher::Config::default())
            .owns(self.machine_api.clone(), watcher::Config::default())
            .with_config(controller_config);
        let store = controller.store();

        let error_policy = move |control_plane: Arc<RKE2ControlPlane>, error: &ControllerError, ctx: Arc<Reconciler>| {
            let live: HashSet<String> = store.state().iter().map(|cp| object_key(cp)).collect();
            ctx.backoff().retain(|key| live.contains(key));

            let key = object_key(&control_plane);
            let (delay, attempts) = ctx.backoff().next_backoff(&key);
            error!(
                "Health cycle for RKE2ControlPlane {} failed (attempt {}), retrying in {:?}: {}",
                key, attempts, delay, error
            );
            Action::requeue(delay)
        };

        controller
            .run(reconcile, error_policy, self.reconciler.clone())
            .for_each(|res| async move {
                if let Err(e) = res {
                    error!("Controller error for RKE2ControlPlane: {}", e);
                }
            })
            .await;

        Ok(())
    }
}
