//! Kubernetes resource watchers.
//!
//! RKE2Config objects are reconciled by a `kube_runtime::Controller`. Machine
//! events are mapped to the RKE2Config their `spec.bootstrap.configRef`
//! names, so a config is revisited once its owner appears or changes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use controller_common::ReconcileMetrics;
use crds::{Machine, RKE2Config};
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, watcher};
use tracing::{debug, error, info, warn};

use crate::error::ControllerError;
use crate::reconciler::Reconciler;

/// Name used in logs and metric labels
pub const CONTROLLER_NAME: &str = "rke2-bootstrap";

/// RKE2Config referenced by a Machine's bootstrap section
pub fn config_for_machine(machine: &Machine) -> Option<ObjectRef<RKE2Config>> {
    let reference = machine.spec.bootstrap.config_ref.as_ref()?;
    if reference.is_empty() || reference.kind.as_deref().is_some_and(|kind| kind != "RKE2Config") {
        return None;
    }
    let namespace = machine.namespace().unwrap_or_default();
    Some(ObjectRef::new(&reference.name).within(reference.namespace_or(&namespace)))
}

fn object_key(config: &RKE2Config) -> String {
    format!("{}/{}", config.namespace().unwrap_or_default(), config.name_any())
}

/// Watches RKE2Config and Machine resources.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    metrics: ReconcileMetrics,
    config_api: Api<RKE2Config>,
    machine_api: Api<Machine>,
    concurrency: u16,
}

impl Watcher {
    pub fn new(
        reconciler: Arc<Reconciler>,
        metrics: ReconcileMetrics,
        config_api: Api<RKE2Config>,
        machine_api: Api<Machine>,
        concurrency: u16,
    ) -> Self {
        Self {
            reconciler,
            metrics,
            config_api,
            machine_api,
            concurrency,
        }
    }

    /// Run the RKE2Config controller until its stream ends
    pub async fn watch_rke2_configs(&self) -> Result<(), ControllerError> {
        info!("Starting RKE2Config watcher");

        let metrics = self.metrics.clone();
        let reconcile = move |config: Arc<RKE2Config>, ctx: Arc<Reconciler>| {
            let metrics = metrics.clone();
            async move {
                debug!("Reconciling RKE2Config {}", object_key(&config));
                let timer = metrics.start(CONTROLLER_NAME);
                let result = ctx.reconcile_rke2_config(&config).await;
                timer.finish(result.is_err());
                match result {
                    Ok(action) => {
                        ctx.backoff().reset(&object_key(&config));
                        Ok(action)
                    }
                    Err(e) => Err(e),
                }
            }
        };

        let controller_config = ControllerConfig::default()
            .debounce(Duration::from_secs(1))
            .concurrency(self.concurrency);

        let controller = Controller::new(self.config_api.clone(), watcher::Config::default())
            .watches(self.machine_api.clone(), watcher::Config::default(), |machine: Machine| {
                config_for_machine(&machine)
            })
            .with_config(controller_config);
        let store = controller.store();

        let error_policy = move |config: Arc<RKE2Config>, error: &ControllerError, ctx: Arc<Reconciler>| {
            let live: HashSet<String> = store.state().iter().map(|c| object_key(c)).collect();
            ctx.backoff().retain(|key| live.contains(key));

            let key = object_key(&config);
            let (delay, attempts) = ctx.backoff().next_backoff(&key);
            if attempts > 3 {
                warn!(
                    "Reconciliation of RKE2Config {} failed {} times in a row, retrying in {:?}: {}",
                    key, attempts, delay, error
                );
            } else {
                error!("Reconciliation error for RKE2Config {}: {}, retrying in {:?}", key, error, delay);
            }
            Action::requeue(delay)
        };

        controller
            .run(reconcile, error_policy, self.reconciler.clone())
            .for_each(|res| async move {
                if let Err(e) = res {
                    error!("Controller error for RKE2Config: {}", e);
                }
            })
            .await;

        Ok(())
    }
}
