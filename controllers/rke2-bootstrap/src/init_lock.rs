//! Cluster initialization lock
//!
//! Only one control plane Machine may run the init path of a cluster. The
//! lock is a ConfigMap named `<cluster>-lock`; creating it is the atomic
//! acquire, deleting it releases. The holder is recorded so the same Machine
//! can re-acquire after a controller restart.
//!
//! There is no lease: a lock whose holder vanished stays until the cluster
//! reports `ControlPlaneInitialized` or an operator deletes it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use cluster_client::ClusterClientTrait;
use crds::{CLUSTER_NAME_LABEL, Cluster};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// ConfigMap key holding the [`LockInformation`] JSON
pub const LOCK_DATA_KEY: &str = "lock-information";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LockInformation {
    pub machine_name: String,
}

pub fn lock_name(cluster_name: &str) -> String {
    format!("{}-lock", cluster_name)
}

#[async_trait]
pub trait InitLock: Send + Sync {
    /// Try to become the initializing Machine of the cluster
    ///
    /// Returns false when another Machine holds the lock or the store
    /// could not be written; callers retry on their next requeue.
    async fn lock(&self, cluster: &Cluster, machine_name: &str) -> bool;

    /// Release the lock; releasing an absent lock succeeds
    async fn unlock(&self, cluster: &Cluster) -> bool;
}

/// [`InitLock`] backed by a ConfigMap in the cluster namespace
pub struct ConfigMapInitLock {
    client: Arc<dyn ClusterClientTrait>,
}

impl ConfigMapInitLock {
    pub fn new(client: Arc<dyn ClusterClientTrait>) -> Self {
        Self { client }
    }

    async fn holder(&self, namespace: &str, name: &str) -> Option<String> {
        let config_map = match self.client.get_config_map(namespace, name).await {
            Ok(config_map) => config_map,
            Err(e) => {
                warn!("Failed to read init lock {}/{}: {}", namespace, name, e);
                return None;
            }
        };
        let raw = config_map.data.as_ref()?.get(LOCK_DATA_KEY)?;
        match serde_json::from_str::<LockInformation>(raw) {
            Ok(info) => Some(info.machine_name),
            Err(e) => {
                warn!("Init lock {}/{} holds unreadable data: {}", namespace, name, e);
                None
            }
        }
    }
}

#[async_trait]
impl InitLock for ConfigMapInitLock {
    async fn lock(&self, cluster: &Cluster, machine_name: &str) -> bool {
        let namespace = cluster.namespace().unwrap_or_default();
        let cluster_name = cluster.name_any();
        let name = lock_name(&cluster_name);

        let info = LockInformation {
            machine_name: machine_name.to_string(),
        };
        let data = match serde_json::to_string(&info) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to encode init lock information: {}", e);
                return false;
            }
        };
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.clone()),
                labels: Some(BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster_name.clone())])),
                owner_references: cluster.controller_owner_ref(&()).map(|o| vec![o]),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(LOCK_DATA_KEY.to_string(), data)])),
            ..Default::default()
        };

        match self.client.create_config_map(&config_map).await {
            Ok(_) => {
                info!("Machine {} acquired init lock {}/{}", machine_name, namespace, name);
                true
            }
            Err(e) if e.is_already_exists() => match self.holder(&namespace, &name).await {
                Some(holder) if holder == machine_name => {
                    debug!("Machine {} already holds init lock {}/{}", machine_name, namespace, name);
                    true
                }
                Some(holder) => {
                    info!(
                        "Init lock {}/{} is held by machine {}, {} waits",
                        namespace, name, holder, machine_name
                    );
                    false
                }
                None => false,
            },
            Err(e) => {
                warn!("Failed to create init lock {}/{}: {}", namespace, name, e);
                false
            }
        }
    }

    async fn unlock(&self, cluster: &Cluster) -> bool {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = lock_name(&cluster.name_any());

        match self.client.delete_config_map(&namespace, &name).await {
            Ok(()) => {
                info!("Released init lock {}/{}", namespace, name);
                true
            }
            Err(e) if e.is_not_found() => true,
            Err(e) => {
                warn!("Failed to release init lock {}/{}: {}", namespace, name, e);
                false
            }
        }
    }
}
