//! kube-backed management cluster client

use std::sync::Arc;

use crds::{Cluster, Machine, RKE2Config, RKE2ControlPlane, CLUSTER_NAME_LABEL};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::client_trait::{ClusterClientTrait, WorkloadClusterTrait};
use crate::error::ClientError;
use crate::workload::{KubeWorkloadCluster, WORKLOAD_CLIENT_TIMEOUT};

/// Secret data key holding kubeconfig and token values
const VALUE_KEY: &str = "value";

/// Management cluster client over `kube::Api`
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get<K>(&self, namespace: &str, name: &str) -> Result<K, ClientError>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
    {
        self.api::<K>(namespace)
            .get(name)
            .await
            .map_err(|e| ClientError::from_kube(e, describe::<K>(namespace, name)))
    }

    async fn create<K>(&self, object: &K) -> Result<K, ClientError>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Serialize
            + DeserializeOwned
            + std::fmt::Debug,
    {
        let (namespace, name) = object_key(object)?;
        self.api::<K>(&namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| ClientError::from_kube(e, describe::<K>(&namespace, &name)))
    }

    /// Merge-patch the status subresource, guarded by the object's resourceVersion
    async fn patch_status<K, S>(&self, object: &K, status: &S) -> Result<K, ClientError>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
        S: Serialize,
    {
        let (namespace, name) = object_key(object)?;
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": object.resource_version() },
            "status": status,
        });
        debug!("Patching status of {}", describe::<K>(&namespace, &name));
        self.api::<K>(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ClientError::from_kube(e, describe::<K>(&namespace, &name)))
    }
}

fn describe<K: Resource<DynamicType = ()>>(namespace: &str, name: &str) -> String {
    format!("{} {}/{}", K::kind(&()), namespace, name)
}

fn object_key<K: Resource>(object: &K) -> Result<(String, String), ClientError> {
    let meta = object.meta();
    let name = meta
        .name
        .clone()
        .ok_or_else(|| ClientError::InvalidObject("object has no metadata.name".to_string()))?;
    let namespace = meta
        .namespace
        .clone()
        .ok_or_else(|| ClientError::InvalidObject(format!("object {} has no metadata.namespace", name)))?;
    Ok((namespace, name))
}

#[async_trait::async_trait]
impl ClusterClientTrait for KubeClusterClient {
    async fn get_rke2_config(&self, namespace: &str, name: &str) -> Result<RKE2Config, ClientError> {
        self.get(namespace, name).await
    }

    async fn patch_rke2_config_status(&self, config: &RKE2Config) -> Result<RKE2Config, ClientError> {
        self.patch_status(config, &config.status).await
    }

    async fn get_control_plane(&self, namespace: &str, name: &str) -> Result<RKE2ControlPlane, ClientError> {
        self.get(namespace, name).await
    }

    async fn patch_control_plane_status(&self, control_plane: &RKE2ControlPlane) -> Result<RKE2ControlPlane, ClientError> {
        self.patch_status(control_plane, &control_plane.status).await
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Cluster, ClientError> {
        self.get(namespace, name).await
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Machine, ClientError> {
        self.get(namespace, name).await
    }

    async fn list_machines(&self, namespace: &str, cluster_name: &str) -> Result<Vec<Machine>, ClientError> {
        let params = ListParams::default().labels(&format!("{}={}", CLUSTER_NAME_LABEL, cluster_name));
        let machines = self
            .api::<Machine>(namespace)
            .list(&params)
            .await
            .map_err(|e| ClientError::from_kube(e, format!("Machines of cluster {}/{}", namespace, cluster_name)))?;
        Ok(machines.items)
    }

    async fn patch_machine_status(&self, machine: &Machine) -> Result<Machine, ClientError> {
        self.patch_status(machine, &machine.status).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClientError> {
        self.get(namespace, name).await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClientError> {
        self.create(secret).await
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret, ClientError> {
        let (namespace, name) = object_key(secret)?;
        self.api::<Secret>(&namespace)
            .replace(&name, &PostParams::default(), secret)
            .await
            .map_err(|e| ClientError::from_kube(e, describe::<Secret>(&namespace, &name)))
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, ClientError> {
        self.get(namespace, name).await
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, ClientError> {
        self.create(config_map).await
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), ClientError> {
        self.api::<ConfigMap>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| ClientError::from_kube(e, describe::<ConfigMap>(namespace, name)))?;
        Ok(())
    }

    async fn workload_cluster(&self, namespace: &str, cluster_name: &str) -> Result<Arc<dyn WorkloadClusterTrait>, ClientError> {
        let secret_name = format!("{}-kubeconfig", cluster_name);
        let secret: Secret = self.get(namespace, &secret_name).await?;
        let raw = secret
            .data
            .as_ref()
            .and_then(|data| data.get(VALUE_KEY))
            .ok_or_else(|| ClientError::Kubeconfig(format!("secret {}/{} has no {} key", namespace, secret_name, VALUE_KEY)))?;
        let yaml = String::from_utf8(raw.0.clone())
            .map_err(|e| ClientError::Kubeconfig(format!("secret {}/{} is not UTF-8: {}", namespace, secret_name, e)))?;

        let kubeconfig = Kubeconfig::from_yaml(&yaml)
            .map_err(|e| ClientError::Kubeconfig(format!("failed to parse kubeconfig for {}: {}", cluster_name, e)))?;
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ClientError::Kubeconfig(format!("failed to load kubeconfig for {}: {}", cluster_name, e)))?;
        config.connect_timeout = Some(WORKLOAD_CLIENT_TIMEOUT);
        config.read_timeout = Some(WORKLOAD_CLIENT_TIMEOUT);
        let client = Client::try_from(config)?;

        debug!("Built workload cluster client for {}/{}", namespace, cluster_name);
        Ok(Arc::new(KubeWorkloadCluster::new(client)))
    }
}

