//! Cluster client traits for mocking
//!
//! The concrete kube-backed clients implement these traits, and reconciler
//! tests use the in-memory mocks instead.

use std::sync::Arc;

use crds::{Cluster, Machine, RKE2Config, RKE2ControlPlane};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret};

use crate::error::ClientError;

/// Typed access to the management cluster
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// Status patches carry the `resourceVersion` of the passed object, so a
/// stale write fails with [`ClientError::Conflict`].
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    // Bootstrap and control plane objects
    async fn get_rke2_config(&self, namespace: &str, name: &str) -> Result<RKE2Config, ClientError>;
    async fn patch_rke2_config_status(&self, config: &RKE2Config) -> Result<RKE2Config, ClientError>;
    async fn get_control_plane(&self, namespace: &str, name: &str) -> Result<RKE2ControlPlane, ClientError>;
    async fn patch_control_plane_status(&self, control_plane: &RKE2ControlPlane) -> Result<RKE2ControlPlane, ClientError>;

    // Cluster API objects
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Cluster, ClientError>;
    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Machine, ClientError>;
    /// Machines labelled with `cluster.x-k8s.io/cluster-name=<cluster_name>`
    async fn list_machines(&self, namespace: &str, cluster_name: &str) -> Result<Vec<Machine>, ClientError>;
    async fn patch_machine_status(&self, machine: &Machine) -> Result<Machine, ClientError>;

    // Core objects
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClientError>;
    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClientError>;
    async fn update_secret(&self, secret: &Secret) -> Result<Secret, ClientError>;
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, ClientError>;
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, ClientError>;
    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), ClientError>;

    /// Client for the workload cluster, built from `<cluster>-kubeconfig`
    async fn workload_cluster(&self, namespace: &str, cluster_name: &str) -> Result<Arc<dyn WorkloadClusterTrait>, ClientError>;
}

/// Read access to a workload cluster's nodes
#[async_trait::async_trait]
pub trait WorkloadClusterTrait: Send + Sync {
    /// Nodes labelled `node-role.kubernetes.io/control-plane=true`
    async fn list_control_plane_nodes(&self) -> Result<Vec<Node>, ClientError>;

    /// Detailed status of a single node
    async fn get_node(&self, name: &str) -> Result<Node, ClientError>;
}
