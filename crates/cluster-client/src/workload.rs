//! kube-backed workload cluster client

use std::time::Duration;

use k8s_openapi::api::core::v1::Node;
use kube::Client;
use kube::api::{Api, ListParams};

use crate::client_trait::WorkloadClusterTrait;
use crate::error::ClientError;

/// Label carried by RKE2 server nodes
pub const CONTROL_PLANE_NODE_LABEL: &str = "node-role.kubernetes.io/control-plane";

/// Connect and read timeout for workload cluster requests
pub const WORKLOAD_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Workload cluster client over `kube::Api<Node>`
#[derive(Clone)]
pub struct KubeWorkloadCluster {
    client: Client,
}

impl KubeWorkloadCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }
}

#[async_trait::async_trait]
impl WorkloadClusterTrait for KubeWorkloadCluster {
    async fn list_control_plane_nodes(&self) -> Result<Vec<Node>, ClientError> {
        let params = ListParams::default().labels(&format!("{}=true", CONTROL_PLANE_NODE_LABEL));
        let nodes = self
            .nodes()
            .list(&params)
            .await
            .map_err(|e| ClientError::from_kube(e, "control plane nodes"))?;
        Ok(nodes.items)
    }

    async fn get_node(&self, name: &str) -> Result<Node, ClientError> {
        self.nodes()
            .get(name)
            .await
            .map_err(|e| ClientError::from_kube(e, format!("Node {}", name)))
    }
}
