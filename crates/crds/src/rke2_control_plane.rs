//! RKE2ControlPlane CRD
//!
//! Describes the control plane of a Cluster. The bootstrap controller reads
//! `serverConfig` and `manifestsConfigMapReference` when rendering server
//! nodes, and `status.availableServerIPs` when joining new nodes. The control
//! plane controller owns the status.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{Condition, Conditioned};
use crate::references::ObjectReference;

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "controlplane.cluster.x-k8s.io",
    version = "v1alpha1",
    kind = "RKE2ControlPlane",
    namespaced,
    status = "RKE2ControlPlaneStatus",
    shortname = "rke2cp"
)]
#[serde(rename_all = "camelCase")]
pub struct RKE2ControlPlaneSpec {
    /// Desired number of control plane machines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// RKE2 version for control plane machines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub server_config: RKE2ServerConfig,

    /// ConfigMap whose keys are written as auto-deploy manifests on the
    /// initial server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifests_config_map_reference: Option<ObjectReference>,
}

/// Server-only settings rendered into config.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RKE2ServerConfig {
    /// CNI plugin (e.g., "canal", "calico", "cilium", "none")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cni: Option<String>,

    /// Extra SANs for the serving certificate
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls_san: Vec<String>,

    /// Packaged components to disable (e.g., "rke2-ingress-nginx")
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disable_components: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_provider_name: Option<String>,

    /// ConfigMap with a `cloud-config` key passed to the cloud provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_provider_config_map: Option<ObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_domain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_cidr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_cidr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd: Option<EtcdConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdConfig {
    #[serde(default)]
    pub expose_metrics: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_schedule_cron: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_retention: Option<String>,

    #[serde(default)]
    pub disable_snapshots: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RKE2ControlPlaneStatus {
    /// Addresses of control plane machines whose agent is healthy
    #[serde(default, rename = "availableServerIPs", skip_serializing_if = "Vec::is_empty")]
    pub available_server_ips: Vec<String>,

    /// Set once the first server is ready; never cleared
    #[serde(default)]
    pub initialized: bool,

    #[serde(default)]
    pub ready: bool,

    #[serde(default)]
    pub replicas: i32,

    #[serde(default)]
    pub ready_replicas: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Conditioned for RKE2ControlPlaneStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl RKE2ControlPlane {
    /// First healthy server address, used as the join endpoint
    pub fn first_available_server(&self) -> Option<&str> {
        self.status
            .as_ref()?
            .available_server_ips
            .first()
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_server_ips_field_name() {
        let status: RKE2ControlPlaneStatus = serde_json::from_value(serde_json::json!({
            "availableServerIPs": ["10.0.0.10", "10.0.0.11"],
            "initialized": true
        }))
        .expect("status decodes");
        assert_eq!(status.available_server_ips.len(), 2);

        let mut control_plane = RKE2ControlPlane::new("prod-control-plane", RKE2ControlPlaneSpec::default());
        assert!(control_plane.first_available_server().is_none());
        control_plane.status = Some(status);
        assert_eq!(control_plane.first_available_server(), Some("10.0.0.10"));
    }
}
