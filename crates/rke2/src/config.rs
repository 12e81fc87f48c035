//! RKE2 `config.yaml` generation
//!
//! Servers get the control plane settings from `RKE2ControlPlane.spec.serverConfig`
//! plus the node-level agent settings; agents only get the latter. Keys follow
//! the RKE2 CLI flag names so the file can be dropped in `/etc/rancher/rke2`.

use cluster_client::ClusterClientTrait;
use crds::{File, ObjectReference, RKE2AgentConfig, RKE2ServerConfig};
use serde::Serialize;

use crate::error::Rke2Error;
use crate::{DEFAULT_FILE_OWNER, DEFAULT_FILE_PERMISSIONS};

pub const DEFAULT_RKE2_CONFIG_LOCATION: &str = "/etc/rancher/rke2/config.yaml";
pub const CLOUD_PROVIDER_CONFIG_LOCATION: &str = "/etc/rancher/rke2/cloud-provider-config";
const CLOUD_CONFIG_KEY: &str = "cloud-config";

fn is_false(value: &bool) -> bool {
    !*value
}

/// Node-level settings shared by servers and agents
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct NodeSettings {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub node_label: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub node_taint: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kubelet_arg: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_default_registry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

impl From<&RKE2AgentConfig> for NodeSettings {
    fn from(agent: &RKE2AgentConfig) -> Self {
        Self {
            node_label: agent.node_labels.clone(),
            node_taint: agent.node_taints.clone(),
            kubelet_arg: agent.kubelet_args.clone(),
            node_name: agent.node_name.clone(),
            profile: agent.cis_profile.clone(),
            system_default_registry: agent.system_default_registry.clone(),
            data_dir: agent.data_dir.clone(),
        }
    }
}

/// config.yaml of an RKE2 server
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfigFile {
    /// Unset on the initial server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    pub token: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tls_san: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cni: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disable: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_provider_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_provider_config: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_cidr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_cidr: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub etcd_expose_metrics: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etcd_snapshot_schedule_cron: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etcd_snapshot_retention: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub etcd_disable_snapshots: bool,
    #[serde(flatten)]
    pub node: NodeSettings,
}

/// config.yaml of an RKE2 agent
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct AgentConfigFile {
    pub server: String,
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_provider_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_provider_config: Option<String>,
    #[serde(flatten)]
    pub node: NodeSettings,
}

pub struct ServerConfigOpts<'a> {
    pub server_config: &'a RKE2ServerConfig,
    pub agent_config: &'a RKE2AgentConfig,
    /// Control plane endpoint host, added to the serving certificate SANs
    pub endpoint_host: &'a str,
    /// Registration URL; `None` for the initial server
    pub server_url: Option<String>,
    pub token: &'a str,
    /// Namespace used to resolve references without one
    pub namespace: &'a str,
}

pub struct AgentConfigOpts<'a> {
    pub server_config: &'a RKE2ServerConfig,
    pub agent_config: &'a RKE2AgentConfig,
    pub server_url: String,
    pub token: &'a str,
    pub namespace: &'a str,
}

/// Server config.yaml plus the extra files it points to
pub async fn server_config(
    client: &dyn ClusterClientTrait,
    opts: ServerConfigOpts<'_>,
) -> Result<(ServerConfigFile, Vec<File>), Rke2Error> {
    let server = opts.server_config;
    let (cloud_provider_config, files) =
        cloud_provider_files(client, server.cloud_provider_config_map.as_ref(), opts.namespace).await?;

    let mut tls_san = Vec::new();
    if !opts.endpoint_host.is_empty() {
        tls_san.push(opts.endpoint_host.to_string());
    }
    for san in &server.tls_san {
        if !tls_san.contains(san) {
            tls_san.push(san.clone());
        }
    }

    let etcd = server.etcd.clone().unwrap_or_default();
    let config = ServerConfigFile {
        server: opts.server_url,
        token: opts.token.to_string(),
        tls_san,
        cni: server.cni.clone(),
        disable: server.disable_components.clone(),
        cloud_provider_name: server.cloud_provider_name.clone(),
        cloud_provider_config,
        cluster_domain: server.cluster_domain.clone(),
        cluster_cidr: server.cluster_cidr.clone(),
        service_cidr: server.service_cidr.clone(),
        etcd_expose_metrics: etcd.expose_metrics,
        etcd_snapshot_schedule_cron: etcd.snapshot_schedule_cron,
        etcd_snapshot_retention: etcd.snapshot_retention,
        etcd_disable_snapshots: etcd.disable_snapshots,
        node: NodeSettings::from(opts.agent_config),
    };
    Ok((config, files))
}

/// Agent config.yaml plus the extra files it points to
pub async fn agent_config(
    client: &dyn ClusterClientTrait,
    opts: AgentConfigOpts<'_>,
) -> Result<(AgentConfigFile, Vec<File>), Rke2Error> {
    let (cloud_provider_config, files) = cloud_provider_files(
        client,
        opts.server_config.cloud_provider_config_map.as_ref(),
        opts.namespace,
    )
    .await?;

    let config = AgentConfigFile {
        server: opts.server_url,
        token: opts.token.to_string(),
        cloud_provider_name: opts.server_config.cloud_provider_name.clone(),
        cloud_provider_config,
        node: NodeSettings::from(opts.agent_config),
    };
    Ok((config, files))
}

async fn cloud_provider_files(
    client: &dyn ClusterClientTrait,
    reference: Option<&ObjectReference>,
    namespace: &str,
) -> Result<(Option<String>, Vec<File>), Rke2Error> {
    let Some(reference) = reference.filter(|r| !r.is_empty()) else {
        return Ok((None, Vec::new()));
    };
    let ns = reference.namespace_or(namespace);
    let config_map = client.get_config_map(ns, &reference.name).await?;
    let content = config_map
        .data
        .as_ref()
        .and_then(|data| data.get(CLOUD_CONFIG_KEY))
        .cloned()
        .ok_or_else(|| {
            Rke2Error::MissingData(format!(
                "ConfigMap {}/{} has no {} key",
                ns, reference.name, CLOUD_CONFIG_KEY
            ))
        })?;

    let file = File {
        path: CLOUD_PROVIDER_CONFIG_LOCATION.to_string(),
        content,
        owner: Some(DEFAULT_FILE_OWNER.to_string()),
        permissions: Some(DEFAULT_FILE_PERMISSIONS.to_string()),
        ..Default::default()
    };
    Ok((Some(CLOUD_PROVIDER_CONFIG_LOCATION.to_string()), vec![file]))
}
