//! RKE2Config CRD
//!
//! Bootstrap request for a single Machine. The bootstrap controller turns it
//! into a cloud-init payload stored in a Secret and reports the Secret name
//! back in `status.dataSecretName`.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{Condition, Conditioned};
use crate::references::ObjectReference;

/// RKE2ConfigSpec defines how a node is bootstrapped
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "bootstrap.cluster.x-k8s.io",
    version = "v1alpha1",
    kind = "RKE2Config",
    namespaced,
    status = "RKE2ConfigStatus",
    shortname = "rke2c"
)]
#[serde(rename_all = "camelCase")]
pub struct RKE2ConfigSpec {
    /// Settings for the RKE2 agent running on the node
    #[serde(default)]
    pub agent_config: RKE2AgentConfig,

    /// Commands run before RKE2 is installed
    #[serde(default, rename = "preRKE2Commands", skip_serializing_if = "Vec::is_empty")]
    pub pre_rke2_commands: Vec<String>,

    /// Commands run after RKE2 is started
    #[serde(default, rename = "postRKE2Commands", skip_serializing_if = "Vec::is_empty")]
    pub post_rke2_commands: Vec<String>,

    /// Extra files written to the node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,

    /// Private registry mirrors and credentials (rendered as registries.yaml)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_registries_config: Option<Registry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RKE2AgentConfig {
    /// RKE2 version to install (e.g., "v1.30.4+rke2r1")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Skip the online install script; RKE2 artifacts are already on the image
    #[serde(default)]
    pub air_gapped: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ntp: Option<Ntp>,

    /// Node labels in `key=value` form
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_labels: Vec<String>,

    /// Node taints in `key=value:Effect` form
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_taints: Vec<String>,

    /// Extra kubelet arguments in `flag=value` form
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kubelet_args: Vec<String>,

    /// Node name override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    /// CIS profile to validate the node against (e.g., "cis")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cis_profile: Option<String>,

    /// Registry used for all system images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_default_registry: Option<String>,

    /// Override of the RKE2 data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ntp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<String>,
}

/// File written to the node by cloud-init
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct File {
    /// Absolute path on the node
    pub path: String,

    /// Inline content
    #[serde(default)]
    pub content: String,

    /// Content read from a Secret key instead of `content`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_from: Option<FileSource>,

    /// Ownership in `user:group` form (defaults to root:root)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Octal permissions (defaults to 0640)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<FileEncoding>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileSource {
    pub secret: SecretFileSource,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretFileSource {
    /// Secret name in the RKE2Config namespace
    pub name: String,

    /// Key inside the Secret data
    pub key: String,
}

/// Encoding of file content
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum FileEncoding {
    #[serde(rename = "base64")]
    Base64,
    #[serde(rename = "gzip")]
    Gzip,
    #[serde(rename = "gzip+base64")]
    GzipBase64,
}

impl FileEncoding {
    /// Value of the cloud-init `encoding` key
    pub fn cloud_init_name(&self) -> &'static str {
        match self {
            FileEncoding::Base64 => "b64",
            FileEncoding::Gzip => "gzip",
            FileEncoding::GzipBase64 => "gz+b64",
        }
    }
}

/// Private registry configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Registry {
    /// Registry name to mirror endpoints
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mirrors: BTreeMap<String, Mirror>,

    /// Registry host to auth/TLS settings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configs: BTreeMap<String, RegistryConfig>,
}

impl Registry {
    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty() && self.configs.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Mirror {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoint: Vec<String>,

    /// Repository rewrite rules (regex to replacement)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rewrite: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    /// Secret with `username` and `password` keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_secret: Option<ObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<RegistryTlsConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryTlsConfig {
    /// Secret with `ca.crt`, `tls.crt` and `tls.key` keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config_secret: Option<ObjectReference>,

    #[serde(default)]
    pub insecure_skip_verify: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RKE2ConfigStatus {
    /// Bootstrap payload has been generated
    #[serde(default)]
    pub ready: bool,

    /// Secret holding the bootstrap payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    /// Generation of the last successful reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Conditioned for RKE2ConfigStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_field_names() {
        let spec: RKE2ConfigSpec = serde_json::from_value(serde_json::json!({
            "agentConfig": { "version": "v1.30.4+rke2r1", "airGapped": true, "ntp": { "servers": ["pool.ntp.org"] } },
            "preRKE2Commands": ["echo pre"],
            "postRKE2Commands": ["echo post"],
            "files": [{ "path": "/etc/motd", "content": "hi", "encoding": "gzip+base64" }],
            "privateRegistriesConfig": {
                "mirrors": { "docker.io": { "endpoint": ["https://mirror.local"] } }
            }
        }))
        .expect("spec decodes");

        assert!(spec.agent_config.air_gapped);
        assert_eq!(spec.pre_rke2_commands, vec!["echo pre"]);
        assert_eq!(spec.post_rke2_commands, vec!["echo post"]);
        assert_eq!(spec.files[0].encoding, Some(FileEncoding::GzipBase64));
        let registry = spec.private_registries_config.expect("registry present");
        assert!(!registry.is_empty());
        assert_eq!(registry.mirrors["docker.io"].endpoint, vec!["https://mirror.local"]);
    }

    #[test]
    fn test_cloud_init_encoding_names() {
        assert_eq!(FileEncoding::Base64.cloud_init_name(), "b64");
        assert_eq!(FileEncoding::GzipBase64.cloud_init_name(), "gz+b64");
    }
}
