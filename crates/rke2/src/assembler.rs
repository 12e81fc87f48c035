//! Bootstrap payload assembly
//!
//! The assembler gathers every file a node needs for its role and renders
//! them into a single cloud-config document. Files are collected in a fixed
//! order and all maps are ordered, so identical inputs always produce
//! byte-identical payloads.

use std::sync::Arc;

use async_trait::async_trait;
use cluster_client::ClusterClientTrait;
use crds::{Cluster, File, RKE2Config, RKE2ControlPlane, RKE2ServerConfig};
use tracing::debug;

use crate::certificates::Certificates;
use crate::cloudinit::{self, CloudInitInput, ServiceKind};
use crate::config::{self, AgentConfigOpts, DEFAULT_RKE2_CONFIG_LOCATION, ServerConfigOpts};
use crate::error::Rke2Error;
use crate::{DEFAULT_FILE_OWNER, DEFAULT_FILE_PERMISSIONS, manifests, registries, secret_data, server_url};

/// Part a node plays in the cluster
#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    /// First server; receives the cluster CAs and auto-deploy manifests
    Init { certificates: Certificates },
    JoinControlPlane,
    JoinWorker,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Init { .. } => "init",
            Role::JoinControlPlane => "join-control-plane",
            Role::JoinWorker => "join-worker",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssemblyInput {
    pub role: Role,
    pub cluster: Cluster,
    pub config: RKE2Config,
    /// Required for servers; workers use it for cloud provider settings
    pub control_plane: Option<RKE2ControlPlane>,
    pub token: String,
    /// Address joining nodes register against; ignored for [`Role::Init`]
    pub server_host: String,
}

#[async_trait]
pub trait PayloadAssembler: Send + Sync {
    async fn assemble(&self, input: &AssemblyInput) -> Result<Vec<u8>, Rke2Error>;
}

/// Renders RKE2 cloud-config payloads, resolving references through the
/// management cluster
pub struct Rke2Assembler {
    client: Arc<dyn ClusterClientTrait>,
}

impl Rke2Assembler {
    pub fn new(client: Arc<dyn ClusterClientTrait>) -> Self {
        Self { client }
    }

    async fn user_files(&self, files: &[File], namespace: &str) -> Result<Vec<File>, Rke2Error> {
        let mut resolved = Vec::with_capacity(files.len());
        for file in files {
            let mut file = file.clone();
            if let Some(source) = file.content_from.take() {
                let secret = self.client.get_secret(namespace, &source.secret.name).await?;
                file.content = secret_data(&secret, &source.secret.key).ok_or_else(|| {
                    Rke2Error::MissingData(format!(
                        "Secret {}/{} has no {} key",
                        namespace, source.secret.name, source.secret.key
                    ))
                })?;
            }
            file.owner.get_or_insert_with(|| DEFAULT_FILE_OWNER.to_string());
            file.permissions.get_or_insert_with(|| DEFAULT_FILE_PERMISSIONS.to_string());
            resolved.push(file);
        }
        Ok(resolved)
    }
}

fn config_file(content: String) -> File {
    File {
        path: DEFAULT_RKE2_CONFIG_LOCATION.to_string(),
        content,
        owner: Some(DEFAULT_FILE_OWNER.to_string()),
        permissions: Some(DEFAULT_FILE_PERMISSIONS.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl PayloadAssembler for Rke2Assembler {
    async fn assemble(&self, input: &AssemblyInput) -> Result<Vec<u8>, Rke2Error> {
        let client = self.client.as_ref();
        let namespace = input
            .config
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Rke2Error::InvalidInput("RKE2Config has no namespace".to_string()))?;
        let spec = &input.config.spec;
        let default_server_config = RKE2ServerConfig::default();
        let server_config = input
            .control_plane
            .as_ref()
            .map(|cp| &cp.spec.server_config)
            .unwrap_or(&default_server_config);

        let join_url = match &input.role {
            Role::Init { .. } => None,
            _ if input.server_host.is_empty() => {
                return Err(Rke2Error::InvalidInput(format!(
                    "{} payload needs a server address",
                    input.role.name()
                )));
            }
            _ => Some(server_url(&input.server_host)),
        };

        let mut files = Vec::new();
        let service = match &input.role {
            Role::Init { .. } | Role::JoinControlPlane => {
                if input.control_plane.is_none() {
                    return Err(Rke2Error::InvalidInput(format!(
                        "{} payload needs the RKE2ControlPlane",
                        input.role.name()
                    )));
                }
                let (rendered, extra) = config::server_config(
                    client,
                    ServerConfigOpts {
                        server_config,
                        agent_config: &spec.agent_config,
                        endpoint_host: &input.cluster.spec.control_plane_endpoint.host,
                        server_url: join_url,
                        token: &input.token,
                        namespace,
                    },
                )
                .await?;
                files.push(config_file(serde_yaml::to_string(&rendered)?));
                files.extend(extra);
                ServiceKind::Server
            }
            Role::JoinWorker => {
                let (rendered, extra) = config::agent_config(
                    client,
                    AgentConfigOpts {
                        server_config,
                        agent_config: &spec.agent_config,
                        server_url: join_url.unwrap_or_default(),
                        token: &input.token,
                        namespace,
                    },
                )
                .await?;
                files.push(config_file(serde_yaml::to_string(&rendered)?));
                files.extend(extra);
                ServiceKind::Agent
            }
        };

        if let Some(registry) = &spec.private_registries_config {
            files.extend(registries::registry_files(client, registry, namespace).await?);
        }

        files.extend(self.user_files(&spec.files, namespace).await?);

        if let Role::Init { certificates } = &input.role {
            let reference = input
                .control_plane
                .as_ref()
                .and_then(|cp| cp.spec.manifests_config_map_reference.as_ref());
            files.extend(manifests::manifest_files(client, reference, namespace).await?);
            files.extend(certificates.files());
        }

        let version = spec
            .agent_config
            .version
            .as_deref()
            .or_else(|| input.control_plane.as_ref().and_then(|cp| cp.spec.version.as_deref()));

        debug!(
            "Rendering {} payload for {}/{} with {} files",
            input.role.name(),
            namespace,
            input.config.metadata.name.as_deref().unwrap_or_default(),
            files.len()
        );

        cloudinit::render(&CloudInitInput {
            service,
            files: &files,
            pre_commands: &spec.pre_rke2_commands,
            post_commands: &spec.post_rke2_commands,
            version,
            air_gapped: spec.agent_config.air_gapped,
            ntp: spec.agent_config.ntp.as_ref(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::CertificateKeyPair;
    use cluster_client::MockClusterClient;
    use crds::{
        ApiEndpoint, ClusterSpec, FileSource, ObjectReference, RKE2ConfigSpec, RKE2ControlPlaneSpec,
        SecretFileSource,
    };
    use k8s_openapi::ByteString;
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        }
    }

    fn cluster() -> Cluster {
        Cluster {
            metadata: meta("prod"),
            spec: ClusterSpec {
                control_plane_endpoint: ApiEndpoint {
                    host: "api.prod.example.com".to_string(),
                    port: 6443,
                },
                ..Default::default()
            },
            status: None,
        }
    }

    fn control_plane() -> RKE2ControlPlane {
        RKE2ControlPlane {
            metadata: meta("prod-control-plane"),
            spec: RKE2ControlPlaneSpec {
                version: Some("v1.30.4+rke2r1".to_string()),
                manifests_config_map_reference: Some(ObjectReference::new("ConfigMap", "prod-manifests")),
                ..Default::default()
            },
            status: None,
        }
    }

    fn config() -> RKE2Config {
        RKE2Config {
            metadata: meta("prod-cp-0"),
            spec: RKE2ConfigSpec {
                files: vec![File {
                    path: "/etc/secret.conf".to_string(),
                    content_from: Some(FileSource {
                        secret: SecretFileSource {
                            name: "node-secret".to_string(),
                            key: "conf".to_string(),
                        },
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            },
            status: None,
        }
    }

    fn certificates() -> Certificates {
        Certificates {
            server_ca: CertificateKeyPair { cert_pem: "SERVER-CERT".into(), key_pem: "SERVER-KEY".into() },
            client_ca: CertificateKeyPair { cert_pem: "CLIENT-CERT".into(), key_pem: "CLIENT-KEY".into() },
        }
    }

    fn seeded_client() -> Arc<MockClusterClient> {
        let client = MockClusterClient::new();
        client.add_config_map(ConfigMap {
            metadata: meta("prod-manifests"),
            data: Some(BTreeMap::from([
                ("b.yaml".to_string(), "kind: B".to_string()),
                ("a.yaml".to_string(), "kind: A".to_string()),
            ])),
            ..Default::default()
        });
        client.add_secret(Secret {
            metadata: meta("node-secret"),
            data: Some(BTreeMap::from([("conf".to_string(), ByteString(b"from-secret".to_vec()))])),
            ..Default::default()
        });
        Arc::new(client)
    }

    fn input(role: Role, server_host: &str) -> AssemblyInput {
        AssemblyInput {
            role,
            cluster: cluster(),
            config: config(),
            control_plane: Some(control_plane()),
            token: "shared-token".to_string(),
            server_host: server_host.to_string(),
        }
    }

    #[tokio::test]
    async fn test_assembly_is_deterministic() {
        let assembler = Rke2Assembler::new(seeded_client());
        let input = input(Role::Init { certificates: certificates() }, "");

        let first = assembler.assemble(&input).await.expect("assembles");
        let second = assembler.assemble(&input).await.expect("assembles");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_init_payload_contents() {
        let assembler = Rke2Assembler::new(seeded_client());
        let payload = assembler
            .assemble(&input(Role::Init { certificates: certificates() }, ""))
            .await
            .expect("assembles");
        let text = String::from_utf8(payload).expect("utf8");

        assert!(text.starts_with("#cloud-config"));
        assert!(text.contains(DEFAULT_RKE2_CONFIG_LOCATION));
        assert!(text.contains("shared-token"));
        assert!(text.contains("api.prod.example.com"));
        assert!(!text.contains(":9345"));
        assert!(text.contains("from-secret"));
        assert!(text.contains("SERVER-CERT"));
        assert!(text.contains("rke2-server.service"));
        assert!(text.contains("INSTALL_RKE2_VERSION=v1.30.4+rke2r1"));

        let a = text.find("/var/lib/rancher/rke2/server/manifests/a.yaml").expect("a");
        let b = text.find("/var/lib/rancher/rke2/server/manifests/b.yaml").expect("b");
        assert!(a < b);
    }

    #[tokio::test]
    async fn test_worker_payload_joins_first_server() {
        let assembler = Rke2Assembler::new(seeded_client());
        let payload = assembler
            .assemble(&input(Role::JoinWorker, "10.0.0.10"))
            .await
            .expect("assembles");
        let text = String::from_utf8(payload).expect("utf8");

        assert!(text.contains("https://10.0.0.10:9345"));
        assert!(text.contains("rke2-agent.service"));
        assert!(!text.contains("SERVER-CERT"));
        assert!(!text.contains("manifests/a.yaml"));
    }

    #[tokio::test]
    async fn test_join_without_server_address_is_rejected() {
        let assembler = Rke2Assembler::new(seeded_client());
        let err = assembler.assemble(&input(Role::JoinControlPlane, "")).await.unwrap_err();
        assert!(matches!(err, Rke2Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_server_payload_needs_control_plane() {
        let assembler = Rke2Assembler::new(seeded_client());
        let mut input = input(Role::JoinControlPlane, "10.0.0.10");
        input.control_plane = None;
        let err = assembler.assemble(&input).await.unwrap_err();
        assert!(matches!(err, Rke2Error::InvalidInput(_)));
    }
}
