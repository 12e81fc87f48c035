//! Private registry configuration (`registries.yaml`)
//!
//! Credentials and TLS material are resolved from the Secrets referenced by
//! the RKE2Config; TLS material is written next to registries.yaml and
//! referenced by path.

use std::collections::BTreeMap;

use cluster_client::ClusterClientTrait;
use crds::{File, ObjectReference, Registry};
use serde::Serialize;

use crate::error::Rke2Error;
use crate::{DEFAULT_FILE_OWNER, DEFAULT_FILE_PERMISSIONS, secret_data};

pub const DEFAULT_RKE2_REGISTRIES_LOCATION: &str = "/etc/rancher/rke2/registries.yaml";
pub const REGISTRY_TLS_DIR: &str = "/etc/rancher/rke2/tls";

const USERNAME_KEY: &str = "username";
const PASSWORD_KEY: &str = "password";
const CA_CERT_KEY: &str = "ca.crt";
const CERT_KEY: &str = "tls.crt";
const KEY_KEY: &str = "tls.key";

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RegistriesYaml {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub mirrors: BTreeMap<String, MirrorYaml>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub configs: BTreeMap<String, RegistryConfigYaml>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MirrorYaml {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub endpoint: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub rewrite: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RegistryConfigYaml {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthYaml>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsYaml>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AuthYaml {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TlsYaml {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
    pub insecure_skip_verify: bool,
}

/// Render registries.yaml and the TLS files it references
///
/// Returns no files for an empty registry configuration. TLS files come
/// first, registries.yaml last.
pub async fn registry_files(
    client: &dyn ClusterClientTrait,
    registry: &Registry,
    namespace: &str,
) -> Result<Vec<File>, Rke2Error> {
    if registry.is_empty() {
        return Ok(Vec::new());
    }

    let mut rendered = RegistriesYaml {
        mirrors: registry
            .mirrors
            .iter()
            .map(|(name, mirror)| {
                (
                    name.clone(),
                    MirrorYaml {
                        endpoint: mirror.endpoint.clone(),
                        rewrite: mirror.rewrite.clone(),
                    },
                )
            })
            .collect(),
        configs: BTreeMap::new(),
    };

    let mut files = Vec::new();
    for (name, config) in &registry.configs {
        let mut entry = RegistryConfigYaml::default();

        if let Some(reference) = config.auth_secret.as_ref().filter(|r| !r.is_empty()) {
            let values = read_keys(client, reference, namespace, &[USERNAME_KEY, PASSWORD_KEY]).await?;
            entry.auth = Some(AuthYaml {
                username: values[0].clone(),
                password: values[1].clone(),
            });
        }

        if let Some(tls) = &config.tls {
            let mut tls_yaml = TlsYaml {
                insecure_skip_verify: tls.insecure_skip_verify,
                ..Default::default()
            };
            if let Some(reference) = tls.tls_config_secret.as_ref().filter(|r| !r.is_empty()) {
                let values = read_keys(client, reference, namespace, &[CA_CERT_KEY, CERT_KEY, KEY_KEY]).await?;
                let dir = format!("{}/{}", REGISTRY_TLS_DIR, name);
                let paths = [
                    format!("{}/{}", dir, CA_CERT_KEY),
                    format!("{}/{}", dir, CERT_KEY),
                    format!("{}/{}", dir, KEY_KEY),
                ];
                for (path, content) in paths.iter().zip(values) {
                    files.push(File {
                        path: path.clone(),
                        content,
                        owner: Some(DEFAULT_FILE_OWNER.to_string()),
                        permissions: Some(DEFAULT_FILE_PERMISSIONS.to_string()),
                        ..Default::default()
                    });
                }
                let [ca_file, cert_file, key_file] = paths;
                tls_yaml.ca_file = Some(ca_file);
                tls_yaml.cert_file = Some(cert_file);
                tls_yaml.key_file = Some(key_file);
            }
            entry.tls = Some(tls_yaml);
        }

        rendered.configs.insert(name.clone(), entry);
    }

    files.push(File {
        path: DEFAULT_RKE2_REGISTRIES_LOCATION.to_string(),
        content: serde_yaml::to_string(&rendered)?,
        owner: Some(DEFAULT_FILE_OWNER.to_string()),
        permissions: Some(DEFAULT_FILE_PERMISSIONS.to_string()),
        ..Default::default()
    });
    Ok(files)
}

async fn read_keys(
    client: &dyn ClusterClientTrait,
    reference: &ObjectReference,
    namespace: &str,
    keys: &[&str],
) -> Result<Vec<String>, Rke2Error> {
    let ns = reference.namespace_or(namespace);
    let secret = client.get_secret(ns, &reference.name).await?;
    keys.iter()
        .map(|key| {
            secret_data(&secret, key).ok_or_else(|| {
                Rke2Error::MissingData(format!("Secret {}/{} has no {} key", ns, reference.name, key))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_client::MockClusterClient;
    use crds::{Mirror, RegistryConfig, RegistryTlsConfig};
    use k8s_openapi::ByteString;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn secret(name: &str, data: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn registry() -> Registry {
        Registry {
            mirrors: BTreeMap::from([(
                "docker.io".to_string(),
                Mirror {
                    endpoint: vec!["https://mirror.local".to_string()],
                    ..Default::default()
                },
            )]),
            configs: BTreeMap::from([(
                "mirror.local".to_string(),
                RegistryConfig {
                    auth_secret: Some(ObjectReference::new("Secret", "registry-auth")),
                    tls: Some(RegistryTlsConfig {
                        tls_config_secret: Some(ObjectReference::new("Secret", "registry-tls")),
                        insecure_skip_verify: false,
                    }),
                },
            )]),
        }
    }

    #[tokio::test]
    async fn test_empty_registry_writes_nothing() {
        let client = MockClusterClient::new();
        let files = registry_files(&client, &Registry::default(), "default").await.expect("renders");
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_registry_with_auth_and_tls() {
        let client = MockClusterClient::new();
        client.add_secret(secret("registry-auth", &[("username", "admin"), ("password", "hunter2")]));
        client.add_secret(secret(
            "registry-tls",
            &[("ca.crt", "CA"), ("tls.crt", "CERT"), ("tls.key", "KEY")],
        ));

        let files = registry_files(&client, &registry(), "default").await.expect("renders");

        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/etc/rancher/rke2/tls/mirror.local/ca.crt",
                "/etc/rancher/rke2/tls/mirror.local/tls.crt",
                "/etc/rancher/rke2/tls/mirror.local/tls.key",
                DEFAULT_RKE2_REGISTRIES_LOCATION,
            ]
        );
        assert_eq!(files[0].content, "CA");

        let yaml = &files[3].content;
        assert!(yaml.contains("https://mirror.local"));
        assert!(yaml.contains("username: admin"));
        assert!(yaml.contains("password: hunter2"));
        assert!(yaml.contains("ca_file: /etc/rancher/rke2/tls/mirror.local/ca.crt"));
    }

    #[tokio::test]
    async fn test_missing_credential_key_is_an_error() {
        let client = MockClusterClient::new();
        client.add_secret(secret("registry-auth", &[("username", "admin")]));
        client.add_secret(secret(
            "registry-tls",
            &[("ca.crt", "CA"), ("tls.crt", "CERT"), ("tls.key", "KEY")],
        ));

        let err = registry_files(&client, &registry(), "default").await.unwrap_err();
        assert!(matches!(err, Rke2Error::MissingData(msg) if msg.contains("password")));
    }
}
