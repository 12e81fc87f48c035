//! Cluster certificate authorities
//!
//! The initial server is handed the server CA and the client CA so every
//! later server trusts the same roots. Both are stored in Secrets owned by
//! the Cluster and are generated only when absent.

use std::collections::BTreeMap;

use chrono::{Datelike, Utc};
use cluster_client::ClusterClientTrait;
use crds::{CLUSTER_NAME_LABEL, CLUSTER_SECRET_TYPE, File};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair, KeyUsagePurpose};
use tracing::{debug, info};

use crate::error::Rke2Error;
use crate::{DEFAULT_FILE_OWNER, secret_data};

pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_KEY_KEY: &str = "tls.key";
pub const SERVER_TLS_DIR: &str = "/var/lib/rancher/rke2/server/tls";

/// CA validity in years
const CA_VALIDITY_YEARS: i32 = 10;

/// Key files are readable by root only
const KEY_FILE_PERMISSIONS: &str = "0600";
const CERT_FILE_PERMISSIONS: &str = "0640";

#[derive(Debug, Clone, PartialEq)]
pub struct CertificateKeyPair {
    pub cert_pem: String,
    pub key_pem: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaPurpose {
    Server,
    Client,
}

impl CaPurpose {
    fn secret_suffix(self) -> &'static str {
        match self {
            CaPurpose::Server => "ca",
            CaPurpose::Client => "cca",
        }
    }

    fn file_stem(self) -> &'static str {
        match self {
            CaPurpose::Server => "server-ca",
            CaPurpose::Client => "client-ca",
        }
    }

    fn common_name(self) -> &'static str {
        match self {
            CaPurpose::Server => "rke2-server-ca",
            CaPurpose::Client => "rke2-client-ca",
        }
    }
}

/// Server and client CA of one cluster
#[derive(Debug, Clone, PartialEq)]
pub struct Certificates {
    pub server_ca: CertificateKeyPair,
    pub client_ca: CertificateKeyPair,
}

impl Certificates {
    /// Read `<cluster>-ca` and `<cluster>-cca`, generating whichever is missing
    ///
    /// A concurrent writer that creates a Secret first wins; its content is
    /// re-read and used.
    pub async fn lookup_or_generate(
        client: &dyn ClusterClientTrait,
        namespace: &str,
        cluster_name: &str,
        owner: Option<OwnerReference>,
    ) -> Result<Self, Rke2Error> {
        let server_ca =
            lookup_or_generate_ca(client, namespace, cluster_name, owner.clone(), CaPurpose::Server).await?;
        let client_ca = lookup_or_generate_ca(client, namespace, cluster_name, owner, CaPurpose::Client).await?;
        Ok(Self { server_ca, client_ca })
    }

    /// Files written on the initial server
    pub fn files(&self) -> Vec<File> {
        [(CaPurpose::Server, &self.server_ca), (CaPurpose::Client, &self.client_ca)]
            .into_iter()
            .flat_map(|(purpose, pair)| {
                [
                    tls_file(purpose, "crt", &pair.cert_pem, CERT_FILE_PERMISSIONS),
                    tls_file(purpose, "key", &pair.key_pem, KEY_FILE_PERMISSIONS),
                ]
            })
            .collect()
    }
}

fn tls_file(purpose: CaPurpose, extension: &str, content: &str, permissions: &str) -> File {
    File {
        path: format!("{}/{}.{}", SERVER_TLS_DIR, purpose.file_stem(), extension),
        content: content.to_string(),
        owner: Some(DEFAULT_FILE_OWNER.to_string()),
        permissions: Some(permissions.to_string()),
        ..Default::default()
    }
}

pub fn ca_secret_name(cluster_name: &str, purpose_suffix: &str) -> String {
    format!("{}-{}", cluster_name, purpose_suffix)
}

async fn lookup_or_generate_ca(
    client: &dyn ClusterClientTrait,
    namespace: &str,
    cluster_name: &str,
    owner: Option<OwnerReference>,
    purpose: CaPurpose,
) -> Result<CertificateKeyPair, Rke2Error> {
    let name = ca_secret_name(cluster_name, purpose.secret_suffix());

    match client.get_secret(namespace, &name).await {
        Ok(secret) => {
            debug!("Using existing CA secret {}/{}", namespace, name);
            return pair_from_secret(&secret, namespace, &name);
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }

    let pair = generate_ca(purpose.common_name())?;
    let secret = ca_secret(namespace, &name, cluster_name, owner, &pair);
    match client.create_secret(&secret).await {
        Ok(_) => {
            info!("Generated CA secret {}/{}", namespace, name);
            Ok(pair)
        }
        Err(e) if e.is_already_exists() => {
            debug!("CA secret {}/{} created concurrently, re-reading", namespace, name);
            let existing = client.get_secret(namespace, &name).await?;
            pair_from_secret(&existing, namespace, &name)
        }
        Err(e) => Err(e.into()),
    }
}

fn pair_from_secret(secret: &Secret, namespace: &str, name: &str) -> Result<CertificateKeyPair, Rke2Error> {
    let missing = |key: &str| Rke2Error::MissingData(format!("Secret {}/{} has no {} key", namespace, name, key));
    let cert_pem = secret_data(secret, TLS_CERT_KEY).ok_or_else(|| missing(TLS_CERT_KEY))?;
    let key_pem = secret_data(secret, TLS_KEY_KEY).ok_or_else(|| missing(TLS_KEY_KEY))?;
    // Reject a corrupt key before it reaches a node
    KeyPair::from_pem(&key_pem)?;
    Ok(CertificateKeyPair { cert_pem, key_pem })
}

/// Self-signed CA certificate and key
pub fn generate_ca(common_name: &str) -> Result<CertificateKeyPair, Rke2Error> {
    let key_pair = KeyPair::generate()?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];

    let today = Utc::now().date_naive();
    let (month, day) = (today.month() as u8, today.day().min(28) as u8);
    params.not_before = rcgen::date_time_ymd(today.year(), month, day);
    params.not_after = rcgen::date_time_ymd(today.year() + CA_VALIDITY_YEARS, month, day);

    let cert = params.self_signed(&key_pair)?;
    Ok(CertificateKeyPair {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

fn ca_secret(
    namespace: &str,
    name: &str,
    cluster_name: &str,
    owner: Option<OwnerReference>,
    pair: &CertificateKeyPair,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster_name.to_string())])),
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        },
        type_: Some(CLUSTER_SECRET_TYPE.to_string()),
        data: Some(BTreeMap::from([
            (TLS_CERT_KEY.to_string(), ByteString(pair.cert_pem.clone().into_bytes())),
            (TLS_KEY_KEY.to_string(), ByteString(pair.key_pem.clone().into_bytes())),
        ])),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_client::MockClusterClient;
    use cluster_client::mock::MockFailure;

    #[test]
    fn test_generate_ca_produces_pem() {
        let pair = generate_ca("rke2-server-ca").expect("generates");
        assert!(pair.cert_pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(pair.key_pem.contains("PRIVATE KEY"));
    }

    #[tokio::test]
    async fn test_generates_and_stores_missing_cas() {
        let client = MockClusterClient::new();

        let certs = Certificates::lookup_or_generate(&client, "default", "prod", None)
            .await
            .expect("generates");

        let stored = client.stored_secret("default", "prod-ca").expect("server CA stored");
        assert_eq!(stored.type_.as_deref(), Some(CLUSTER_SECRET_TYPE));
        assert_eq!(
            stored.metadata.labels.as_ref().and_then(|l| l.get(CLUSTER_NAME_LABEL)).map(String::as_str),
            Some("prod")
        );
        assert_eq!(
            client.secret_value("default", "prod-cca", TLS_CERT_KEY),
            Some(certs.client_ca.cert_pem.clone())
        );
        assert_ne!(certs.server_ca, certs.client_ca);
        assert_eq!(client.writes().secret_creates, 2);
    }

    #[tokio::test]
    async fn test_existing_cas_are_reused() {
        let client = MockClusterClient::new();
        let first = Certificates::lookup_or_generate(&client, "default", "prod", None)
            .await
            .expect("generates");

        let second = Certificates::lookup_or_generate(&client, "default", "prod", None)
            .await
            .expect("reads back");

        assert_eq!(first, second);
        assert_eq!(client.writes().secret_creates, 2);
    }

    #[tokio::test]
    async fn test_store_error_is_propagated() {
        let client = MockClusterClient::new();
        client.fail_operation("get_secret", MockFailure::Unavailable);

        let err = Certificates::lookup_or_generate(&client, "default", "prod", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Rke2Error::Client(_)));
    }

    #[test]
    fn test_files_layout() {
        let certs = Certificates {
            server_ca: CertificateKeyPair { cert_pem: "S".into(), key_pem: "SK".into() },
            client_ca: CertificateKeyPair { cert_pem: "C".into(), key_pem: "CK".into() },
        };
        let files = certs.files();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/var/lib/rancher/rke2/server/tls/server-ca.crt",
                "/var/lib/rancher/rke2/server/tls/server-ca.key",
                "/var/lib/rancher/rke2/server/tls/client-ca.crt",
                "/var/lib/rancher/rke2/server/tls/client-ca.key",
            ]
        );
        assert_eq!(files[1].permissions.as_deref(), Some("0600"));
    }
}
