//! RKE2 node bootstrap rendering and control plane health
//!
//! Payload side:
//! - [`config`]: RKE2 `config.yaml` for servers and agents
//! - [`registries`]: `registries.yaml` and registry TLS material
//! - [`manifests`]: auto-deploy manifests from a ConfigMap
//! - [`certificates`]: cluster CA lookup-or-generate
//! - [`cloudinit`]: `#cloud-config` rendering
//! - [`assembler`]: ties the above together per node role
//!
//! Health side:
//! - [`workload_cluster`]: node inspection and condition roll-up
//! - [`control_plane`]: status fields derived from the roll-up

pub mod assembler;
pub mod certificates;
pub mod cloudinit;
pub mod config;
pub mod control_plane;
pub mod error;
pub mod manifests;
pub mod registries;
pub mod workload_cluster;

use k8s_openapi::api::core::v1::Secret;

pub use assembler::{AssemblyInput, PayloadAssembler, Rke2Assembler, Role};
pub use certificates::{CertificateKeyPair, Certificates};
pub use error::Rke2Error;
pub use workload_cluster::{Capability, HealthReport, NodeCounts, NodeInspection};

/// Owner written on generated files
pub const DEFAULT_FILE_OWNER: &str = "root:root";
/// Permissions written on generated files
pub const DEFAULT_FILE_PERMISSIONS: &str = "0640";
/// RKE2 supervisor (registration) port
pub const REGISTRATION_PORT: u16 = 9345;

/// UTF-8 value of a Secret data key
pub fn secret_data(secret: &Secret, key: &str) -> Option<String> {
    let value = secret.data.as_ref()?.get(key)?;
    String::from_utf8(value.0.clone()).ok()
}

/// URL new nodes register against
pub fn server_url(host: &str) -> String {
    format!("https://{}:{}", host, REGISTRATION_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_url_format() {
        assert_eq!(server_url("10.0.0.10"), "https://10.0.0.10:9345");
        assert_eq!(server_url("api.example.com"), "https://api.example.com:9345");
    }

    #[test]
    fn test_secret_data_reads_utf8_keys() {
        use k8s_openapi::ByteString;
        use std::collections::BTreeMap;

        let secret = Secret {
            data: Some(BTreeMap::from([
                ("value".to_string(), ByteString(b"abc".to_vec())),
                ("binary".to_string(), ByteString(vec![0xff, 0xfe])),
            ])),
            ..Default::default()
        };
        assert_eq!(secret_data(&secret, "value").as_deref(), Some("abc"));
        assert_eq!(secret_data(&secret, "binary"), None);
        assert_eq!(secret_data(&secret, "missing"), None);
    }
}
