//! Auto-deploy manifests for the initial server
//!
//! Every key of the referenced ConfigMap becomes one file in the RKE2
//! manifests directory, which the server applies on start.

use cluster_client::ClusterClientTrait;
use crds::{File, ObjectReference};

use crate::error::Rke2Error;
use crate::{DEFAULT_FILE_OWNER, DEFAULT_FILE_PERMISSIONS};

pub const DEFAULT_MANIFEST_DIRECTORY: &str = "/var/lib/rancher/rke2/server/manifests";

/// Files for each key of the manifests ConfigMap, sorted by key
///
/// An absent reference yields no files; a reference to a missing ConfigMap
/// is an error.
pub async fn manifest_files(
    client: &dyn ClusterClientTrait,
    reference: Option<&ObjectReference>,
    namespace: &str,
) -> Result<Vec<File>, Rke2Error> {
    let Some(reference) = reference.filter(|r| !r.is_empty()) else {
        return Ok(Vec::new());
    };

    let config_map = client
        .get_config_map(reference.namespace_or(namespace), &reference.name)
        .await?;

    // BTreeMap iteration is ordered by key
    Ok(config_map
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(key, content)| File {
            path: format!("{}/{}", DEFAULT_MANIFEST_DIRECTORY, key),
            content,
            owner: Some(DEFAULT_FILE_OWNER.to_string()),
            permissions: Some(DEFAULT_FILE_PERMISSIONS.to_string()),
            ..Default::default()
        })
        .collect())
}
