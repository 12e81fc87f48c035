//! Kubernetes object references used across the bootstrap CRDs
//!
//! Follows the Kubernetes `ObjectReference` shape (apiVersion, kind, name,
//! namespace, uid) so that Cluster API objects serialized by other providers
//! deserialize cleanly into our mirrored types.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to another Kubernetes object
///
/// `namespace` defaults to the namespace of the referencing object when unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the referenced object (e.g., "cluster.x-k8s.io/v1beta1")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Kind of the referenced object (e.g., "RKE2ControlPlane")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Name of the referenced object
    #[serde(default)]
    pub name: String,

    /// Namespace of the referenced object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// UID of the referenced object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl ObjectReference {
    /// Create a reference to a named object in the same namespace
    pub fn new(kind: &str, name: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.to_string()),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Create a reference with an explicit namespace
    pub fn with_namespace(kind: &str, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.to_string()),
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    /// Returns true when the reference carries no name (treated as "not set")
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    /// Resolve the namespace, falling back to the referencing object's namespace
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.namespace.as_deref().filter(|ns| !ns.is_empty()).unwrap_or(default)
    }
}

/// Find the first owner reference of the given kind whose API group matches
///
/// `group` is compared against the group part of the owner's `apiVersion`
/// (everything before the `/`), so any served version of the kind matches.
pub fn find_owner<'a>(owners: Option<&'a [OwnerReference]>, group: &str, kind: &str) -> Option<&'a OwnerReference> {
    owners?.iter().find(|owner| {
        owner.kind == kind && owner.api_version.split('/').next() == Some(group)
    })
}
