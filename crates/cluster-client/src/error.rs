//! Cluster client errors

use thiserror::Error;

/// Errors returned by management and workload cluster clients
///
/// `NotFound`, `AlreadyExists` and `Conflict` are split out of the generic
/// API error so callers can treat them as expected outcomes.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Any other Kubernetes API or transport error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Create raced with another writer
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Write carried a stale resourceVersion
    #[error("Conflict: {0}")]
    Conflict(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Workload cluster kubeconfig missing or unusable
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(String),

    /// Object is missing data the client needs (e.g. metadata.name)
    #[error("Invalid object: {0}")]
    InvalidObject(String),
}

impl ClientError {
    /// Classify a kube error for the object described by `what`
    pub fn from_kube(err: kube::Error, what: impl Into<String>) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => ClientError::NotFound(what.into()),
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                ClientError::AlreadyExists(what.into())
            }
            kube::Error::Api(ae) if ae.code == 409 => ClientError::Conflict(format!("{}: {}", what.into(), ae.message)),
            other => ClientError::Kube(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClientError::AlreadyExists(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict(_))
    }
}
