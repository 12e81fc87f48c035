//! Controller-specific error types.

use cluster_client::ClientError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the RKE2 control plane controller.
///
/// Workload cluster failures are not errors here; they degrade the health
/// conditions to Unknown instead.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error outside the cluster client
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Management cluster read or write failed
    #[error("Cluster client error: {0}")]
    Client(#[from] ClientError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metrics registry setup failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
