//! Controller-specific error types.

use cluster_client::ClientError;
use kube::Error as KubeError;
use rke2::Rke2Error;
use thiserror::Error;

/// Errors that can occur in the RKE2 bootstrap controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error outside the cluster client
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Management cluster read or write failed
    #[error("Cluster client error: {0}")]
    Client(#[from] ClientError),

    /// Payload rendering or CA handling failed
    #[error("RKE2 error: {0}")]
    Rke2(#[from] Rke2Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Join requested before the cluster token exists
    #[error("Cluster token missing: {0}")]
    MissingToken(String),

    /// Init lock could not be released after a failed init attempt
    #[error("Failed to release init lock of cluster {cluster} after error: {source}")]
    InitLockRelease {
        cluster: String,
        #[source]
        source: Box<ControllerError>,
    },

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metrics registry setup failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
