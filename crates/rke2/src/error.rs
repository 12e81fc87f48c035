//! RKE2 payload and health errors

use cluster_client::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Rke2Error {
    /// Reading or writing a referenced object failed
    #[error("Cluster client error: {0}")]
    Client(#[from] ClientError),

    /// CA generation or parsing failed
    #[error("Certificate error: {0}")]
    Certificate(#[from] rcgen::Error),

    /// Rendering config.yaml, registries.yaml or cloud-config failed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Referenced object lacks a required key
    #[error("Missing data: {0}")]
    MissingData(String),

    /// Input cannot be rendered (e.g. no control plane endpoint)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
