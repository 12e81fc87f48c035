//! Cluster access for the RKE2 controllers
//!
//! Two seams are exposed as traits so reconcilers can be unit tested without
//! an API server:
//!
//! - [`ClusterClientTrait`]: the management cluster holding the Cluster API
//!   objects, bootstrap configs, secrets and config maps.
//! - [`WorkloadClusterTrait`]: the cluster being bootstrapped, reached through
//!   the `<cluster>-kubeconfig` secret.
//!
//! [`KubeClusterClient`] and [`KubeWorkloadCluster`] implement them over
//! `kube::Api`. With the `test-util` feature, [`MockClusterClient`] and
//! [`MockWorkloadCluster`] keep objects in memory.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClientTrait, KubeClusterClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeClusterClient::new(kube::Client::try_default().await?);
//! let cluster = client.get_cluster("default", "prod").await?;
//! let workload = client.workload_cluster("default", "prod").await?;
//! let nodes = workload.list_control_plane_nodes().await?;
//! println!("{} has {} control plane nodes", cluster.metadata.name.unwrap_or_default(), nodes.len());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod client_trait;
pub mod workload;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeClusterClient;
pub use client_trait::{ClusterClientTrait, WorkloadClusterTrait};
pub use error::ClientError;
pub use workload::{KubeWorkloadCluster, CONTROL_PLANE_NODE_LABEL, WORKLOAD_CLIENT_TIMEOUT};
#[cfg(feature = "test-util")]
pub use mock::{MockClusterClient, MockWorkloadCluster};
