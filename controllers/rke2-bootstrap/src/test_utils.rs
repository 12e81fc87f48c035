//! Test utilities for unit testing the reconciler
//!
//! Builders for the objects a bootstrap reconcile reads, all in namespace
//! `default` and with uids so owner references resolve.

use std::collections::BTreeMap;
use std::sync::Arc;

use cluster_client::MockClusterClient;
use crds::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;

use crate::reconciler::Reconciler;

pub const TEST_NAMESPACE: &str = "default";

fn meta(name: &str, labels: &[(&str, &str)]) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(TEST_NAMESPACE.to_string()),
        uid: Some(format!("uid-{}", name)),
        generation: Some(1),
        labels: (!labels.is_empty()).then(|| {
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>()
        }),
        ..Default::default()
    }
}

fn owner<K: Resource<DynamicType = ()>>(object: &K) -> OwnerReference {
    object.controller_owner_ref(&()).unwrap_or_default()
}

/// Cluster with endpoint `api.<name>.example.com` and control plane
/// `<name>-control-plane`
pub fn create_test_cluster(name: &str, infrastructure_ready: bool, initialized: bool) -> Cluster {
    let mut status = ClusterStatus {
        infrastructure_ready,
        ..Default::default()
    };
    if initialized {
        status.mark_true(conditions::CONTROL_PLANE_INITIALIZED);
    }
    Cluster {
        metadata: meta(name, &[]),
        spec: ClusterSpec {
            control_plane_endpoint: ApiEndpoint {
                host: format!("api.{}.example.com", name),
                port: 6443,
            },
            control_plane_ref: Some(ObjectReference::new(
                "RKE2ControlPlane",
                format!("{}-control-plane", name),
            )),
            ..Default::default()
        },
        status: Some(status),
    }
}

/// Control plane advertising the given server addresses
pub fn create_test_control_plane(cluster: &Cluster, available_server_ips: &[&str]) -> RKE2ControlPlane {
    let cluster_name = cluster.metadata.name.clone().unwrap_or_default();
    let mut control_plane = RKE2ControlPlane {
        metadata: meta(
            &format!("{}-control-plane", cluster_name),
            &[(CLUSTER_NAME_LABEL, cluster_name.as_str())],
        ),
        spec: RKE2ControlPlaneSpec {
            version: Some("v1.30.4+rke2r1".to_string()),
            ..Default::default()
        },
        status: None,
    };
    control_plane.metadata.owner_references = Some(vec![owner(cluster)]);
    control_plane.status = Some(RKE2ControlPlaneStatus {
        available_server_ips: available_server_ips.iter().map(|ip| ip.to_string()).collect(),
        ..Default::default()
    });
    control_plane
}

/// Machine bootstrapped by the RKE2Config of the same name
///
/// Owned by `control_plane` when given, a worker otherwise.
pub fn create_test_machine(name: &str, cluster: &Cluster, control_plane: Option<&RKE2ControlPlane>) -> Machine {
    let cluster_name = cluster.metadata.name.clone().unwrap_or_default();
    let mut machine = Machine {
        metadata: meta(name, &[(CLUSTER_NAME_LABEL, cluster_name.as_str())]),
        spec: MachineSpec {
            cluster_name,
            bootstrap: Bootstrap {
                config_ref: Some(ObjectReference::new("RKE2Config", name)),
                data_secret_name: None,
            },
            ..Default::default()
        },
        status: None,
    };
    if let Some(control_plane) = control_plane {
        machine.metadata.owner_references = Some(vec![owner(control_plane)]);
    }
    machine
}

/// RKE2Config owned by `machine`
pub fn create_test_rke2_config(name: &str, machine: &Machine) -> RKE2Config {
    let mut config = RKE2Config::new(name, RKE2ConfigSpec::default());
    config.metadata = meta(name, &[(CLUSTER_NAME_LABEL, machine.spec.cluster_name.as_str())]);
    config.metadata.owner_references = Some(vec![owner(machine)]);
    config
}

/// Reconciler with the real assembler and init lock over `client`
pub fn create_test_reconciler(client: &MockClusterClient) -> Reconciler {
    Reconciler::new(Arc::new(client.clone()))
}
