//! Test utilities for unit testing the health cycle

use std::collections::BTreeMap;

use cluster_client::CONTROL_PLANE_NODE_LABEL;
use crds::*;
use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeSpec, NodeStatus, Taint};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use rke2::workload_cluster::UNREACHABLE_TAINT;

pub const TEST_NAMESPACE: &str = "default";

fn meta(name: &str, labels: &[(&str, &str)]) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(TEST_NAMESPACE.to_string()),
        uid: Some(format!("uid-{}", name)),
        generation: Some(1),
        labels: Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        ..Default::default()
    }
}

pub fn create_test_cluster(name: &str) -> Cluster {
    Cluster {
        metadata: meta(name, &[]),
        spec: ClusterSpec {
            control_plane_endpoint: ApiEndpoint {
                host: format!("api.{}.example.com", name),
                port: 6443,
            },
            ..Default::default()
        },
        status: Some(ClusterStatus {
            infrastructure_ready: true,
            ..Default::default()
        }),
    }
}

/// Control plane `<cluster>-control-plane` owned by the cluster
pub fn create_test_control_plane(cluster: &Cluster) -> RKE2ControlPlane {
    let cluster_name = cluster.metadata.name.clone().unwrap_or_default();
    let mut control_plane = RKE2ControlPlane::new(&format!("{}-control-plane", cluster_name), Default::default());
    control_plane.metadata = meta(
        &format!("{}-control-plane", cluster_name),
        &[(CLUSTER_NAME_LABEL, cluster_name.as_str())],
    );
    control_plane.metadata.owner_references = cluster.controller_owner_ref(&()).map(|o| vec![o]);
    control_plane
}

/// Control plane Machine, running on `node` with `internal_ip` once given
pub fn create_test_machine(
    name: &str,
    control_plane: &RKE2ControlPlane,
    node: Option<&str>,
    internal_ip: Option<&str>,
) -> Machine {
    let cluster_name = control_plane.labels().get(CLUSTER_NAME_LABEL).cloned().unwrap_or_default();
    let mut machine = Machine::new(name, Default::default());
    machine.metadata = meta(name, &[(CLUSTER_NAME_LABEL, cluster_name.as_str())]);
    machine.metadata.owner_references = control_plane.controller_owner_ref(&()).map(|o| vec![o]);
    machine.spec.cluster_name = cluster_name;
    machine.status = Some(MachineStatus {
        node_ref: node.map(|n| ObjectReference::new("Node", n)),
        addresses: internal_ip
            .map(|ip| MachineAddress {
                type_: "InternalIP".to_string(),
                address: ip.to_string(),
            })
            .into_iter()
            .collect(),
        ..Default::default()
    });
    machine
}

/// Worker Machine of the cluster, not owned by any control plane
pub fn create_test_worker(name: &str, cluster: &Cluster) -> Machine {
    let cluster_name = cluster.metadata.name.clone().unwrap_or_default();
    let mut machine = Machine::new(name, Default::default());
    machine.metadata = meta(name, &[(CLUSTER_NAME_LABEL, cluster_name.as_str())]);
    machine.spec.cluster_name = cluster_name;
    machine.status = Some(MachineStatus {
        node_ref: Some(ObjectReference::new("Node", name)),
        ..Default::default()
    });
    machine
}

/// Control plane node reporting `Ready` as given
pub fn create_test_node(name: &str, ready: bool) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(CONTROL_PLANE_NODE_LABEL.to_string(), "true".to_string())])),
            ..Default::default()
        },
        spec: Some(NodeSpec::default()),
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// Node tainted by the node lifecycle controller as unreachable
pub fn create_unreachable_node(name: &str) -> Node {
    let mut node = create_test_node(name, false);
    node.spec = Some(NodeSpec {
        taints: Some(vec![Taint {
            key: UNREACHABLE_TAINT.to_string(),
            effect: "NoExecute".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    });
    node
}
