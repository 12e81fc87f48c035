//! Unit tests for the RKE2ControlPlane health cycle

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cluster_client::{MockClusterClient, MockWorkloadCluster};
use crds::conditions::{self, reasons};
use crds::{Cluster, ConditionSeverity, ConditionStatus, Conditioned, PAUSED_ANNOTATION, RKE2ControlPlane};
use kube_runtime::controller::Action;

use crate::reconciler::{DEPENDENCY_REQUEUE, Reconciler};
use crate::test_utils::*;

const INTERVAL: Duration = Duration::from_secs(30);

struct Fixture {
    client: MockClusterClient,
    cluster: Cluster,
    control_plane: RKE2ControlPlane,
    workload: MockWorkloadCluster,
}

/// Cluster `prod` with control plane Machines `cp-<i>` on nodes of the same
/// name and addresses `10.0.0.1<i>`
fn fixture(machine_count: usize) -> Fixture {
    let client = MockClusterClient::new();
    let cluster = client.add_cluster(create_test_cluster("prod"));
    let control_plane = client.add_control_plane(create_test_control_plane(&cluster));
    for i in 0..machine_count {
        let name = format!("cp-{}", i);
        let ip = format!("10.0.0.1{}", i);
        client.add_machine(create_test_machine(&name, &control_plane, Some(&name), Some(&ip)));
    }
    let workload = MockWorkloadCluster::new();
    Fixture {
        client,
        cluster,
        control_plane,
        workload,
    }
}

impl Fixture {
    fn connect(&self) {
        self.client
            .set_workload_cluster(TEST_NAMESPACE, "prod", self.workload.clone());
    }

    async fn run(&self) -> Action {
        let control_plane = self
            .client
            .stored_control_plane(TEST_NAMESPACE, "prod-control-plane")
            .expect("control plane stored");
        Reconciler::new(Arc::new(self.client.clone()), INTERVAL)
            .reconcile_control_plane(&control_plane)
            .await
            .expect("health cycle never fails")
    }

    fn status(&self) -> crds::RKE2ControlPlaneStatus {
        self.client
            .stored_control_plane(TEST_NAMESPACE, "prod-control-plane")
            .and_then(|cp| cp.status)
            .expect("status written")
    }

    fn machine_condition(&self, machine: &str, type_: &str) -> Option<(ConditionStatus, Option<String>)> {
        self.client
            .stored_machine(TEST_NAMESPACE, machine)?
            .status?
            .get_condition(type_)
            .map(|c| (c.status, c.reason.clone()))
    }
}

#[tokio::test]
async fn test_healthy_control_plane() {
    let fx = fixture(2);
    fx.workload.add_node(create_test_node("cp-0", true));
    fx.workload.add_node(create_test_node("cp-1", true));
    fx.connect();

    assert_eq!(fx.run().await, Action::requeue(INTERVAL));

    let status = fx.status();
    assert_eq!(status.available_server_ips, vec!["10.0.0.10", "10.0.0.11"]);
    assert!(status.ready);
    assert!(status.initialized);
    assert_eq!(status.replicas, 2);
    assert_eq!(status.ready_replicas, 2);
    assert_eq!(status.observed_generation, Some(1));
    assert!(status.is_true(conditions::CONTROL_PLANE_COMPONENTS_HEALTHY));
    assert!(status.is_true(conditions::ETCD_CLUSTER_HEALTHY));
    assert!(status.is_true(conditions::READY));

    for machine in ["cp-0", "cp-1"] {
        assert_eq!(
            fx.machine_condition(machine, conditions::AGENT_HEALTHY),
            Some((ConditionStatus::True, None))
        );
        assert_eq!(
            fx.machine_condition(machine, conditions::ETCD_MEMBER_HEALTHY),
            Some((ConditionStatus::True, None))
        );
    }
}

#[tokio::test]
async fn test_not_ready_node_is_not_advertised() {
    let fx = fixture(2);
    fx.workload.add_node(create_test_node("cp-0", true));
    fx.workload.add_node(create_test_node("cp-1", false));
    fx.connect();

    fx.run().await;

    let status = fx.status();
    assert_eq!(status.available_server_ips, vec!["10.0.0.10"]);
    assert_eq!(status.ready_replicas, 1);
    let rollup = status
        .get_condition(conditions::CONTROL_PLANE_COMPONENTS_HEALTHY)
        .expect("rolled up");
    assert_eq!(rollup.status, ConditionStatus::False);
    assert_eq!(rollup.severity, Some(ConditionSeverity::Warning));
    assert!(rollup.message.as_deref().is_some_and(|m| m.ends_with("cp-1")));
    assert_eq!(
        fx.machine_condition("cp-1", conditions::AGENT_HEALTHY),
        Some((ConditionStatus::False, Some(reasons::NODE_NOT_READY.to_string())))
    );
}

#[tokio::test]
async fn test_unreachable_workload_cluster_degrades_to_unknown() {
    let fx = fixture(1);

    assert_eq!(fx.run().await, Action::requeue(INTERVAL));

    let status = fx.status();
    assert!(!status.ready);
    assert!(!status.initialized);
    assert!(status.available_server_ips.is_empty());
    let agent = status
        .get_condition(conditions::CONTROL_PLANE_COMPONENTS_HEALTHY)
        .expect("agent roll-up");
    assert_eq!(agent.status, ConditionStatus::Unknown);
    assert_eq!(
        agent.reason.as_deref(),
        Some(reasons::CONTROL_PLANE_COMPONENTS_INSPECTION_FAILED)
    );
    let etcd = status
        .get_condition(conditions::ETCD_CLUSTER_HEALTHY)
        .expect("etcd roll-up");
    assert_eq!(etcd.reason.as_deref(), Some(reasons::ETCD_CLUSTER_INSPECTION_FAILED));
    assert_eq!(
        fx.machine_condition("cp-0", conditions::ETCD_MEMBER_HEALTHY),
        Some((
            ConditionStatus::Unknown,
            Some(reasons::ETCD_MEMBER_INSPECTION_FAILED.to_string())
        ))
    );
    assert_eq!(fx.machine_condition("cp-0", conditions::AGENT_HEALTHY), None);
}

#[tokio::test]
async fn test_machine_with_vanished_node() {
    let fx = fixture(2);
    fx.workload.add_node(create_test_node("cp-0", true));
    fx.connect();

    fx.run().await;

    assert_eq!(
        fx.machine_condition("cp-1", conditions::AGENT_HEALTHY),
        Some((ConditionStatus::False, Some(reasons::POD_FAILED.to_string())))
    );
    let rollup = fx
        .status()
        .get_condition(conditions::CONTROL_PLANE_COMPONENTS_HEALTHY)
        .cloned()
        .expect("rolled up");
    assert_eq!(rollup.status, ConditionStatus::False);
    assert_eq!(rollup.severity, Some(ConditionSeverity::Error));
}

#[tokio::test]
async fn test_unreachable_node_is_unknown_but_ready_peer_keeps_rollup_true() {
    let fx = fixture(2);
    fx.workload.add_node(create_test_node("cp-0", true));
    fx.workload.add_node(create_unreachable_node("cp-1"));
    fx.connect();

    fx.run().await;

    assert_eq!(
        fx.machine_condition("cp-1", conditions::AGENT_HEALTHY),
        Some((
            ConditionStatus::Unknown,
            Some(reasons::POD_INSPECTION_FAILED.to_string())
        ))
    );
    let status = fx.status();
    assert_eq!(status.available_server_ips, vec!["10.0.0.10"]);
    assert_eq!(
        status
            .get_condition(conditions::CONTROL_PLANE_COMPONENTS_HEALTHY)
            .map(|c| c.status),
        Some(ConditionStatus::True)
    );
}

#[tokio::test]
async fn test_steady_state_writes_nothing() {
    let fx = fixture(2);
    fx.workload.add_node(create_test_node("cp-0", true));
    fx.workload.add_node(create_test_node("cp-1", true));
    fx.connect();

    fx.run().await;
    let after_first = fx.client.writes();
    assert_eq!(after_first.machine_status_patches, 2);
    assert_eq!(after_first.control_plane_status_patches, 1);

    fx.run().await;
    assert_eq!(fx.client.writes(), after_first);
}

#[tokio::test]
async fn test_initialized_survives_lost_nodes() {
    let fx = fixture(1);
    fx.workload.add_node(create_test_node("cp-0", true));
    fx.connect();
    fx.run().await;
    assert!(fx.status().initialized);

    fx.workload.add_node(create_test_node("cp-0", false));
    fx.run().await;

    let status = fx.status();
    assert!(status.initialized);
    assert!(!status.ready);
    assert!(status.available_server_ips.is_empty());
}

#[tokio::test]
async fn test_worker_machines_are_not_inspected() {
    let fx = fixture(1);
    fx.client.add_machine(create_test_worker("worker-0", &fx.cluster));
    fx.workload.add_node(create_test_node("cp-0", true));
    fx.connect();

    fx.run().await;

    assert_eq!(fx.status().replicas, 1);
    assert_eq!(fx.machine_condition("worker-0", conditions::AGENT_HEALTHY), None);
}

#[tokio::test]
async fn test_paused_cluster_is_skipped() {
    let client = MockClusterClient::new();
    let mut cluster = create_test_cluster("prod");
    cluster.spec.paused = true;
    let cluster = client.add_cluster(cluster);
    let control_plane = client.add_control_plane(create_test_control_plane(&cluster));

    let action = Reconciler::new(Arc::new(client.clone()), INTERVAL)
        .reconcile_control_plane(&control_plane)
        .await
        .expect("reconciles");

    assert_eq!(action, Action::await_change());
    assert_eq!(client.writes(), Default::default());
}

#[tokio::test]
async fn test_paused_control_plane_is_skipped() {
    let fx = fixture(1);
    let mut control_plane = fx.control_plane.clone();
    control_plane.metadata.annotations = Some(BTreeMap::from([(PAUSED_ANNOTATION.to_string(), "true".to_string())]));

    let action = Reconciler::new(Arc::new(fx.client.clone()), INTERVAL)
        .reconcile_control_plane(&control_plane)
        .await
        .expect("reconciles");

    assert_eq!(action, Action::await_change());
}

#[tokio::test]
async fn test_control_plane_without_cluster_requeues() {
    let client = MockClusterClient::new();
    let mut control_plane = RKE2ControlPlane::new("orphan", Default::default());
    control_plane.metadata.namespace = Some(TEST_NAMESPACE.to_string());

    let action = Reconciler::new(Arc::new(client.clone()), INTERVAL)
        .reconcile_control_plane(&control_plane)
        .await
        .expect("reconciles");

    assert_eq!(action, Action::requeue(DEPENDENCY_REQUEUE));
}
