//! RKE2ControlPlane health cycle
//!
//! Every cycle inspects the workload cluster's control plane nodes, writes
//! `AgentHealthy` and `EtcdMemberHealthy` on the control plane Machines and
//! rolls them up into the RKE2ControlPlane status together with the server
//! addresses new nodes join through. An unreachable workload cluster only
//! turns the conditions Unknown; the cycle itself still succeeds.

use std::sync::Arc;
use std::time::Duration;

use cluster_client::ClusterClientTrait;
use controller_common::BackoffLedger;
use crds::{
    CLUSTER_API_GROUP, CLUSTER_NAME_LABEL, Machine, PAUSED_ANNOTATION, RKE2ControlPlane, RKE2ControlPlaneStatus,
    find_owner,
};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use rke2::control_plane::{apply_report, update_status};
use rke2::workload_cluster::{
    Capability, NodeInspection, agent_health, cluster_status, etcd_health, inspect_control_plane_nodes,
};
use tracing::{debug, info, warn};

use crate::error::ControllerError;

/// Wait for the owning Cluster
pub const DEPENDENCY_REQUEUE: Duration = Duration::from_secs(10);

const CONTROL_PLANE_GROUP: &str = "controlplane.cluster.x-k8s.io";

/// Machines owned by the given control plane
pub fn owned_machines(machines: Vec<Machine>, control_plane: &str) -> Vec<Machine> {
    machines
        .into_iter()
        .filter(|machine| {
            find_owner(
                machine.metadata.owner_references.as_deref(),
                CONTROL_PLANE_GROUP,
                "RKE2ControlPlane",
            )
            .is_some_and(|owner| owner.name == control_plane)
        })
        .collect()
}

fn owning_cluster_name(control_plane: &RKE2ControlPlane) -> Option<String> {
    find_owner(
        control_plane.metadata.owner_references.as_deref(),
        CLUSTER_API_GROUP,
        "Cluster",
    )
    .map(|owner| owner.name.clone())
    .or_else(|| control_plane.labels().get(CLUSTER_NAME_LABEL).cloned())
}

/// Reconciles RKE2ControlPlane resources.
pub struct Reconciler {
    client: Arc<dyn ClusterClientTrait>,
    health_check_interval: Duration,
    backoff: BackoffLedger,
}

impl Reconciler {
    pub fn new(client: Arc<dyn ClusterClientTrait>, health_check_interval: Duration) -> Self {
        Self {
            client,
            health_check_interval,
            backoff: BackoffLedger::new(),
        }
    }

    pub fn backoff(&self) -> &BackoffLedger {
        &self.backoff
    }

    /// Run one health cycle and requeue for the next
    pub async fn reconcile_control_plane(&self, control_plane: &RKE2ControlPlane) -> Result<Action, ControllerError> {
        let namespace = control_plane.namespace().unwrap_or_default();
        let name = control_plane.name_any();

        let Some(cluster_name) = owning_cluster_name(control_plane) else {
            debug!("RKE2ControlPlane {}/{} has no owning Cluster yet", namespace, name);
            return Ok(Action::requeue(DEPENDENCY_REQUEUE));
        };
        let cluster = match self.client.get_cluster(&namespace, &cluster_name).await {
            Ok(cluster) => cluster,
            Err(e) if e.is_not_found() => {
                debug!("Cluster {}/{} of RKE2ControlPlane {} not found", namespace, cluster_name, name);
                return Ok(Action::requeue(DEPENDENCY_REQUEUE));
            }
            Err(e) => return Err(e.into()),
        };
        if cluster.spec.paused
            || cluster.annotations().contains_key(PAUSED_ANNOTATION)
            || control_plane.annotations().contains_key(PAUSED_ANNOTATION)
        {
            info!("Reconciliation of RKE2ControlPlane {}/{} is paused", namespace, name);
            return Ok(Action::await_change());
        }

        let machines = owned_machines(self.client.list_machines(&namespace, &cluster_name).await?, &name);

        let (agent_inspection, etcd_inspection) = match self.client.workload_cluster(&namespace, &cluster_name).await {
            Ok(workload) => (
                inspect_control_plane_nodes(workload.as_ref(), &machines, Capability::Agent).await,
                inspect_control_plane_nodes(workload.as_ref(), &machines, Capability::Etcd).await,
            ),
            Err(e) => {
                warn!("Workload cluster {}/{} is unreachable: {}", namespace, cluster_name, e);
                (
                    NodeInspection::unreachable(e.to_string()),
                    NodeInspection::unreachable(e.to_string()),
                )
            }
        };

        let agent = agent_health(&agent_inspection, &machines);
        let etcd = etcd_health(&etcd_inspection, &machines);
        if agent.aborted {
            debug!("Agent health cycle of {}/{} stopped early", namespace, name);
        }

        let mut current = machines.clone();
        for report in [&agent, &etcd] {
            for changed in apply_report(&current, report) {
                if let Some(slot) = current.iter_mut().find(|m| m.metadata.name == changed.metadata.name) {
                    *slot = changed;
                }
            }
        }
        for (before, after) in machines.iter().zip(&current) {
            if before.status != after.status {
                self.client.patch_machine_status(after).await?;
                debug!("Patched health conditions of Machine {}/{}", namespace, after.name_any());
            }
        }

        let counts = match &agent_inspection.nodes {
            Ok(nodes) => cluster_status(nodes),
            Err(_) => Default::default(),
        };

        let mut updated = control_plane.clone();
        let status = updated.status.get_or_insert_with(RKE2ControlPlaneStatus::default);
        update_status(status, &current, counts, &[&agent, &etcd]);
        status.observed_generation = control_plane.metadata.generation;

        if updated.status != control_plane.status {
            self.client.patch_control_plane_status(&updated).await?;
            debug!("Patched status of RKE2ControlPlane {}/{}", namespace, name);
        }

        Ok(Action::requeue(self.health_check_interval))
    }
}
