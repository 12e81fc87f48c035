//! Control plane health aggregation
//!
//! Each health cycle inspects the workload cluster's control plane nodes,
//! classifies every node into a condition on its Machine and rolls the
//! Machine conditions up into one condition on the RKE2ControlPlane.
//!
//! Inspection is the only part that talks to the workload cluster; the
//! classification in [`agent_health`] and [`etcd_health`] is pure so the
//! controller can persist whatever a cycle produced, even a partial one.
//!
//! Roll-up priority: any Error (or a node without a Machine) wins, then
//! Warning, then Info, then True, then Unknown. A single True Machine
//! outranks Unknown ones. No Machine condition at all yields no control plane
//! condition.

use std::collections::{BTreeMap, HashSet};

use cluster_client::WorkloadClusterTrait;
use crds::conditions::{self, reasons};
use crds::{Condition, ConditionSeverity, ConditionStatus, Conditioned, Machine};
use k8s_openapi::api::core::v1::Node;
use tracing::{debug, warn};

pub const UNREACHABLE_TAINT: &str = "node.kubernetes.io/unreachable";

/// Health aspect rolled up per cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// RKE2 agent / node readiness
    Agent,
    /// Embedded etcd membership
    Etcd,
}

impl Capability {
    pub fn machine_condition(self) -> &'static str {
        match self {
            Capability::Agent => conditions::AGENT_HEALTHY,
            Capability::Etcd => conditions::ETCD_MEMBER_HEALTHY,
        }
    }

    pub fn control_plane_condition(self) -> &'static str {
        match self {
            Capability::Agent => conditions::CONTROL_PLANE_COMPONENTS_HEALTHY,
            Capability::Etcd => conditions::ETCD_CLUSTER_HEALTHY,
        }
    }

    fn unhealthy_reason(self) -> &'static str {
        match self {
            Capability::Agent => reasons::CONTROL_PLANE_COMPONENTS_UNHEALTHY,
            Capability::Etcd => reasons::ETCD_CLUSTER_UNHEALTHY,
        }
    }

    fn unknown_reason(self) -> &'static str {
        match self {
            Capability::Agent => reasons::CONTROL_PLANE_COMPONENTS_UNKNOWN,
            Capability::Etcd => reasons::ETCD_CLUSTER_UNKNOWN,
        }
    }

    fn note(self) -> &'static str {
        match self {
            Capability::Agent => "control plane",
            Capability::Etcd => "etcd",
        }
    }
}

/// Detailed status of one node
#[derive(Debug, Clone)]
pub enum NodeDetail {
    Found(Node),
    Missing,
    Failed(String),
}

/// What a cycle observed in the workload cluster
#[derive(Debug, Clone)]
pub struct NodeInspection {
    /// Control plane nodes, or why they could not be listed
    pub nodes: Result<Vec<Node>, String>,
    /// Detailed status per node name; filled for the agent capability only
    pub details: BTreeMap<String, NodeDetail>,
}

impl NodeInspection {
    /// Inspection of a workload cluster that could not be reached at all
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self {
            nodes: Err(message.into()),
            details: BTreeMap::new(),
        }
    }
}

/// Conditions produced by one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthReport {
    /// Machine name to its new condition
    pub machine_conditions: BTreeMap<String, Condition>,
    /// Roll-up; `None` when there is nothing to report or the cycle aborted
    pub control_plane_condition: Option<Condition>,
    /// Cycle stopped at a missing or unreadable node
    pub aborted: bool,
}

/// Control plane node totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeCounts {
    pub nodes: i32,
    pub ready_nodes: i32,
}

fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

pub fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
}

pub fn is_node_unreachable(node: &Node) -> bool {
    node.spec
        .as_ref()
        .and_then(|s| s.taints.as_ref())
        .is_some_and(|taints| {
            taints
                .iter()
                .any(|t| t.key == UNREACHABLE_TAINT && t.effect == "NoExecute")
        })
}

fn machine_for_node<'a>(machines: &'a [Machine], node: &str) -> Option<&'a Machine> {
    machines.iter().find(|m| m.node_name() == Some(node))
}

fn machine_name(machine: &Machine) -> String {
    machine.metadata.name.clone().unwrap_or_default()
}

/// List the control plane nodes and, for the agent capability, fetch the
/// status of every node that has a live Machine
///
/// Detail fetching stops at the first missing or unreadable node.
pub async fn inspect_control_plane_nodes(
    workload: &dyn WorkloadClusterTrait,
    machines: &[Machine],
    capability: Capability,
) -> NodeInspection {
    let nodes = match workload.list_control_plane_nodes().await {
        Ok(nodes) => nodes,
        Err(e) => {
            warn!("Failed to list control plane nodes: {}", e);
            return NodeInspection::unreachable(e.to_string());
        }
    };

    let mut details = BTreeMap::new();
    if capability == Capability::Agent {
        for node in &nodes {
            let name = node_name(node);
            let live = machine_for_node(machines, name).is_some_and(|m| !m.is_deleting());
            if !live || is_node_unreachable(node) {
                continue;
            }
            match workload.get_node(name).await {
                Ok(detail) => {
                    details.insert(name.to_string(), NodeDetail::Found(detail));
                }
                Err(e) if e.is_not_found() => {
                    details.insert(name.to_string(), NodeDetail::Missing);
                    break;
                }
                Err(e) => {
                    debug!("Failed to get node {}: {}", name, e);
                    details.insert(name.to_string(), NodeDetail::Failed(e.to_string()));
                    break;
                }
            }
        }
    }

    NodeInspection {
        nodes: Ok(nodes),
        details,
    }
}

/// Classify control plane nodes by agent health and roll up
/// `ControlPlaneComponentsHealthy`
pub fn agent_health(inspection: &NodeInspection, machines: &[Machine]) -> HealthReport {
    let capability = Capability::Agent;
    let condition_type = capability.machine_condition();
    let mut report = HealthReport::default();

    let nodes = match &inspection.nodes {
        Ok(nodes) => nodes,
        Err(_) => {
            report.control_plane_condition = Some(Condition::unknown_condition(
                capability.control_plane_condition(),
                reasons::CONTROL_PLANE_COMPONENTS_INSPECTION_FAILED,
                "Failed to list nodes which are hosting control plane components",
            ));
            return report;
        }
    };

    let provisioning = machines.iter().any(|m| m.node_name().is_none());
    let mut control_plane_errors = Vec::new();

    for node in nodes {
        let name = node_name(node);
        let Some(machine) = machine_for_node(machines, name) else {
            if !provisioning {
                control_plane_errors.push(format!(
                    "Control plane node {} does not have a corresponding machine",
                    name
                ));
            }
            continue;
        };

        let condition = if machine.is_deleting() {
            Condition::false_condition(condition_type, reasons::DELETING, ConditionSeverity::Info, "")
        } else if is_node_unreachable(node) {
            Condition::unknown_condition(condition_type, reasons::POD_INSPECTION_FAILED, "Node is unreachable")
        } else {
            match inspection.details.get(name) {
                Some(NodeDetail::Missing) => {
                    report.aborted = true;
                    Condition::false_condition(
                        condition_type,
                        reasons::POD_MISSING,
                        ConditionSeverity::Error,
                        format!("Node {} is missing", name),
                    )
                }
                Some(NodeDetail::Failed(_)) => {
                    report.aborted = true;
                    Condition::unknown_condition(
                        condition_type,
                        reasons::POD_INSPECTION_FAILED,
                        "Failed to get node status",
                    )
                }
                Some(NodeDetail::Found(detail)) => readiness_condition(condition_type, detail),
                None => readiness_condition(condition_type, node),
            }
        };
        report.machine_conditions.insert(machine_name(machine), condition);

        if report.aborted {
            return report;
        }
    }

    let listed: HashSet<&str> = nodes.iter().map(node_name).collect();
    for machine in machines {
        if let Some(node) = machine.node_name()
            && !listed.contains(node)
        {
            report.machine_conditions.insert(
                machine_name(machine),
                Condition::false_condition(condition_type, reasons::POD_FAILED, ConditionSeverity::Error, "Missing node"),
            );
        }
    }

    report.control_plane_condition = aggregate(capability, machines, &report.machine_conditions, &control_plane_errors);
    report
}

fn readiness_condition(condition_type: &str, node: &Node) -> Condition {
    if is_node_ready(node) {
        Condition::true_condition(condition_type)
    } else {
        Condition::false_condition(
            condition_type,
            reasons::NODE_NOT_READY,
            ConditionSeverity::Warning,
            format!("Node {} is not ready", node_name(node)),
        )
    }
}

/// Classify control plane nodes by etcd membership and roll up
/// `EtcdClusterHealthy`
///
/// Nodes without a Machine are skipped rather than reported.
pub fn etcd_health(inspection: &NodeInspection, machines: &[Machine]) -> HealthReport {
    let capability = Capability::Etcd;
    let condition_type = capability.machine_condition();
    let mut report = HealthReport::default();

    let nodes = match &inspection.nodes {
        Ok(nodes) => nodes,
        Err(_) => {
            for machine in machines {
                report.machine_conditions.insert(
                    machine_name(machine),
                    Condition::unknown_condition(
                        condition_type,
                        reasons::ETCD_MEMBER_INSPECTION_FAILED,
                        "Failed to get the node which is hosting the etcd member",
                    ),
                );
            }
            report.control_plane_condition = Some(Condition::unknown_condition(
                capability.control_plane_condition(),
                reasons::ETCD_CLUSTER_INSPECTION_FAILED,
                "Failed to list nodes which are hosting the etcd members",
            ));
            return report;
        }
    };

    for node in nodes {
        let name = node_name(node);
        let Some(machine) = machine_for_node(machines, name) else {
            continue;
        };
        let condition = if machine.is_deleting() {
            Condition::false_condition(condition_type, reasons::DELETING, ConditionSeverity::Info, "")
        } else if is_node_unreachable(node) {
            Condition::unknown_condition(condition_type, reasons::ETCD_MEMBER_INSPECTION_FAILED, "Node is unreachable")
        } else {
            Condition::true_condition(condition_type)
        };
        report.machine_conditions.insert(machine_name(machine), condition);
    }

    report.control_plane_condition = aggregate(capability, machines, &report.machine_conditions, &[]);
    report
}

/// Roll Machine conditions up into the control plane condition
///
/// `updates` overlay the conditions already stored on the Machines.
pub fn aggregate(
    capability: Capability,
    machines: &[Machine],
    updates: &BTreeMap<String, Condition>,
    control_plane_errors: &[String],
) -> Option<Condition> {
    let condition_type = capability.machine_condition();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut infos = Vec::new();
    let mut trues = Vec::new();
    let mut unknowns = Vec::new();

    for machine in machines {
        let name = machine_name(machine);
        let condition = updates.get(&name).or_else(|| {
            machine
                .status
                .as_ref()
                .and_then(|s| s.get_condition(condition_type))
        });
        let Some(condition) = condition else {
            continue;
        };
        match (condition.status, condition.severity) {
            (ConditionStatus::False, Some(ConditionSeverity::Error)) => errors.push(name),
            (ConditionStatus::False, Some(ConditionSeverity::Warning)) => warnings.push(name),
            (ConditionStatus::False, _) => infos.push(name),
            (ConditionStatus::True, _) => trues.push(name),
            (ConditionStatus::Unknown, _) => unknowns.push(name),
        }
    }

    for names in [&mut errors, &mut warnings, &mut infos, &mut unknowns] {
        names.sort();
    }

    let target = capability.control_plane_condition();
    let note = capability.note();

    if !errors.is_empty() || !control_plane_errors.is_empty() {
        let mut messages = control_plane_errors.to_vec();
        if !errors.is_empty() {
            messages.push(format!(
                "Following machines are reporting {} errors: {}",
                note,
                errors.join(", ")
            ));
        }
        return Some(Condition::false_condition(
            target,
            capability.unhealthy_reason(),
            ConditionSeverity::Error,
            messages.join("; "),
        ));
    }
    if !warnings.is_empty() {
        return Some(Condition::false_condition(
            target,
            capability.unhealthy_reason(),
            ConditionSeverity::Warning,
            format!("Following machines are reporting {} warnings: {}", note, warnings.join(", ")),
        ));
    }
    if !infos.is_empty() {
        return Some(Condition::false_condition(
            target,
            capability.unhealthy_reason(),
            ConditionSeverity::Info,
            format!("Following machines are reporting {} info: {}", note, infos.join(", ")),
        ));
    }
    if !trues.is_empty() {
        return Some(Condition::true_condition(target));
    }
    if !unknowns.is_empty() {
        return Some(Condition::unknown_condition(
            target,
            capability.unknown_reason(),
            format!("Following machines are reporting unknown {} status: {}", note, unknowns.join(", ")),
        ));
    }
    None
}

/// Total and ready control plane nodes
pub fn cluster_status(nodes: &[Node]) -> NodeCounts {
    NodeCounts {
        nodes: nodes.len() as i32,
        ready_nodes: nodes.iter().filter(|n| is_node_ready(n)).count() as i32,
    }
}
