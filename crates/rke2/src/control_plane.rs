//! RKE2ControlPlane status derived from a health cycle

use crds::conditions;
use crds::{Conditioned, Machine, MachineStatus, RKE2ControlPlaneStatus};

use crate::workload_cluster::{HealthReport, NodeCounts};

const INTERNAL_IP: &str = "InternalIP";
const EXTERNAL_IP: &str = "ExternalIP";

/// Apply the report's conditions and return the Machines that changed
pub fn apply_report(machines: &[Machine], report: &HealthReport) -> Vec<Machine> {
    machines
        .iter()
        .filter_map(|machine| {
            let name = machine.metadata.name.as_deref()?;
            let condition = report.machine_conditions.get(name)?;
            let mut updated = machine.clone();
            let status = updated.status.get_or_insert_with(MachineStatus::default);
            status.set_condition(condition.clone());
            (updated.status != machine.status).then_some(updated)
        })
        .collect()
}

/// Addresses of Machines whose agent is healthy, in Machine order
///
/// InternalIP is preferred; ExternalIP is used when a Machine has none.
pub fn available_server_ips(machines: &[Machine]) -> Vec<String> {
    let mut ips: Vec<String> = Vec::new();
    for machine in machines {
        if machine.is_deleting() {
            continue;
        }
        let healthy = machine
            .status
            .as_ref()
            .is_some_and(|s| s.is_true(conditions::AGENT_HEALTHY));
        if !healthy {
            continue;
        }
        let address = machine.address(INTERNAL_IP).or_else(|| machine.address(EXTERNAL_IP));
        if let Some(address) = address
            && !ips.iter().any(|ip| ip == address)
        {
            ips.push(address.to_string());
        }
    }
    ips
}

/// Fold one cycle into the control plane status
///
/// `machines` must already carry this cycle's conditions. `initialized`
/// never goes back to false.
pub fn update_status(
    status: &mut RKE2ControlPlaneStatus,
    machines: &[Machine],
    counts: NodeCounts,
    reports: &[&HealthReport],
) {
    for report in reports {
        if let Some(condition) = &report.control_plane_condition {
            status.set_condition(condition.clone());
        }
    }

    status.available_server_ips = available_server_ips(machines);
    status.replicas = machines.len() as i32;
    status.ready_replicas = counts.ready_nodes;
    status.ready = counts.ready_nodes > 0;
    if counts.ready_nodes > 0 {
        status.initialized = true;
    }
    status.set_summary(&[
        conditions::CONTROL_PLANE_COMPONENTS_HEALTHY,
        conditions::ETCD_CLUSTER_HEALTHY,
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{Condition, ConditionSeverity, ConditionStatus, MachineAddress};
    use crds::conditions::reasons;
    use std::collections::BTreeMap;

    fn machine(name: &str, healthy: bool, addresses: &[(&str, &str)]) -> Machine {
        let mut machine = Machine::new(name, Default::default());
        let mut status = MachineStatus {
            addresses: addresses
                .iter()
                .map(|(t, a)| MachineAddress {
                    type_: t.to_string(),
                    address: a.to_string(),
                })
                .collect(),
            ..Default::default()
        };
        if healthy {
            status.mark_true(conditions::AGENT_HEALTHY);
        } else {
            status.mark_false(
                conditions::AGENT_HEALTHY,
                reasons::NODE_NOT_READY,
                ConditionSeverity::Warning,
                "not ready",
            );
        }
        machine.status = Some(status);
        machine
    }

    #[test]
    fn test_available_ips_prefer_internal_and_skip_unhealthy() {
        let machines = vec![
            machine("cp-0", true, &[("ExternalIP", "1.2.3.4"), ("InternalIP", "10.0.0.10")]),
            machine("cp-1", false, &[("InternalIP", "10.0.0.11")]),
            machine("cp-2", true, &[("ExternalIP", "1.2.3.6")]),
            machine("cp-3", true, &[]),
        ];
        assert_eq!(available_server_ips(&machines), vec!["10.0.0.10", "1.2.3.6"]);
    }

    #[test]
    fn test_apply_report_returns_only_changed_machines() {
        let machines = vec![
            machine("cp-0", true, &[]),
            machine("cp-1", true, &[]),
        ];
        let report = HealthReport {
            machine_conditions: BTreeMap::from([
                ("cp-0".to_string(), Condition::true_condition(conditions::AGENT_HEALTHY)),
                (
                    "cp-1".to_string(),
                    Condition::false_condition(
                        conditions::AGENT_HEALTHY,
                        reasons::POD_FAILED,
                        ConditionSeverity::Error,
                        "Missing node",
                    ),
                ),
            ]),
            ..Default::default()
        };

        let changed = apply_report(&machines, &report);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].metadata.name.as_deref(), Some("cp-1"));
        assert!(
            changed[0]
                .status
                .as_ref()
                .is_some_and(|s| s.is_false(conditions::AGENT_HEALTHY))
        );
    }

    #[test]
    fn test_initialized_is_sticky() {
        let machines = vec![machine("cp-0", true, &[("InternalIP", "10.0.0.10")])];
        let healthy = HealthReport {
            control_plane_condition: Some(Condition::true_condition(conditions::CONTROL_PLANE_COMPONENTS_HEALTHY)),
            ..Default::default()
        };
        let mut status = RKE2ControlPlaneStatus::default();

        update_status(&mut status, &machines, NodeCounts { nodes: 1, ready_nodes: 1 }, &[&healthy]);
        assert!(status.initialized);
        assert!(status.ready);
        assert_eq!(status.available_server_ips, vec!["10.0.0.10"]);
        assert_eq!(status.replicas, 1);
        assert_eq!(
            status.get_condition(conditions::READY).map(|c| c.status),
            Some(ConditionStatus::True)
        );

        update_status(&mut status, &machines, NodeCounts { nodes: 1, ready_nodes: 0 }, &[]);
        assert!(status.initialized);
        assert!(!status.ready);
        assert_eq!(status.ready_replicas, 0);
    }
}
