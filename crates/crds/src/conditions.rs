//! Condition ledger
//!
//! Cluster API style conditions carried in the `status.conditions` list of the
//! bootstrap, control plane and mirrored Cluster API objects, together with
//! the helpers that keep them consistent (`mark_true`, `mark_false`,
//! `mark_unknown`, `set_summary`).
//!
//! Setting a condition keeps its `lastTransitionTime` unless the status
//! actually changes, so repeated reconciles do not produce status churn.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Summary condition computed from the other conditions of an object
pub const READY: &str = "Ready";
/// Bootstrap payload secret has been written for an RKE2Config
pub const DATA_SECRET_AVAILABLE: &str = "DataSecretAvailable";
/// Cluster CA secrets exist for the initial control plane
pub const CERTIFICATES_AVAILABLE: &str = "CertificatesAvailable";
/// First control plane node of a Cluster is up
pub const CONTROL_PLANE_INITIALIZED: &str = "ControlPlaneInitialized";
/// Machine level RKE2 agent health
pub const AGENT_HEALTHY: &str = "AgentHealthy";
/// Machine level etcd member health
pub const ETCD_MEMBER_HEALTHY: &str = "EtcdMemberHealthy";
/// Control plane roll-up of `AgentHealthy`
pub const CONTROL_PLANE_COMPONENTS_HEALTHY: &str = "ControlPlaneComponentsHealthy";
/// Control plane roll-up of `EtcdMemberHealthy`
pub const ETCD_CLUSTER_HEALTHY: &str = "EtcdClusterHealthy";

/// Condition reasons
pub mod reasons {
    pub const WAITING_FOR_CLUSTER_INFRASTRUCTURE: &str = "WaitingForClusterInfrastructure";
    pub const DATA_SECRET_GENERATION_FAILED: &str = "DataSecretGenerationFailed";
    pub const CERTIFICATES_GENERATION_FAILED: &str = "CertificatesGenerationFailed";
    pub const DELETING: &str = "Deleting";
    pub const POD_MISSING: &str = "PodMissing";
    pub const POD_FAILED: &str = "PodFailed";
    pub const POD_INSPECTION_FAILED: &str = "PodInspectionFailed";
    pub const NODE_NOT_READY: &str = "NodeNotReady";
    pub const CONTROL_PLANE_COMPONENTS_UNHEALTHY: &str = "ControlPlaneComponentsUnhealthy";
    pub const CONTROL_PLANE_COMPONENTS_UNKNOWN: &str = "ControlPlaneComponentsUnknown";
    pub const CONTROL_PLANE_COMPONENTS_INSPECTION_FAILED: &str = "ControlPlaneComponentsInspectionFailed";
    pub const ETCD_CLUSTER_UNHEALTHY: &str = "EtcdClusterUnhealthy";
    pub const ETCD_CLUSTER_UNKNOWN: &str = "EtcdClusterUnknown";
    pub const ETCD_CLUSTER_INSPECTION_FAILED: &str = "EtcdClusterInspectionFailed";
    pub const ETCD_MEMBER_INSPECTION_FAILED: &str = "EtcdMemberInspectionFailed";
}

/// Condition status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// Severity of a False condition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionSeverity {
    Error,
    Warning,
    Info,
}

/// A single observation about an object
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g., "Ready", "DataSecretAvailable")
    #[serde(rename = "type")]
    pub type_: String,

    /// True, False or Unknown
    pub status: ConditionStatus,

    /// Only set for False conditions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<ConditionSeverity>,

    /// Last time the status changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// CamelCase reason for the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human readable details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    pub fn true_condition(type_: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::True,
            severity: None,
            last_transition_time: Some(Utc::now()),
            reason: None,
            message: None,
        }
    }

    pub fn false_condition(type_: &str, reason: &str, severity: ConditionSeverity, message: impl Into<String>) -> Self {
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::False,
            severity: Some(severity),
            last_transition_time: Some(Utc::now()),
            reason: Some(reason.to_string()),
            message: non_empty(message.into()),
        }
    }

    pub fn unknown_condition(type_: &str, reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::Unknown,
            severity: None,
            last_transition_time: Some(Utc::now()),
            reason: Some(reason.to_string()),
            message: non_empty(message.into()),
        }
    }

    fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.severity == other.severity
            && self.reason == other.reason
            && self.message == other.message
    }

    /// Merge priority: lower wins
    fn priority(&self) -> u8 {
        match (self.status, self.severity) {
            (ConditionStatus::False, Some(ConditionSeverity::Error)) => 0,
            (ConditionStatus::False, Some(ConditionSeverity::Warning)) => 1,
            (ConditionStatus::False, _) => 2,
            (ConditionStatus::True, _) => 3,
            (ConditionStatus::Unknown, _) => 4,
        }
    }
}

fn non_empty(message: String) -> Option<String> {
    if message.is_empty() { None } else { Some(message) }
}

/// Objects that carry a condition list
///
/// Implemented on the status structs; all helpers are provided methods.
pub trait Conditioned {
    fn conditions(&self) -> &[Condition];
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions().iter().find(|c| c.type_ == type_)
    }

    /// Absent conditions are not true
    fn is_true(&self, type_: &str) -> bool {
        self.get_condition(type_)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    fn is_false(&self, type_: &str) -> bool {
        self.get_condition(type_)
            .is_some_and(|c| c.status == ConditionStatus::False)
    }

    /// Insert or replace a condition
    ///
    /// An existing condition with the same state is left untouched; a status
    /// change gets the new transition time, otherwise the old one is kept.
    /// The list stays ordered with `Ready` first, then by type.
    fn set_condition(&mut self, mut condition: Condition) {
        let conditions = self.conditions_mut();
        match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.same_state(&condition) {
                    return;
                }
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => conditions.push(condition),
        }
        conditions.sort_by(|a, b| {
            (a.type_ != READY, a.type_.as_str()).cmp(&(b.type_ != READY, b.type_.as_str()))
        });
    }

    fn mark_true(&mut self, type_: &str) {
        self.set_condition(Condition::true_condition(type_));
    }

    fn mark_false(&mut self, type_: &str, reason: &str, severity: ConditionSeverity, message: impl Into<String>)
    where
        Self: Sized,
    {
        self.set_condition(Condition::false_condition(type_, reason, severity, message));
    }

    fn mark_unknown(&mut self, type_: &str, reason: &str, message: impl Into<String>)
    where
        Self: Sized,
    {
        self.set_condition(Condition::unknown_condition(type_, reason, message));
    }

    fn delete_condition(&mut self, type_: &str) {
        self.conditions_mut().retain(|c| c.type_ != type_);
    }

    /// Recompute `Ready` from the given condition types
    ///
    /// The highest priority source wins: False/Error, False/Warning,
    /// False/Info, True, Unknown. `Ready` is left untouched when none of the
    /// sources is present.
    fn set_summary(&mut self, sources: &[&str]) {
        let top = self
            .conditions()
            .iter()
            .filter(|c| c.type_ != READY && sources.contains(&c.type_.as_str()))
            .min_by_key(|c| c.priority())
            .cloned();

        if let Some(top) = top {
            self.set_condition(Condition {
                type_: READY.to_string(),
                last_transition_time: Some(Utc::now()),
                ..top
            });
        }
    }
}
