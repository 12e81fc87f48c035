//! RKE2 bootstrap CRD Definitions
//!
//! Custom Resource Definitions for the RKE2 bootstrap and control plane
//! controllers, the subset of Cluster API types they read, and the condition
//! helpers shared by all of them.

pub mod capi;
pub mod conditions;
pub mod references;
pub mod rke2_config;
pub mod rke2_control_plane;

pub use capi::*;
pub use conditions::{Condition, ConditionSeverity, ConditionStatus, Conditioned};
pub use references::*;
pub use rke2_config::*;
pub use rke2_control_plane::*;
