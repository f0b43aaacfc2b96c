//! BYOH CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the bring-your-own-host Cluster API
//! provider, together with the label/annotation/condition contract shared by the
//! manager and the host agent.

pub mod bootstrap_kubeconfig;
pub mod byo_cluster;
pub mod byo_host;
pub mod byo_machine;
pub mod cluster_api;
pub mod conditions;
pub mod constants;
pub mod k8s_installer_config;
pub mod references;
pub mod validation;

pub use bootstrap_kubeconfig::*;
pub use byo_cluster::*;
pub use byo_host::*;
pub use byo_machine::*;
pub use cluster_api::*;
pub use conditions::{Condition, ConditionSeverity, ConditionStatus, HasConditions};
pub use k8s_installer_config::*;
