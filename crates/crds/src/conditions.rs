//! Status conditions
//!
//! Condition records shared by every BYOH kind, plus the condition types and
//! reasons the controllers and the host agent agree on.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Host has joined the workload cluster
pub const K8S_NODE_BOOTSTRAP_SUCCEEDED: &str = "K8sNodeBootstrapSucceeded";

/// Kubernetes components were installed on the host
pub const K8S_COMPONENTS_INSTALLATION_SUCCEEDED: &str = "K8sComponentsInstallationSucceeded";

/// A ByoHost is attached to the machine and its node is ready
pub const BYO_HOST_READY: &str = "BYOHostReady";

pub const WAITING_FOR_MACHINE_REF_REASON: &str = "WaitingForMachineRef";
pub const BOOTSTRAP_DATA_SECRET_UNAVAILABLE_REASON: &str = "BootstrapDataSecretUnavailable";
pub const CLOUDINIT_EXEC_FAILED_REASON: &str = "CloudInitExecutionFailed";
pub const K8S_INSTALLATION_SECRET_UNAVAILABLE_REASON: &str = "K8sInstallationSecretUnavailable";
pub const K8S_COMPONENTS_INSTALLATION_FAILED_REASON: &str = "K8sComponentsInstallationFailed";
pub const K8S_NODE_ABSENT_REASON: &str = "K8sNodeAbsent";
pub const BYO_HOSTS_UNAVAILABLE_REASON: &str = "BYOHostsUnavailable";
pub const INSTALLATION_SECRET_NOT_AVAILABLE_REASON: &str = "InstallationSecretNotAvailable";
pub const WAITING_FOR_CLUSTER_INFRASTRUCTURE_REASON: &str = "WaitingForClusterInfrastructure";
pub const WAITING_FOR_BOOTSTRAP_DATA_SECRET_REASON: &str = "WaitingForBootstrapDataSecret";
pub const CLUSTER_OR_RESOURCE_PAUSED_REASON: &str = "ClusterOrResourcePaused";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionSeverity {
    Error,
    Warning,
    Info,
}

/// Observation of one aspect of an object's state
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, e.g. "BYOHostReady"
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    /// Only meaningful when status is False
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<ConditionSeverity>,

    /// Last time the status flipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// CamelCase reason for the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Implemented by every status type that carries conditions.
pub trait HasConditions {
    fn conditions(&self) -> &[Condition];
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
}

/// Returns the condition of the given type, if present.
pub fn get<'a, T: HasConditions + ?Sized>(obj: &'a T, type_: &str) -> Option<&'a Condition> {
    obj.conditions().iter().find(|c| c.type_ == type_)
}

#[must_use]
pub fn is_true<T: HasConditions + ?Sized>(obj: &T, type_: &str) -> bool {
    get(obj, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

#[must_use]
pub fn is_false<T: HasConditions + ?Sized>(obj: &T, type_: &str) -> bool {
    get(obj, type_).is_some_and(|c| c.status == ConditionStatus::False)
}

/// Sets the condition to True and clears reason, severity and message.
pub fn mark_true<T: HasConditions + ?Sized>(obj: &mut T, type_: &str) {
    set(
        obj,
        Condition {
            type_: type_.to_string(),
            status: ConditionStatus::True,
            severity: None,
            last_transition_time: None,
            reason: None,
            message: None,
        },
    );
}

/// Sets the condition to False with the given reason and severity.
pub fn mark_false<T: HasConditions + ?Sized>(
    obj: &mut T,
    type_: &str,
    reason: &str,
    severity: ConditionSeverity,
    message: impl Into<String>,
) {
    let message = message.into();
    set(
        obj,
        Condition {
            type_: type_.to_string(),
            status: ConditionStatus::False,
            severity: Some(severity),
            last_transition_time: None,
            reason: Some(reason.to_string()),
            message: (!message.is_empty()).then_some(message),
        },
    );
}

/// Replaces or appends a condition. The transition time only moves when the
/// status changes.
pub fn set<T: HasConditions + ?Sized>(obj: &mut T, mut condition: Condition) {
    let conditions = obj.conditions_mut();
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time
            } else {
                Some(Utc::now())
            };
            *existing = condition;
        }
        None => {
            condition.last_transition_time = Some(Utc::now());
            conditions.push(condition);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Holder {
        conditions: Vec<Condition>,
    }

    impl HasConditions for Holder {
        fn conditions(&self) -> &[Condition] {
            &self.conditions
        }
        fn conditions_mut(&mut self) -> &mut Vec<Condition> {
            &mut self.conditions
        }
    }

    #[test]
    fn test_mark_false_then_true() {
        let mut h = Holder::default();
        mark_false(&mut h, BYO_HOST_READY, BYO_HOSTS_UNAVAILABLE_REASON, ConditionSeverity::Info, "");
        assert!(is_false(&h, BYO_HOST_READY));
        let c = get(&h, BYO_HOST_READY).unwrap();
        assert_eq!(c.reason.as_deref(), Some(BYO_HOSTS_UNAVAILABLE_REASON));
        assert!(c.message.is_none());

        mark_true(&mut h, BYO_HOST_READY);
        assert!(is_true(&h, BYO_HOST_READY));
        assert_eq!(h.conditions.len(), 1);
        assert!(get(&h, BYO_HOST_READY).unwrap().reason.is_none());
    }

    #[test]
    fn test_transition_time_kept_without_flip() {
        let mut h = Holder::default();
        mark_false(&mut h, BYO_HOST_READY, K8S_NODE_ABSENT_REASON, ConditionSeverity::Info, "a");
        let first = get(&h, BYO_HOST_READY).unwrap().last_transition_time;
        mark_false(&mut h, BYO_HOST_READY, WAITING_FOR_BOOTSTRAP_DATA_SECRET_REASON, ConditionSeverity::Info, "b");
        let second = get(&h, BYO_HOST_READY).unwrap();
        assert_eq!(second.last_transition_time, first);
        assert_eq!(second.message.as_deref(), Some("b"));
    }

    #[test]
    fn test_missing_condition_is_neither() {
        let h = Holder::default();
        assert!(!is_true(&h, K8S_NODE_BOOTSTRAP_SUCCEEDED));
        assert!(!is_false(&h, K8S_NODE_BOOTSTRAP_SUCCEEDED));
    }

    #[test]
    fn test_serialized_shape() {
        let mut h = Holder::default();
        mark_false(&mut h, K8S_NODE_BOOTSTRAP_SUCCEEDED, CLOUDINIT_EXEC_FAILED_REASON, ConditionSeverity::Error, "boom");
        let v = serde_json::to_value(&h.conditions[0]).unwrap();
        assert_eq!(v["type"], "K8sNodeBootstrapSucceeded");
        assert_eq!(v["status"], "False");
        assert_eq!(v["severity"], "Error");
        assert!(v.get("lastTransitionTime").is_some());
    }
}
