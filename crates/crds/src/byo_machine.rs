//! ByoMachine CRD
//!
//! Infrastructure counterpart of a Cluster API Machine. Reconciling one claims a
//! matching ByoHost and wires it into the workload cluster.

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::byo_host::HostInfo;
use crate::conditions::{Condition, HasConditions};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "ByoMachine",
    namespaced,
    status = "ByoMachineStatus",
    shortname = "byom"
)]
#[serde(rename_all = "camelCase")]
pub struct ByoMachineSpec {
    /// Label selector over candidate ByoHosts; absent selects every host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,

    /// `byoh://<host>/<suffix>` once a host is attached
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Optional K8sInstallerConfig producing the installation secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer_ref: Option<ObjectReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ByoMachineStatus {
    /// Details of the attached host
    #[serde(rename = "hostinfo", default)]
    pub host_info: HostInfo,

    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl HasConditions for ByoMachineStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl ByoMachine {
    pub fn status_mut(&mut self) -> &mut ByoMachineStatus {
        self.status.get_or_insert_with(ByoMachineStatus::default)
    }

    #[must_use]
    pub fn provider_id(&self) -> Option<&str> {
        self.spec.provider_id.as_deref().filter(|p| !p.is_empty())
    }
}
