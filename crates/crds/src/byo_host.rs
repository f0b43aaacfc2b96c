//! ByoHost CRD
//!
//! A physical or virtual host registered by its agent and available to be
//! claimed by a ByoMachine.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{Condition, HasConditions};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "ByoHost",
    namespaced,
    status = "ByoHostStatus",
    shortname = "byoh"
)]
#[serde(rename_all = "camelCase")]
pub struct ByoHostSpec {
    /// Secret holding the cloud-init bootstrap script (key "value")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_secret: Option<ObjectReference>,

    /// Secret holding the install and uninstall scripts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_secret: Option<ObjectReference>,

    /// Uninstall script copied from the installation secret once it has run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uninstallation_script: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ByoHostStatus {
    /// ByoMachine currently holding this host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_ref: Option<ObjectReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Operating system details reported by the agent
    #[serde(default)]
    pub host_details: HostInfo,

    /// Which secrets the agent has already executed
    #[serde(default)]
    pub executed: ExecutionMarkers,
}

/// Host operating system facts
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct HostInfo {
    #[serde(rename = "osname", default)]
    pub os_name: String,

    #[serde(rename = "osimage", default)]
    pub os_image: String,

    #[serde(default)]
    pub architecture: String,
}

impl HostInfo {
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self == &Self::default()
    }
}

/// Identifiers of secrets whose scripts already ran on the host.
///
/// Values are the `namespace/name` of the executed secret. Cleanup clears them.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMarkers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_secret: Option<String>,
}

impl HasConditions for ByoHostStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl ByoHost {
    /// Status, created empty when missing.
    pub fn status_mut(&mut self) -> &mut ByoHostStatus {
        self.status.get_or_insert_with(ByoHostStatus::default)
    }

    #[must_use]
    pub fn machine_ref(&self) -> Option<&ObjectReference> {
        self.status.as_ref().and_then(|s| s.machine_ref.as_ref())
    }

    #[must_use]
    pub fn executed(&self) -> ExecutionMarkers {
        self.status.as_ref().map(|s| s.executed.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn test_wire_names() {
        let mut host = ByoHost::new("host-0", ByoHostSpec::default());
        host.status_mut().host_details = HostInfo {
            os_name: "linux".into(),
            os_image: "Ubuntu 22.04.4 LTS".into(),
            architecture: "amd64".into(),
        };
        let v = serde_json::to_value(&host).unwrap();
        assert_eq!(v["status"]["hostDetails"]["osname"], "linux");
        assert_eq!(v["status"]["hostDetails"]["osimage"], "Ubuntu 22.04.4 LTS");
        assert_eq!(ByoHost::kind(&()), "ByoHost");
    }

    #[test]
    fn test_host_info_is_zero() {
        assert!(HostInfo::default().is_zero());
        assert!(!HostInfo { architecture: "arm64".into(), ..Default::default() }.is_zero());
    }
}
