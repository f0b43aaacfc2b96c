//! K8sInstallerConfig and K8sInstallerConfigTemplate CRDs
//!
//! Describe which installation bundle to use for a machine; the controller
//! renders install/uninstall scripts into a Secret and reports it in status.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "K8sInstallerConfig",
    namespaced,
    status = "K8sInstallerConfigStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct K8sInstallerConfigSpec {
    /// Repository holding the installation bundles
    pub bundle_repo: String,

    /// Bundle flavour, e.g. "k8s"
    pub bundle_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct K8sInstallerConfigStatus {
    /// True once the installation secret exists
    #[serde(default)]
    pub ready: bool,

    /// Secret with "install" and "uninstall" keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_secret: Option<ObjectReference>,
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "K8sInstallerConfigTemplate",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct K8sInstallerConfigTemplateSpec {
    pub template: K8sInstallerConfigTemplateResource,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct K8sInstallerConfigTemplateResource {
    pub spec: K8sInstallerConfigSpec,
}

impl K8sInstallerConfig {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }

    pub fn status_mut(&mut self) -> &mut K8sInstallerConfigStatus {
        self.status.get_or_insert_with(K8sInstallerConfigStatus::default)
    }
}
