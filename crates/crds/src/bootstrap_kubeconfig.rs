//! BootstrapKubeconfig CRD
//!
//! Requests a kubeconfig a new host agent can use to register itself. The
//! manager fills `status.bootstrapKubeconfigData` once and never rewrites it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cluster entry name in generated kubeconfigs
pub const DEFAULT_CLUSTER_NAME: &str = "default-cluster";

/// User entry name in generated kubeconfigs
pub const DEFAULT_USER_NAME: &str = "tls-bootstrap-token-user";

/// Context entry name in generated kubeconfigs
pub const DEFAULT_CONTEXT_NAME: &str = "tls-bootstrap-token-user@default-cluster";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "BootstrapKubeconfig",
    namespaced,
    status = "BootstrapKubeconfigStatus"
)]
pub struct BootstrapKubeconfigSpec {
    /// `https://host:port` of the management cluster API server
    #[serde(rename = "apiserver", default)]
    pub api_server: String,

    /// Base64 encoded PEM bundle of the API server CA
    #[serde(rename = "certificate-authority-data", default)]
    pub certificate_authority_data: String,

    #[serde(rename = "insecure-skip-tls-verify", default)]
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapKubeconfigStatus {
    /// Generated kubeconfig YAML
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_kubeconfig_data: Option<String>,
}

impl BootstrapKubeconfig {
    pub fn status_mut(&mut self) -> &mut BootstrapKubeconfigStatus {
        self.status.get_or_insert_with(BootstrapKubeconfigStatus::default)
    }

    pub fn kubeconfig_data(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.bootstrap_kubeconfig_data.as_deref())
    }
}
