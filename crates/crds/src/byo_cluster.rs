//! ByoCluster CRD
//!
//! Cluster-level infrastructure object. Holds the control plane endpoint and
//! the registry used for installation bundles.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{Condition, HasConditions};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "ByoCluster",
    namespaced,
    status = "ByoClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ByoClusterSpec {
    /// Endpoint used to reach the workload control plane
    #[serde(default)]
    pub control_plane_endpoint: ApiEndpoint,

    /// Base registry for installation bundle lookup
    #[serde(default)]
    pub bundle_lookup_base_registry: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct ApiEndpoint {
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub port: i32,
}

impl ApiEndpoint {
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.host.is_empty() && self.port == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ByoClusterStatus {
    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl HasConditions for ByoClusterStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl ByoCluster {
    pub fn status_mut(&mut self) -> &mut ByoClusterStatus {
        self.status.get_or_insert_with(ByoClusterStatus::default)
    }
}
