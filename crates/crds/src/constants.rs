//! Labels, annotations and finalizers
//!
//! These strings are the wire contract between the machine controller,
//! the installer-config controller and the host agent. They must not change.

/// API group of every infrastructure kind in this crate
pub const INFRASTRUCTURE_GROUP: &str = "infrastructure.cluster.x-k8s.io";

/// apiVersion of every infrastructure kind in this crate
pub const INFRASTRUCTURE_API_VERSION: &str = "infrastructure.cluster.x-k8s.io/v1beta1";

/// API group of the Cluster API core kinds (Cluster, Machine)
pub const CLUSTER_API_GROUP: &str = "cluster.x-k8s.io";

/// Label carrying the owning cluster name
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Empty-valued marker annotation set on paused objects
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

/// Label on a ByoHost naming the attached ByoMachine as `namespace.name`
pub const ATTACHED_BYO_MACHINE_LABEL: &str = "byoh.infrastructure.cluster.x-k8s.io/byomachine-name";

/// Empty-valued marker annotation asking the host agent to reset the host
pub const HOST_CLEANUP_ANNOTATION: &str = "byoh.infrastructure.cluster.x-k8s.io/clean";

/// Control plane endpoint the host joins
pub const END_POINT_IP_ANNOTATION: &str = "byoh.infrastructure.cluster.x-k8s.io/endpointip";

/// Kubernetes version (without build metadata) to install
pub const K8S_VERSION_ANNOTATION: &str = "byoh.infrastructure.cluster.x-k8s.io/k8sversion";

/// Base registry used to look up installation bundles
pub const BUNDLE_LOOKUP_BASE_REGISTRY_ANNOTATION: &str =
    "byoh.infrastructure.cluster.x-k8s.io/bundle-registry";

/// Finalizer held by a ByoMachine until its host is released
pub const MACHINE_FINALIZER: &str = "byomachine.infrastructure.cluster.x-k8s.io";

/// Finalizer held by a ByoCluster until its machines are gone
pub const CLUSTER_FINALIZER: &str = "byocluster.infrastructure.cluster.x-k8s.io";

/// Finalizer held by a K8sInstallerConfig
pub const K8S_INSTALLER_CONFIG_FINALIZER: &str = "k8sinstallerconfig.infrastructure.cluster.x-k8s.io";

/// Secret type used for generated installation secrets
pub const CLUSTER_SECRET_TYPE: &str = "cluster.x-k8s.io/secret";

/// Prefix of every provider id written onto workload Nodes
pub const PROVIDER_ID_PREFIX: &str = "byoh://";

/// Builds the value of [`ATTACHED_BYO_MACHINE_LABEL`] for a machine.
#[must_use]
pub fn attached_machine_label_value(namespace: &str, name: &str) -> String {
    format!("{}.{}", namespace, name)
}

/// Strips build metadata (`+...`) from a Kubernetes version string.
#[must_use]
pub fn k8s_version_without_metadata(version: &str) -> &str {
    version.split('+').next().unwrap_or(version)
}
