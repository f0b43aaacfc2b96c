//! Reconciliation logic for the BYOH infrastructure kinds.
//!
//! - `byo_machine`: claims a ByoHost for a ByoMachine and wires it into the
//!   workload cluster
//! - `installer_config`: renders install/uninstall scripts into a Secret
//! - `byo_cluster`: cluster-level finalizer and readiness
//! - `byo_admission`: auto-approval of host CSRs
//! - `bootstrap_kubeconfig`: bootstrap token and kubeconfig for new hosts
//!
//! Every reconciler follows the same shape: fetch, mutate a copy, then
//! [`byoh_client::persist`] the copy whatever the outcome, so conditions set on
//! the way survive a failed pass.

pub mod bootstrap_kubeconfig;
pub mod byo_admission;
pub mod byo_cluster;
pub mod byo_machine;
pub mod installer_config;

#[cfg(test)]
mod installer_config_test;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use byoh_client::{EventPublisher, ObjectStore, WorkloadClusterClient};
use crds::constants::{CLUSTER_API_GROUP, PAUSED_ANNOTATION};
use crds::{BootstrapKubeconfig, ByoCluster, ByoHost, ByoMachine, Cluster, K8sInstallerConfig, K8sInstallerConfigTemplate, Machine};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;
use tracing::warn;

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::default(),
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Stores and clients the reconcilers work against.
pub struct ObjectStores {
    pub byo_hosts: Arc<dyn ObjectStore<ByoHost>>,
    pub byo_machines: Arc<dyn ObjectStore<ByoMachine>>,
    pub byo_clusters: Arc<dyn ObjectStore<ByoCluster>>,
    pub installer_configs: Arc<dyn ObjectStore<K8sInstallerConfig>>,
    pub installer_config_templates: Arc<dyn ObjectStore<K8sInstallerConfigTemplate>>,
    pub machines: Arc<dyn ObjectStore<Machine>>,
    pub clusters: Arc<dyn ObjectStore<Cluster>>,
    pub secrets: Arc<dyn ObjectStore<Secret>>,
    pub bootstrap_kubeconfigs: Arc<dyn ObjectStore<BootstrapKubeconfig>>,
    pub workload: Arc<dyn WorkloadClusterClient>,
    pub events: Arc<dyn EventPublisher>,
}

/// Reconciles ByoMachines, K8sInstallerConfigs, ByoClusters and BootstrapKubeconfigs.
pub struct Reconciler {
    pub(crate) byo_hosts: Arc<dyn ObjectStore<ByoHost>>,
    pub(crate) byo_machines: Arc<dyn ObjectStore<ByoMachine>>,
    pub(crate) byo_clusters: Arc<dyn ObjectStore<ByoCluster>>,
    pub(crate) installer_configs: Arc<dyn ObjectStore<K8sInstallerConfig>>,
    pub(crate) installer_config_templates: Arc<dyn ObjectStore<K8sInstallerConfigTemplate>>,
    pub(crate) machines: Arc<dyn ObjectStore<Machine>>,
    pub(crate) clusters: Arc<dyn ObjectStore<Cluster>>,
    pub(crate) secrets: Arc<dyn ObjectStore<Secret>>,
    pub(crate) bootstrap_kubeconfigs: Arc<dyn ObjectStore<BootstrapKubeconfig>>,
    pub(crate) workload: Arc<dyn WorkloadClusterClient>,
    pub(crate) events: Arc<dyn EventPublisher>,
    /// Error count tracking per resource (kind/namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(stores: ObjectStores) -> Self {
        let ObjectStores {
            byo_hosts,
            byo_machines,
            byo_clusters,
            installer_configs,
            installer_config_templates,
            machines,
            clusters,
            secrets,
            bootstrap_kubeconfigs,
            workload,
            events,
        } = stores;
        Self {
            byo_hosts,
            byo_machines,
            byo_clusters,
            installer_configs,
            installer_config_templates,
            machines,
            clusters,
            secrets,
            bootstrap_kubeconfigs,
            workload,
            events,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the Fibonacci backoff duration for a resource based on its error count
    ///
    /// Returns (backoff_seconds, error_count)
    pub fn get_backoff_for_resource(&self, resource_key: &str) -> (u64, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states.entry(resource_key.to_string()).or_insert_with(BackoffState::new);
                let backoff_seconds = state.backoff.next_backoff_seconds();
                (backoff_seconds, state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (60, 0)
            }
        }
    }

    /// Increment error count for a resource
    pub fn increment_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.entry(resource_key.to_string()).or_insert_with(BackoffState::new).increment_error();
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}

/// Owner reference of the given kind whose apiVersion is in `group`.
pub(crate) fn owner_of_kind<'a>(meta: &'a ObjectMeta, kind: &str, group: &str) -> Option<&'a OwnerReference> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|o| o.kind == kind && api_group(&o.api_version) == group)
}

/// Group part of an apiVersion; empty for the core group.
pub(crate) fn api_group(api_version: &str) -> &str {
    match api_version.split_once('/') {
        Some((group, _)) => group,
        None => "",
    }
}

/// True when the Cluster is paused or the object carries the paused annotation.
pub(crate) fn is_paused<K: ResourceExt>(cluster: &Cluster, obj: &K) -> bool {
    cluster.spec.paused || obj.annotations().contains_key(PAUSED_ANNOTATION)
}

/// Owning Cluster API Cluster, by owner reference.
pub(crate) fn owner_cluster(meta: &ObjectMeta) -> Option<&OwnerReference> {
    owner_of_kind(meta, "Cluster", CLUSTER_API_GROUP)
}

/// Adds `finalizer` when missing.
pub(crate) fn add_finalizer(meta: &mut ObjectMeta, finalizer: &str) {
    let finalizers = meta.finalizers.get_or_insert_with(Vec::new);
    if !finalizers.iter().any(|f| f == finalizer) {
        finalizers.push(finalizer.to_string());
    }
}

pub(crate) fn remove_finalizer(meta: &mut ObjectMeta, finalizer: &str) {
    if let Some(finalizers) = meta.finalizers.as_mut() {
        finalizers.retain(|f| f != finalizer);
    }
}

/// Folds the reconcile outcome and the write-back outcome: the reconcile error
/// wins, the write error is reported when the pass itself succeeded.
pub(crate) fn merge_results<T, W>(
    kind: &str,
    key: &str,
    result: Result<T, ControllerError>,
    written: Result<W, byoh_client::StoreError>,
) -> Result<T, ControllerError> {
    match (result, written) {
        (Err(e), Err(write_err)) => {
            tracing::error!("Failed to persist {} {}: {}", kind, key, write_err);
            Err(e)
        }
        (Err(e), Ok(_)) => Err(e),
        (Ok(_), Err(write_err)) => Err(write_err.into()),
        (Ok(action), Ok(_)) => Ok(action),
    }
}
