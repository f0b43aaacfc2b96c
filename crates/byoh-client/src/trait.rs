//! Store traits for mocking
//!
//! Controllers only talk to the cluster through these traits. The kube-backed
//! implementations live in `client.rs`; tests use the in-memory ones in `mock.rs`.

use crate::error::StoreError;
use crate::selector::Selector;

/// Typed access to one namespaced kind in the object store.
///
/// `update` and `update_status` carry the object's resourceVersion and fail
/// with [`StoreError::Conflict`] when it is stale.
#[async_trait::async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<K, StoreError>;

    /// Lists objects in `namespace` (all namespaces when `None`) matching `selector`.
    async fn list(&self, namespace: Option<&str>, selector: &Selector) -> Result<Vec<K>, StoreError>;

    async fn create(&self, obj: &K) -> Result<K, StoreError>;

    /// Replaces metadata and spec; the status is left untouched.
    async fn update(&self, obj: &K) -> Result<K, StoreError>;

    /// Replaces the status subresource only.
    async fn update_status(&self, obj: &K) -> Result<K, StoreError>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// Like [`ObjectStore::get`] but maps NotFound to `None`.
    async fn get_opt(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        match self.get(namespace, name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Node access inside a workload cluster, addressed by its owning Cluster.
#[async_trait::async_trait]
pub trait WorkloadClusterClient: Send + Sync {
    /// Returns the Node's `spec.providerID` (`None` when unset).
    /// A missing Node is [`StoreError::NotFound`].
    async fn get_node_provider_id(
        &self,
        cluster_namespace: &str,
        cluster_name: &str,
        node_name: &str,
    ) -> Result<Option<String>, StoreError>;

    async fn set_node_provider_id(
        &self,
        cluster_namespace: &str,
        cluster_name: &str,
        node_name: &str,
        provider_id: &str,
    ) -> Result<(), StoreError>;
}
