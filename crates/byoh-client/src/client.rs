//! Kubernetes-backed store implementations

use std::fmt::Debug;
use std::marker::PhantomData;

use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::{Node, Secret};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StoreError, from_kube};
use crate::selector::Selector;
use crate::store_trait::{ObjectStore, WorkloadClusterClient};

/// [`ObjectStore`] over the Kubernetes API for one namespaced kind.
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Debug for KubeStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    pub fn new(client: Client) -> Self {
        Self { client, _kind: PhantomData }
    }

    fn api(&self, namespace: Option<&str>) -> Api<K> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn namespaced_api(&self, obj: &K) -> Result<Api<K>, StoreError> {
        let ns = obj
            .namespace()
            .ok_or_else(|| StoreError::InvalidRequest(format!("{} {} has no namespace", K::kind(&()), obj.name_any())))?;
        Ok(Api::namespaced(self.client.clone(), &ns))
    }
}

#[async_trait::async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        self.api(Some(namespace))
            .get(name)
            .await
            .map_err(|e| from_kube(e, &K::plural(&()), name))
    }

    async fn list(&self, namespace: Option<&str>, selector: &Selector) -> Result<Vec<K>, StoreError> {
        let mut lp = ListParams::default();
        if !selector.is_empty() {
            lp = lp.labels(&selector.to_query());
        }
        let list = self.api(namespace).list(&lp).await?;
        Ok(list.items)
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let name = obj.name_any();
        debug!("Creating {} {}", K::kind(&()), name);
        self.namespaced_api(obj)?
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| from_kube(e, &K::plural(&()), &name))
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let name = obj.name_any();
        self.namespaced_api(obj)?
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| from_kube(e, &K::plural(&()), &name))
    }

    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        let name = obj.name_any();
        let body = serde_json::to_vec(obj)?;
        self.namespaced_api(obj)?
            .replace_status(&name, &PostParams::default(), body)
            .await
            .map_err(|e| from_kube(e, &K::plural(&()), &name))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.api(Some(namespace))
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| from_kube(e, &K::plural(&()), name))?;
        Ok(())
    }
}

/// Reaches workload clusters through the `<cluster>-kubeconfig` secret Cluster
/// API writes next to each Cluster.
#[derive(Clone)]
pub struct KubeWorkloadClusterClient {
    client: Client,
}

impl Debug for KubeWorkloadClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeWorkloadClusterClient").finish_non_exhaustive()
    }
}

impl KubeWorkloadClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn workload_client(&self, cluster_namespace: &str, cluster_name: &str) -> Result<Client, StoreError> {
        let secret_name = format!("{}-kubeconfig", cluster_name);
        let secret = Api::<Secret>::namespaced(self.client.clone(), cluster_namespace)
            .get(&secret_name)
            .await
            .map_err(|e| from_kube(e, "secrets", &secret_name))?;

        let raw = secret
            .data
            .as_ref()
            .and_then(|d| d.get("value"))
            .ok_or_else(|| StoreError::InvalidRequest(format!("secret {} has no value key", secret_name)))?;
        let yaml = std::str::from_utf8(&raw.0)
            .map_err(|e| StoreError::InvalidRequest(format!("kubeconfig in {} is not utf-8: {}", secret_name, e)))?;

        let kubeconfig = Kubeconfig::from_yaml(yaml)
            .map_err(|e| StoreError::InvalidRequest(format!("failed to parse kubeconfig {}: {}", secret_name, e)))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| StoreError::InvalidRequest(format!("failed to load kubeconfig {}: {}", secret_name, e)))?;
        Ok(Client::try_from(config)?)
    }
}

#[async_trait::async_trait]
impl WorkloadClusterClient for KubeWorkloadClusterClient {
    async fn get_node_provider_id(
        &self,
        cluster_namespace: &str,
        cluster_name: &str,
        node_name: &str,
    ) -> Result<Option<String>, StoreError> {
        let nodes: Api<Node> = Api::all(self.workload_client(cluster_namespace, cluster_name).await?);
        let node = nodes.get(node_name).await.map_err(|e| from_kube(e, "nodes", node_name))?;
        Ok(node.spec.and_then(|s| s.provider_id).filter(|p| !p.is_empty()))
    }

    async fn set_node_provider_id(
        &self,
        cluster_namespace: &str,
        cluster_name: &str,
        node_name: &str,
        provider_id: &str,
    ) -> Result<(), StoreError> {
        let nodes: Api<Node> = Api::all(self.workload_client(cluster_namespace, cluster_name).await?);
        let patch = serde_json::json!({ "spec": { "providerID": provider_id } });
        nodes
            .patch(node_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| from_kube(e, "nodes", node_name))?;
        Ok(())
    }
}
