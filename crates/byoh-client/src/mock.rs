//! In-memory store, workload cluster and event sink for unit testing
//!
//! These mocks honour the same contract as the kube-backed implementations:
//! resourceVersion checks on writes, status kept apart from spec, and deletion
//! held back by finalizers.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use k8s_openapi::api::core::v1::ObjectReference;
use kube::Resource;
use kube::runtime::events::EventType;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::StoreError;
use crate::events::EventPublisher;
use crate::selector::Selector;
use crate::store_trait::{ObjectStore, WorkloadClusterClient};

type Key = (String, String);
type ListHook<K> = Box<dyn FnOnce(&MockStore<K>) + Send>;

/// Mock [`ObjectStore`] for one kind
///
/// Objects are kept in (namespace, name) order so list results are stable.
#[derive(Clone)]
pub struct MockStore<K> {
    objects: Arc<Mutex<BTreeMap<Key, K>>>,
    next_rv: Arc<Mutex<u64>>,
    list_error: Arc<Mutex<Option<String>>>,
    after_list: Arc<Mutex<Option<ListHook<K>>>>,
}

impl<K> std::fmt::Debug for MockStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStore").finish_non_exhaustive()
    }
}

impl<K> Default for MockStore<K> {
    fn default() -> Self {
        Self {
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            next_rv: Arc::new(Mutex::new(1)),
            list_error: Arc::new(Mutex::new(None)),
            after_list: Arc::new(Mutex::new(None)),
        }
    }
}

impl<K> MockStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `obj` as-is, status included (for test setup). Returns the stored copy.
    pub fn insert(&self, mut obj: K) -> K {
        obj.meta_mut().resource_version = Some(self.bump());
        if obj.meta().uid.is_none() {
            obj.meta_mut().uid = Some(format!("uid-{}", obj.meta().name.clone().unwrap_or_default()));
        }
        self.lock().insert(key_of(&obj), obj.clone());
        obj
    }

    /// Current stored copy, bypassing the async API.
    pub fn snapshot(&self, namespace: &str, name: &str) -> Option<K> {
        self.lock().get(&(namespace.to_string(), name.to_string())).cloned()
    }

    pub fn all(&self) -> Vec<K> {
        self.lock().values().cloned().collect()
    }

    /// Makes every following `list` fail with the given message.
    pub fn fail_list(&self, message: impl Into<String>) {
        *self.list_error.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(message.into());
    }

    /// Runs `hook` once, right after the next `list` took its snapshot, so the
    /// caller goes on with copies that are already stale.
    pub fn after_next_list(&self, hook: impl FnOnce(&MockStore<K>) + Send + 'static) {
        *self.after_list.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Box::new(hook));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<Key, K>> {
        self.objects.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn bump(&self) -> String {
        let mut rv = self.next_rv.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let out = rv.to_string();
        *rv += 1;
        out
    }

    fn not_found(name: &str) -> StoreError {
        StoreError::NotFound {
            resource: K::plural(&()).to_string(),
            name: name.to_string(),
        }
    }

    fn check_version(stored: &K, incoming: &K) -> Result<(), StoreError> {
        match &incoming.meta().resource_version {
            Some(rv) if Some(rv) != stored.meta().resource_version.as_ref() => Err(StoreError::Conflict(format!(
                "the object {} has been modified; please apply your changes to the latest version and try again",
                incoming.meta().name.clone().unwrap_or_default()
            ))),
            _ => Ok(()),
        }
    }
}

fn key_of<K: Resource>(obj: &K) -> Key {
    (
        obj.meta().namespace.clone().unwrap_or_default(),
        obj.meta().name.clone().unwrap_or_default(),
    )
}

fn with_status<K: Serialize + DeserializeOwned>(body: &K, status_from: &K) -> Result<K, StoreError> {
    let mut out = serde_json::to_value(body)?;
    let status = serde_json::to_value(status_from)?.get("status").cloned();
    if let Some(map) = out.as_object_mut() {
        match status {
            Some(s) => map.insert("status".to_string(), s),
            None => map.remove("status"),
        };
    }
    Ok(serde_json::from_value(out)?)
}

fn is_gone<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some() && obj.meta().finalizers.as_ref().is_none_or(Vec::is_empty)
}

#[async_trait::async_trait]
impl<K> ObjectStore<K> for MockStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        self.snapshot(namespace, name).ok_or_else(|| Self::not_found(name))
    }

    async fn list(&self, namespace: Option<&str>, selector: &Selector) -> Result<Vec<K>, StoreError> {
        if let Some(msg) = self.list_error.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone() {
            return Err(StoreError::InvalidRequest(msg));
        }
        let empty = BTreeMap::new();
        let items: Vec<K> = self
            .lock()
            .iter()
            .filter(|((ns, _), _)| namespace.is_none_or(|want| want == ns))
            .filter(|(_, obj)| selector.matches(obj.meta().labels.as_ref().unwrap_or(&empty)))
            .map(|(_, obj)| obj.clone())
            .collect();

        let hook = self.after_list.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        if let Some(hook) = hook {
            hook(self);
        }
        Ok(items)
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let key = key_of(obj);
        if self.lock().contains_key(&key) {
            return Err(StoreError::AlreadyExists(format!("{} \"{}\" already exists", K::plural(&()), key.1)));
        }
        let mut obj = obj.clone();
        obj.meta_mut().resource_version = None;
        Ok(self.insert(obj))
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let key = key_of(obj);
        let stored = self.snapshot(&key.0, &key.1).ok_or_else(|| Self::not_found(&key.1))?;
        Self::check_version(&stored, obj)?;

        let mut next = with_status(obj, &stored)?;
        next.meta_mut().deletion_timestamp = stored.meta().deletion_timestamp.clone();
        next.meta_mut().resource_version = Some(self.bump());
        if is_gone(&next) {
            self.lock().remove(&key);
        } else {
            self.lock().insert(key, next.clone());
        }
        Ok(next)
    }

    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        let key = key_of(obj);
        let stored = self.snapshot(&key.0, &key.1).ok_or_else(|| Self::not_found(&key.1))?;
        Self::check_version(&stored, obj)?;

        let mut next = with_status(&stored, obj)?;
        next.meta_mut().resource_version = Some(self.bump());
        self.lock().insert(key, next.clone());
        Ok(next)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let stored = self.snapshot(namespace, name).ok_or_else(|| Self::not_found(name))?;
        if stored.meta().finalizers.as_ref().is_none_or(Vec::is_empty) {
            self.lock().remove(&(namespace.to_string(), name.to_string()));
            return Ok(());
        }
        if stored.meta().deletion_timestamp.is_none() {
            // Time's backing type is private to k8s-openapi; go through its wire form.
            let mut value = serde_json::to_value(&stored)?;
            if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
                meta.insert("deletionTimestamp".to_string(), Value::String("2026-01-01T00:00:00Z".to_string()));
            }
            let mut next: K = serde_json::from_value(value)?;
            next.meta_mut().resource_version = Some(self.bump());
            self.lock().insert((namespace.to_string(), name.to_string()), next);
        }
        Ok(())
    }
}

/// Mock [`WorkloadClusterClient`]: Nodes keyed by name with an optional provider id
#[derive(Clone, Debug, Default)]
pub struct MockWorkloadCluster {
    nodes: Arc<Mutex<HashMap<String, Option<String>>>>,
    patches: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockWorkloadCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, name: &str, provider_id: Option<&str>) {
        self.nodes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(name.to_string(), provider_id.map(str::to_string));
    }

    pub fn provider_id(&self, name: &str) -> Option<String> {
        self.nodes.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(name).cloned().flatten()
    }

    /// (node, provider id) pairs written so far
    pub fn patches(&self) -> Vec<(String, String)> {
        self.patches.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }
}

#[async_trait::async_trait]
impl WorkloadClusterClient for MockWorkloadCluster {
    async fn get_node_provider_id(
        &self,
        _cluster_namespace: &str,
        _cluster_name: &str,
        node_name: &str,
    ) -> Result<Option<String>, StoreError> {
        self.nodes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(node_name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                resource: "nodes".to_string(),
                name: node_name.to_string(),
            })
    }

    async fn set_node_provider_id(
        &self,
        _cluster_namespace: &str,
        _cluster_name: &str,
        node_name: &str,
        provider_id: &str,
    ) -> Result<(), StoreError> {
        let mut nodes = self.nodes.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let node = nodes.get_mut(node_name).ok_or_else(|| StoreError::NotFound {
            resource: "nodes".to_string(),
            name: node_name.to_string(),
        })?;
        *node = Some(provider_id.to_string());
        self.patches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((node_name.to_string(), provider_id.to_string()));
        Ok(())
    }
}

/// Event sink that keeps every event as `"<Type> <Reason> <note>"`
#[derive(Clone, Debug, Default)]
pub struct RecordingEventPublisher {
    events: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events in publish order.
    pub fn events(&self) -> Vec<String> {
        self.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    /// Events published on the object with the given name.
    pub fn events_for(&self, name: &str) -> Vec<String> {
        self.lock().iter().filter(|(n, _)| n == name).map(|(_, e)| e.clone()).collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, String)>> {
        self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(&self, resource_ref: &ObjectReference, type_: EventType, reason: &str, note: Option<String>) {
        let type_ = match type_ {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        };
        let line = format!("{} {} {}", type_, reason, note.unwrap_or_default());
        self.lock().push((resource_ref.name.clone().unwrap_or_default(), line));
    }
}
