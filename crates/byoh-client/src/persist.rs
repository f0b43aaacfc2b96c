//! Write-back of reconciled objects
//!
//! Reconcilers mutate a copy of the object they fetched and hand both copies to
//! [`persist`], which writes only the parts that changed: metadata and spec
//! through `update`, then status through `update_status`.
//!
//! [`persist_rebased`] is for writers that must not lose their changes to a
//! concurrent update, such as the host agent recording which scripts already
//! ran: on Conflict it replays the changes onto the latest stored copy.

use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::StoreError;
use crate::store_trait::ObjectStore;

/// Writes attempted by [`persist_rebased`] before a Conflict is returned.
pub const REBASE_ATTEMPTS: usize = 5;

/// Persists the difference between `original` and `desired`.
///
/// Returns the latest stored copy. When the update removed the last finalizer of
/// an object being deleted the status write is skipped, since the object is gone.
pub async fn persist<K>(store: &dyn ObjectStore<K>, original: &K, desired: &K) -> Result<K, StoreError>
where
    K: Resource + Serialize + Clone + Send + Sync + 'static,
{
    let (orig_body, orig_status) = split(original)?;
    let (want_body, want_status) = split(desired)?;

    let mut current = desired.clone();
    if orig_body != want_body {
        current = store.update(desired).await?;
        let meta = current.meta();
        if meta.deletion_timestamp.is_some() && meta.finalizers.as_ref().is_none_or(Vec::is_empty) {
            return Ok(current);
        }
    }

    if orig_status != want_status {
        let mut status_obj = desired.clone();
        status_obj.meta_mut().resource_version = current.meta().resource_version.clone();
        current = store.update_status(&status_obj).await?;
    }
    Ok(current)
}

/// Persists the difference between `original` and `desired`, rebasing it onto
/// the latest stored copy whenever a write conflicts.
///
/// The difference is taken once, as a JSON merge patch from `original` to
/// `desired`, and applied to each freshly read copy. Fields the patch does not
/// touch keep whatever the concurrent writer stored.
pub async fn persist_rebased<K>(store: &dyn ObjectStore<K>, original: &K, desired: &K) -> Result<K, StoreError>
where
    K: Resource + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let changes = merge_diff(&serde_json::to_value(original)?, &serde_json::to_value(desired)?);
    let namespace = original.meta().namespace.clone().unwrap_or_default();
    let name = original.meta().name.clone().unwrap_or_default();

    let mut base = original.clone();
    let mut want = desired.clone();
    let mut attempt = 1;
    loop {
        match persist(store, &base, &want).await {
            Err(e) if e.is_conflict() && attempt < REBASE_ATTEMPTS => {
                debug!("Rebasing write of {}/{} after conflict (attempt {}): {}", namespace, name, attempt, e);
                base = store.get(&namespace, &name).await?;
                let mut rebased = serde_json::to_value(&base)?;
                apply_merge(&mut rebased, &changes);
                want = serde_json::from_value(rebased)?;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// JSON merge patch (RFC 7386) turning `from` into `to`. Removed keys map to
/// `null`; arrays are replaced whole.
pub fn merge_diff(from: &Value, to: &Value) -> Value {
    match (from, to) {
        (Value::Object(from), Value::Object(to)) => {
            let mut patch = Map::new();
            for (key, to_value) in to {
                match from.get(key) {
                    Some(from_value) if from_value == to_value => {}
                    Some(from_value) if from_value.is_object() && to_value.is_object() => {
                        patch.insert(key.clone(), merge_diff(from_value, to_value));
                    }
                    _ => {
                        patch.insert(key.clone(), to_value.clone());
                    }
                }
            }
            for key in from.keys().filter(|k| !to.contains_key(*k)) {
                patch.insert(key.clone(), Value::Null);
            }
            Value::Object(patch)
        }
        _ => to.clone(),
    }
}

/// Applies a JSON merge patch produced by [`merge_diff`].
pub fn apply_merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                apply_merge(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn split<K: Serialize>(obj: &K) -> Result<(Value, Value), StoreError> {
    let mut body = serde_json::to_value(obj)?;
    let status = body.as_object_mut().and_then(|o| o.remove("status")).unwrap_or(Value::Null);
    Ok((body, status))
}
