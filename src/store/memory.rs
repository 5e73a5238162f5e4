//! In-process object store.
//!
//! Keeps objects as JSON values keyed by kind and [`ObjectKey`], assigns
//! resource versions on every write and rejects stale updates the way an
//! API server does. Every store call is recorded so tests can assert which
//! writes a reconciliation pass issued.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{Managed, ObjectKey, ObjectStore, kind_of};
use crate::controller::error::{Error, Result};

/// A call issued against a [`MemoryStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreCall {
    Get { kind: String, key: ObjectKey },
    Create { kind: String, key: ObjectKey },
    Update { kind: String, key: ObjectKey },
    Delete { kind: String, key: ObjectKey },
    UpdateStatus { kind: String, key: ObjectKey },
}

impl StoreCall {
    pub fn kind(&self) -> &str {
        match self {
            StoreCall::Get { kind, .. }
            | StoreCall::Create { kind, .. }
            | StoreCall::Update { kind, .. }
            | StoreCall::Delete { kind, .. }
            | StoreCall::UpdateStatus { kind, .. } => kind,
        }
    }

    /// True for every call except `Get`.
    pub fn is_write(&self) -> bool {
        !matches!(self, StoreCall::Get { .. })
    }
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<(String, ObjectKey), Value>,
    calls: Vec<StoreCall>,
    version: u64,
    conflicts: BTreeSet<String>,
    vanishing: BTreeSet<String>,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn take_conflict(&mut self, kind: &str, key: &ObjectKey) -> Result<()> {
        if self.conflicts.remove(kind) {
            return Err(Error::Conflict(format!("injected conflict on {kind} {key}")));
        }
        Ok(())
    }
}

/// Object store kept in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn resource_version(value: &Value) -> Option<&str> {
    value
        .get("metadata")
        .and_then(|m| m.get("resourceVersion"))
        .and_then(Value::as_str)
}

fn check_version(kind: &str, key: &ObjectKey, stored: &Value, incoming: &Value) -> Result<()> {
    match resource_version(incoming) {
        Some(v) if Some(v) != resource_version(stored) => Err(Error::Conflict(format!(
            "{kind} {key} has been modified; stale resourceVersion {v}"
        ))),
        _ => Ok(()),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without recording a call.
    pub fn insert<K: Managed>(&self, obj: K) -> Result<K> {
        let key = ObjectKey::of(&obj);
        let mut value = serde_json::to_value(&obj)?;
        let mut inner = self.inner.lock();
        let version = inner.next_version();
        value["metadata"]["resourceVersion"] = Value::String(version);
        if value["metadata"]["uid"].is_null() {
            value["metadata"]["uid"] = Value::String(uuid::Uuid::new_v4().to_string());
        }
        if value["metadata"]["generation"].is_null() {
            value["metadata"]["generation"] = Value::from(1);
        }
        inner.objects.insert((kind_of::<K>(), key), value.clone());
        Ok(serde_json::from_value(value)?)
    }

    /// Current stored version of an object, without recording a call.
    pub fn object<K: Managed>(&self, namespace: &str, name: &str) -> Option<K> {
        let inner = self.inner.lock();
        inner
            .objects
            .get(&(kind_of::<K>(), ObjectKey::new(namespace, name)))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Change a stored object out of band, as another writer would.
    pub fn modify<K: Managed>(
        &self,
        namespace: &str,
        name: &str,
        f: impl FnOnce(&mut K),
    ) -> Result<K> {
        let mut obj: K = self
            .object(namespace, name)
            .ok_or_else(|| Error::not_found(&kind_of::<K>(), namespace, name))?;
        f(&mut obj);
        let mut value = serde_json::to_value(&obj)?;
        let mut inner = self.inner.lock();
        let version = inner.next_version();
        value["metadata"]["resourceVersion"] = Value::String(version);
        inner
            .objects
            .insert((kind_of::<K>(), ObjectKey::new(namespace, name)), value.clone());
        Ok(serde_json::from_value(value)?)
    }

    /// Make the next update or status update of `K` fail with a conflict.
    pub fn inject_conflict<K: Managed>(&self) {
        self.inner.lock().conflicts.insert(kind_of::<K>());
    }

    /// Make the next delete of `K` find the object already removed by
    /// another writer.
    pub fn inject_concurrent_delete<K: Managed>(&self) {
        self.inner.lock().vanishing.insert(kind_of::<K>());
    }

    /// Every call recorded so far.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.inner.lock().calls.clone()
    }

    /// Recorded calls that wrote to the store.
    pub fn writes(&self) -> Vec<StoreCall> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| c.is_write())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// Number of stored objects of kind `K`.
    pub fn count<K: Managed>(&self) -> usize {
        let kind = kind_of::<K>();
        self.inner
            .lock()
            .objects
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: Managed>(&self, key: &ObjectKey) -> Result<Option<K>> {
        let kind = kind_of::<K>();
        let value = {
            let mut inner = self.inner.lock();
            inner.calls.push(StoreCall::Get {
                kind: kind.clone(),
                key: key.clone(),
            });
            inner.objects.get(&(kind, key.clone())).cloned()
        };
        value
            .map(serde_json::from_value)
            .transpose()
            .map_err(Error::from)
    }

    async fn create<K: Managed>(&self, obj: &K) -> Result<K> {
        let kind = kind_of::<K>();
        let key = ObjectKey::of(obj);
        let mut value = serde_json::to_value(obj)?;
        {
            let mut inner = self.inner.lock();
            inner.calls.push(StoreCall::Create {
                kind: kind.clone(),
                key: key.clone(),
            });
            if inner.objects.contains_key(&(kind.clone(), key.clone())) {
                return Err(Error::Conflict(format!("{kind} {key} already exists")));
            }
            let version = inner.next_version();
            value["metadata"]["resourceVersion"] = Value::String(version);
            value["metadata"]["uid"] = Value::String(uuid::Uuid::new_v4().to_string());
            value["metadata"]["generation"] = Value::from(1);
            inner.objects.insert((kind, key), value.clone());
        }
        Ok(serde_json::from_value(value)?)
    }

    async fn update<K: Managed>(&self, obj: &K) -> Result<K> {
        let kind = kind_of::<K>();
        let key = ObjectKey::of(obj);
        let mut value = serde_json::to_value(obj)?;
        {
            let mut inner = self.inner.lock();
            inner.calls.push(StoreCall::Update {
                kind: kind.clone(),
                key: key.clone(),
            });
            inner.take_conflict(&kind, &key)?;
            let stored = inner
                .objects
                .get(&(kind.clone(), key.clone()))
                .cloned()
                .ok_or_else(|| Error::not_found(&kind, &key.namespace, &key.name))?;
            check_version(&kind, &key, &stored, &value)?;

            // status is owned by the status subresource
            match stored.get("status") {
                Some(status) => value["status"] = status.clone(),
                None => {
                    if let Some(map) = value.as_object_mut() {
                        map.remove("status");
                    }
                }
            }
            let generation = stored["metadata"]["generation"].as_i64().unwrap_or(1);
            let spec_changed = stored.get("spec") != value.get("spec");
            value["metadata"]["generation"] =
                Value::from(if spec_changed { generation + 1 } else { generation });
            value["metadata"]["uid"] = stored["metadata"]["uid"].clone();
            let version = inner.next_version();
            value["metadata"]["resourceVersion"] = Value::String(version);
            inner.objects.insert((kind, key), value.clone());
        }
        Ok(serde_json::from_value(value)?)
    }

    async fn delete<K: Managed>(&self, obj: &K) -> Result<()> {
        let kind = kind_of::<K>();
        let key = ObjectKey::of(obj);
        let mut inner = self.inner.lock();
        inner.calls.push(StoreCall::Delete {
            kind: kind.clone(),
            key: key.clone(),
        });
        let entry = (kind.clone(), key.clone());
        if inner.vanishing.remove(&kind) {
            inner.objects.remove(&entry);
        }
        let has_finalizers = match inner.objects.get(&entry) {
            None => return Err(Error::not_found(&kind, &key.namespace, &key.name)),
            Some(stored) => stored["metadata"]["finalizers"]
                .as_array()
                .is_some_and(|f| !f.is_empty()),
        };
        if has_finalizers {
            // finalizers keep the object around, marked as being deleted
            let version = inner.next_version();
            if let Some(stored) = inner.objects.get_mut(&entry) {
                stored["metadata"]["deletionTimestamp"] =
                    Value::String(jiff::Timestamp::now().to_string());
                stored["metadata"]["resourceVersion"] = Value::String(version);
            }
        } else {
            inner.objects.remove(&entry);
        }
        Ok(())
    }

    async fn update_status<K: Managed>(&self, obj: &K) -> Result<K> {
        let kind = kind_of::<K>();
        let key = ObjectKey::of(obj);
        let incoming = serde_json::to_value(obj)?;
        let mut inner = self.inner.lock();
        inner.calls.push(StoreCall::UpdateStatus {
            kind: kind.clone(),
            key: key.clone(),
        });
        inner.take_conflict(&kind, &key)?;
        let entry = (kind.clone(), key.clone());
        let mut stored = inner
            .objects
            .get(&entry)
            .cloned()
            .ok_or_else(|| Error::not_found(&kind, &key.namespace, &key.name))?;
        check_version(&kind, &key, &stored, &incoming)?;

        stored["status"] = incoming.get("status").cloned().unwrap_or(Value::Null);
        let version = inner.next_version();
        stored["metadata"]["resourceVersion"] = Value::String(version);
        inner.objects.insert(entry, stored.clone());
        drop(inner);
        Ok(serde_json::from_value(stored)?)
    }
}
