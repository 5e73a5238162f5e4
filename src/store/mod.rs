//! Object store abstraction.
//!
//! The reconciler never talks to the Kubernetes API directly. It goes
//! through [`ObjectStore`], which exposes the get/create/update/delete
//! primitives with optimistic concurrency and a distinguished not-found
//! condition. [`KubeStore`] backs it with a kube-rs client, [`MemoryStore`]
//! keeps objects in process for tests.

mod kube;
mod memory;

pub use self::kube::KubeStore;
pub use self::memory::{MemoryStore, StoreCall};

use std::collections::BTreeMap;
use std::fmt;

use ::kube::{Resource, ResourceExt};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::Secret;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::controller::error::{Error, Result};

/// Namespaced object kinds the store can handle.
pub trait Managed:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> Managed for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Namespace and name of an object.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an existing or desired object.
    pub fn of<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace().unwrap_or_default(),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Kind name of a managed type, e.g. `Deployment`.
pub fn kind_of<K: Managed>() -> String {
    K::kind(&()).into_owned()
}

/// Store primitives consumed by the reconciler.
///
/// `update` and `update_status` must reject writes carrying a stale
/// `resourceVersion` with a conflict; the caller retries the whole pass.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object; `Ok(None)` when it does not exist.
    async fn get<K: Managed>(&self, key: &ObjectKey) -> Result<Option<K>>;

    /// Create an object, returning the stored version.
    async fn create<K: Managed>(&self, obj: &K) -> Result<K>;

    /// Replace an object, returning the stored version.
    async fn update<K: Managed>(&self, obj: &K) -> Result<K>;

    /// Delete an object. Fails with a not-found error if it is already gone.
    async fn delete<K: Managed>(&self, obj: &K) -> Result<()>;

    /// Write the status subresource of an object.
    async fn update_status<K: Managed>(&self, obj: &K) -> Result<K>;
}

/// Secret lookup used by the redis storage backends.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Key/value payload of a Secret. Fails with a not-found error if the
    /// Secret does not exist.
    async fn secret_data(&self, key: &ObjectKey) -> Result<BTreeMap<String, Vec<u8>>>;
}

#[async_trait]
impl<S: ObjectStore + ?Sized> SecretStore for S {
    async fn secret_data(&self, key: &ObjectKey) -> Result<BTreeMap<String, Vec<u8>>> {
        let secret: Secret = self
            .get(key)
            .await?
            .ok_or_else(|| Error::not_found("Secret", &key.namespace, &key.name))?;

        let mut data: BTreeMap<String, Vec<u8>> = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect();
        // stringData is write-only on a real API server but may be present
        // on objects that never round-tripped through one
        for (k, v) in secret.string_data.unwrap_or_default() {
            data.entry(k).or_insert_with(|| v.into_bytes());
        }
        Ok(data)
    }
}
