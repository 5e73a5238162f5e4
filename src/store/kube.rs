//! kube-rs backed object store.

use async_trait::async_trait;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use tracing::debug;

use super::{Managed, ObjectKey, ObjectStore, kind_of};
use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};

/// Object store talking to the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: Managed>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            dry_run: false,
            field_manager: Some(FIELD_MANAGER.to_string()),
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: Managed>(&self, key: &ObjectKey) -> Result<Option<K>> {
        Ok(self.api::<K>(&key.namespace).get_opt(&key.name).await?)
    }

    async fn create<K: Managed>(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        debug!(kind = %kind_of::<K>(), object = %key, "Creating object");
        Ok(self
            .api::<K>(&key.namespace)
            .create(&Self::post_params(), obj)
            .await?)
    }

    async fn update<K: Managed>(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        debug!(kind = %kind_of::<K>(), object = %key, "Updating object");
        Ok(self
            .api::<K>(&key.namespace)
            .replace(&key.name, &Self::post_params(), obj)
            .await?)
    }

    async fn delete<K: Managed>(&self, obj: &K) -> Result<()> {
        let key = ObjectKey::of(obj);
        debug!(kind = %kind_of::<K>(), object = %key, "Deleting object");
        match self
            .api::<K>(&key.namespace)
            .delete(&key.name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Err(Error::not_found(
                &kind_of::<K>(),
                &key.namespace,
                &key.name,
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_status<K: Managed>(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        // resourceVersion in a merge patch makes the server reject stale writes
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": obj.meta().resource_version,
            },
            "status": status,
        });

        Ok(self
            .api::<K>(&key.namespace)
            .patch_status(
                &key.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?)
    }
}
