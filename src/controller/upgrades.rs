//! Migration from the limits ConfigMap layout used before 0.7.0.
//!
//! Older releases mounted the limits from `limits-config-<name>`. Once the
//! Deployment has rolled out with the current ConfigMap the legacy one is
//! removed. Both steps are no-ops when no legacy ConfigMap exists.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use tracing::info;

use crate::controller::error::Result;
use crate::controller::reconciler::PassContext;
use crate::crd::Limitador;
use crate::resources::common::{legacy_limits_config_map_name, resource_name};
use crate::store::{ObjectKey, ObjectStore};

fn legacy_key(resource: &Limitador) -> ObjectKey {
    ObjectKey::new(
        resource.namespace().unwrap_or_default(),
        legacy_limits_config_map_name(resource),
    )
}

/// Whether the Deployment still mounts a ConfigMap named `name`.
pub fn mounts_config_map(deployment: &Deployment, name: &str) -> bool {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.volumes.as_ref())
        .is_some_and(|volumes| {
            volumes
                .iter()
                .filter_map(|v| v.config_map.as_ref())
                .any(|cm| cm.name == name)
        })
}

/// Whether the latest Deployment template has been fully rolled out.
pub fn rollout_complete(deployment: &Deployment) -> bool {
    let generation = deployment.metadata.generation.unwrap_or_default();
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };
    status.observed_generation.unwrap_or_default() >= generation
        && status.updated_replicas.unwrap_or_default() >= desired
}

/// Returns `true` (requeue) while a legacy ConfigMap exists and the
/// Deployment has not moved off it.
pub async fn upgrade_deployment_to_v070<S>(
    store: &S,
    pass: &PassContext,
    resource: &Limitador,
) -> Result<bool>
where
    S: ObjectStore + ?Sized,
{
    let legacy_key = legacy_key(resource);
    let legacy: Option<ConfigMap> = store.get(&legacy_key).await?;
    if legacy.is_none() {
        return Ok(false);
    }

    let deployment_key = ObjectKey::new(legacy_key.namespace.clone(), resource_name(resource));
    let Some(deployment) = store.get::<Deployment>(&deployment_key).await? else {
        return Ok(true);
    };

    if mounts_config_map(&deployment, &legacy_key.name) || !rollout_complete(&deployment) {
        info!(
            correlation_id = %pass.correlation_id,
            deployment = %deployment_key,
            "Waiting for Deployment to roll out off the legacy limits ConfigMap"
        );
        return Ok(true);
    }
    Ok(false)
}

/// Delete the legacy limits ConfigMap, if any.
pub async fn upgrade_config_map_to_v070<S>(
    store: &S,
    pass: &PassContext,
    resource: &Limitador,
) -> Result<()>
where
    S: ObjectStore + ?Sized,
{
    let key = legacy_key(resource);
    let Some(legacy) = store.get::<ConfigMap>(&key).await? else {
        return Ok(());
    };
    if legacy.metadata.deletion_timestamp.is_some() {
        return Ok(());
    }

    match store.delete(&legacy).await {
        Ok(()) => {
            info!(correlation_id = %pass.correlation_id, config_map = %key, "Deleted legacy limits ConfigMap");
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}
