//! Kind-specific mutators.
//!
//! A mutator folds the fields the controller owns from the desired object
//! into the existing one and reports whether anything changed. Fields it
//! does not own are left as they are.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Container, PodSpec};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use std::collections::BTreeMap;

use crate::controller::error::{Error, Result};
use crate::crd::Limitador;
use crate::resources::common::LIMITS_CONFIG_FILE;
use crate::resources::configmap::{deserialize_limits, limits_payload};

/// Field-level Deployment mutator.
pub type DeploymentMutator = fn(&mut Deployment, &Deployment) -> Result<bool>;

/// Accept any existing object as is.
pub fn create_only<K>(_existing: &mut K, _desired: &K) -> Result<bool> {
    Ok(false)
}

/// Replace `existing` with `desired` when they differ.
fn merge<T: PartialEq + Clone>(existing: &mut T, desired: &T) -> bool {
    if existing == desired {
        return false;
    }
    *existing = desired.clone();
    true
}

/// Like [`merge`], treating a missing list as empty.
fn merge_list<T: PartialEq + Clone>(existing: &mut Option<Vec<T>>, desired: &Option<Vec<T>>) -> bool {
    if existing.as_deref().unwrap_or_default() == desired.as_deref().unwrap_or_default() {
        return false;
    }
    *existing = desired.clone();
    true
}

fn pod_spec(deployment: &Deployment) -> Option<&PodSpec> {
    deployment.spec.as_ref()?.template.spec.as_ref()
}

fn pod_spec_mut(deployment: &mut Deployment) -> &mut PodSpec {
    deployment
        .spec
        .get_or_insert_with(Default::default)
        .template
        .spec
        .get_or_insert_with(Default::default)
}

fn desired_container(desired: &Deployment) -> Result<&Container> {
    pod_spec(desired)
        .and_then(|p| p.containers.first())
        .ok_or_else(|| Error::Config("desired Deployment has no container".to_string()))
}

/// Apply `f` to the first container of both Deployments.
fn mutate_container(
    existing: &mut Deployment,
    desired: &Deployment,
    f: impl FnOnce(&mut Container, &Container) -> bool,
) -> Result<bool> {
    let want = desired_container(desired)?;
    match pod_spec_mut(existing).containers.first_mut() {
        Some(have) => Ok(f(have, want)),
        None => Ok(false),
    }
}

pub fn deployment_replicas(existing: &mut Deployment, desired: &Deployment) -> Result<bool> {
    let want = desired.spec.as_ref().and_then(|s| s.replicas);
    let spec = existing.spec.get_or_insert_with(Default::default);
    Ok(merge(&mut spec.replicas, &want))
}

/// The server runs in a single container; anything else is replaced.
pub fn deployment_container_list(existing: &mut Deployment, desired: &Deployment) -> Result<bool> {
    let want = pod_spec(desired)
        .map(|p| p.containers.clone())
        .unwrap_or_default();
    let pod = pod_spec_mut(existing);
    if pod.containers.len() == 1 {
        return Ok(false);
    }
    pod.containers = want;
    Ok(true)
}

pub fn deployment_image(existing: &mut Deployment, desired: &Deployment) -> Result<bool> {
    mutate_container(existing, desired, |have, want| merge(&mut have.image, &want.image))
}

pub fn deployment_command(existing: &mut Deployment, desired: &Deployment) -> Result<bool> {
    mutate_container(existing, desired, |have, want| {
        merge_list(&mut have.command, &want.command)
    })
}

pub fn deployment_affinity(existing: &mut Deployment, desired: &Deployment) -> Result<bool> {
    let want = pod_spec(desired).and_then(|p| p.affinity.clone());
    Ok(merge(&mut pod_spec_mut(existing).affinity, &want))
}

pub fn deployment_resources(existing: &mut Deployment, desired: &Deployment) -> Result<bool> {
    mutate_container(existing, desired, |have, want| {
        merge(&mut have.resources, &want.resources)
    })
}

pub fn deployment_volumes(existing: &mut Deployment, desired: &Deployment) -> Result<bool> {
    let want = pod_spec(desired).and_then(|p| p.volumes.clone());
    Ok(merge_list(&mut pod_spec_mut(existing).volumes, &want))
}

pub fn deployment_volume_mounts(existing: &mut Deployment, desired: &Deployment) -> Result<bool> {
    mutate_container(existing, desired, |have, want| {
        merge_list(&mut have.volume_mounts, &want.volume_mounts)
    })
}

pub fn deployment_env(existing: &mut Deployment, desired: &Deployment) -> Result<bool> {
    mutate_container(existing, desired, |have, want| merge_list(&mut have.env, &want.env))
}

/// Only the strategy type is compared; rollout parameters defaulted by the
/// API server are left alone unless the type changes.
pub fn deployment_strategy(existing: &mut Deployment, desired: &Deployment) -> Result<bool> {
    let want = desired.spec.as_ref().and_then(|s| s.strategy.clone());
    let spec = existing.spec.get_or_insert_with(Default::default);
    let have_type = spec.strategy.as_ref().and_then(|s| s.type_.as_deref());
    let want_type = want.as_ref().and_then(|s| s.type_.as_deref());
    if have_type == want_type {
        return Ok(false);
    }
    spec.strategy = want;
    Ok(true)
}

/// Field mutators for a Limitador Deployment, in application order.
///
/// Replicas are only enforced when the declaration sets them, so that an
/// external autoscaler keeps control otherwise.
pub fn deployment_mutators(resource: &Limitador) -> Vec<DeploymentMutator> {
    let mut mutators: Vec<DeploymentMutator> = Vec::with_capacity(10);
    if resource.spec.replicas.is_some() {
        mutators.push(deployment_replicas);
    }
    mutators.extend([
        deployment_container_list as DeploymentMutator,
        deployment_image,
        deployment_command,
        deployment_affinity,
        deployment_resources,
        deployment_volumes,
        deployment_volume_mounts,
        deployment_env,
        deployment_strategy,
    ]);
    mutators
}

/// Compose field mutators; every mutator runs and the result is changed
/// if any of them changed something.
pub fn compose(
    mutators: Vec<DeploymentMutator>,
) -> impl Fn(&mut Deployment, &Deployment) -> Result<bool> + Send + Sync {
    move |existing, desired| {
        let mut changed = false;
        for mutator in &mutators {
            changed |= mutator(existing, desired)?;
        }
        Ok(changed)
    }
}

pub fn pod_disruption_budget(
    existing: &mut PodDisruptionBudget,
    desired: &PodDisruptionBudget,
) -> Result<bool> {
    let want = desired.spec.clone().unwrap_or_default();
    let have = existing.spec.get_or_insert_with(Default::default);
    let mut changed = merge(&mut have.max_unavailable, &want.max_unavailable);
    changed |= merge(&mut have.min_available, &want.min_available);
    Ok(changed)
}

/// Compare the limits carried by both ConfigMaps, not their text.
///
/// An existing payload that does not parse is overwritten. The comparison
/// is order-sensitive: the same limits in another order count as a change.
pub fn limits_config_map(existing: &mut ConfigMap, desired: &ConfigMap) -> Result<bool> {
    let payload = limits_payload(desired).unwrap_or_default();
    let desired_limits = deserialize_limits(payload)?;
    let existing_limits = limits_payload(existing).and_then(|p| deserialize_limits(p).ok());

    if existing_limits.as_ref() == Some(&desired_limits) {
        return Ok(false);
    }
    existing
        .data
        .get_or_insert_with(BTreeMap::new)
        .insert(LIMITS_CONFIG_FILE.to_string(), payload.to_string());
    Ok(true)
}
