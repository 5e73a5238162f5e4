//! Storage backend resolution.
//!
//! Derives the server command arguments, environment, volumes and update
//! strategy required by the storage backend a Limitador declares:
//! - **in-memory**: no arguments, rolling updates
//! - **disk**: counters on a PVC mounted into the pod, recreate updates
//! - **redis** / **redis-cached**: URL read from a Secret through an
//!   environment variable, never inlined in the command line

use k8s_openapi::api::apps::v1::DeploymentStrategy;
use k8s_openapi::api::core::v1::{
    EnvVar, EnvVarSource, PersistentVolumeClaimVolumeSource, SecretKeySelector, Volume,
    VolumeMount,
};
use kube::ResourceExt;

use crate::controller::error::{Error, Result};
use crate::crd::{DiskSpec, Limitador, RedisCachedOptions, SecretReference, StorageBackend};
use crate::resources::common::resource_name;
use crate::store::{ObjectKey, SecretStore};

/// Secret key holding the redis connection URL.
pub const REDIS_URL_KEY: &str = "URL";
/// Environment variable the redis URL is exposed through.
pub const REDIS_URL_ENV: &str = "LIMITADOR_OPERATOR_REDIS_URL";
/// Name of the volume backing disk storage.
pub const DISK_VOLUME_NAME: &str = "storage";
/// Mount path of the disk storage volume.
pub const DISK_PATH: &str = "/var/lib/limitador/data";

const RECREATE: &str = "Recreate";
const ROLLING_UPDATE: &str = "RollingUpdate";

/// Deployment settings derived from the storage backend.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeploymentStorageOptions {
    /// Storage arguments appended to the server command.
    pub command: Vec<String>,
    pub env: Vec<EnvVar>,
    pub volumes: Vec<Volume>,
    pub volume_mounts: Vec<VolumeMount>,
    pub strategy: DeploymentStrategy,
}

/// Resolve the storage options of a Limitador.
///
/// Redis backends look up the referenced Secret to check it carries a `URL`
/// key; a missing Secret surfaces as a not-found error.
pub async fn resolve<S>(secrets: &S, resource: &Limitador) -> Result<DeploymentStorageOptions>
where
    S: SecretStore + ?Sized,
{
    let namespace = resource.namespace().unwrap_or_default();
    match resource.storage_backend()? {
        StorageBackend::InMemory => Ok(in_memory_options()),
        StorageBackend::Disk(disk) => Ok(disk_options(resource, disk)),
        StorageBackend::Redis(redis) => {
            let secret_ref =
                check_redis_secret(secrets, &namespace, redis.config_secret_ref.as_ref()).await?;
            Ok(redis_options("redis", secret_ref, Vec::new()))
        }
        StorageBackend::RedisCached(cached) => {
            let secret_ref =
                check_redis_secret(secrets, &namespace, cached.config_secret_ref.as_ref()).await?;
            let flags = cached
                .options
                .as_ref()
                .map(redis_cached_flags)
                .unwrap_or_default();
            Ok(redis_options("redis_cached", secret_ref, flags))
        }
    }
}

pub fn in_memory_options() -> DeploymentStorageOptions {
    DeploymentStorageOptions {
        strategy: strategy(ROLLING_UPDATE),
        ..Default::default()
    }
}

pub fn disk_options(resource: &Limitador, disk: &DiskSpec) -> DeploymentStorageOptions {
    let mut command = vec!["disk".to_string()];
    if let Some(optimize) = &disk.optimize {
        command.push("--optimize".to_string());
        command.push(optimize.as_str().to_string());
    }
    command.push(DISK_PATH.to_string());

    DeploymentStorageOptions {
        command,
        env: Vec::new(),
        volumes: vec![Volume {
            name: DISK_VOLUME_NAME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: resource_name(resource),
                read_only: None,
            }),
            ..Default::default()
        }],
        volume_mounts: vec![VolumeMount {
            name: DISK_VOLUME_NAME.to_string(),
            mount_path: DISK_PATH.to_string(),
            ..Default::default()
        }],
        // two pods must never share the same counters file
        strategy: strategy(RECREATE),
    }
}

/// `--flag value` pairs for the redis-cached options that are set, in
/// fixed order.
pub fn redis_cached_flags(options: &RedisCachedOptions) -> Vec<String> {
    [
        ("--ttl", options.ttl),
        ("--ratio", options.ratio),
        ("--flush-period", options.flush_period),
        ("--max-cached", options.max_cached),
    ]
    .into_iter()
    .filter_map(|(flag, value)| value.map(|v| [flag.to_string(), v.to_string()]))
    .flatten()
    .collect()
}

fn redis_options(
    subcommand: &str,
    secret_ref: &SecretReference,
    flags: Vec<String>,
) -> DeploymentStorageOptions {
    let mut command = vec![subcommand.to_string(), format!("$({REDIS_URL_ENV})")];
    command.extend(flags);

    DeploymentStorageOptions {
        command,
        env: vec![redis_url_env(secret_ref)],
        strategy: strategy(ROLLING_UPDATE),
        ..Default::default()
    }
}

fn redis_url_env(secret_ref: &SecretReference) -> EnvVar {
    EnvVar {
        name: REDIS_URL_ENV.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret_ref.name.clone(),
                key: REDIS_URL_KEY.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

async fn check_redis_secret<'a, S>(
    secrets: &S,
    namespace: &str,
    secret_ref: Option<&'a SecretReference>,
) -> Result<&'a SecretReference>
where
    S: SecretStore + ?Sized,
{
    let secret_ref =
        secret_ref.ok_or_else(|| Error::Config("there's no ConfigSecretRef set".to_string()))?;

    let key = ObjectKey::new(
        secret_ref.namespace.as_deref().unwrap_or(namespace),
        secret_ref.name.as_str(),
    );
    let data = secrets.secret_data(&key).await?;
    if !data.contains_key(REDIS_URL_KEY) {
        return Err(Error::Config(
            "the storage config Secret doesn't have the `URL` field".to_string(),
        ));
    }
    Ok(secret_ref)
}

fn strategy(type_: &str) -> DeploymentStrategy {
    DeploymentStrategy {
        type_: Some(type_.to_string()),
        ..Default::default()
    }
}
