//! Deployment generation for Limitador.
//!
//! A single `limitador` container running `limitador-server` with the
//! limits file mounted from the limits ConfigMap and the storage options
//! resolved for the declared backend.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, HTTPGetAction, KeyToPath, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

use crate::crd::{DEFAULT_REPLICAS, Limitador, Telemetry};
use crate::resources::common::{
    LIMITS_CONFIG_DIR, LIMITS_CONFIG_FILE, child_metadata, limits_config_map_name,
    limits_config_path, non_empty, resource_name, standard_labels,
};
use crate::resources::storage::DeploymentStorageOptions;

/// Name of the server container.
pub const CONTAINER_NAME: &str = "limitador";
/// Name of the volume carrying the limits file.
pub const CONFIG_VOLUME_NAME: &str = "config-file";

const SERVER_BINARY: &str = "limitador-server";
const STATUS_PATH: &str = "/status";
const CONFIG_FILE_MODE: i32 = 0o644;

/// Full container command: server flags, limits file, then storage args.
pub fn server_command(resource: &Limitador, storage: &DeploymentStorageOptions) -> Vec<String> {
    let mut command = vec![SERVER_BINARY.to_string()];

    if let Some(headers) = resource.spec.rate_limit_headers {
        command.push("--rate-limit-headers".to_string());
        command.push(headers.as_str().to_string());
    }
    if resource.spec.telemetry == Some(Telemetry::Exhaustive) {
        command.push("--limit-name-in-labels".to_string());
    }
    if let Some(verbosity) = resource.spec.verbosity.filter(|v| *v > 0) {
        command.push(format!("-{}", "v".repeat(usize::from(verbosity))));
    }

    command.push("--http-port".to_string());
    command.push(resource.http_port().to_string());
    command.push("--rls-port".to_string());
    command.push(resource.grpc_port().to_string());
    command.push(limits_config_path());
    command.extend(storage.command.iter().cloned());
    command
}

/// Resource requirements applied when the declaration sets none.
pub fn default_resource_requirements() -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity("250m".to_string())),
            ("memory".to_string(), Quantity("32Mi".to_string())),
        ])),
        limits: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity("500m".to_string())),
            ("memory".to_string(), Quantity("64Mi".to_string())),
        ])),
        ..Default::default()
    }
}

/// Generate the Deployment for a Limitador.
pub fn generate_deployment(resource: &Limitador, storage: &DeploymentStorageOptions) -> Deployment {
    let labels = standard_labels(resource);

    Deployment {
        metadata: child_metadata(resource, resource_name(resource)),
        spec: Some(DeploymentSpec {
            replicas: Some(resource.spec.replicas.unwrap_or(DEFAULT_REPLICAS)),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            strategy: Some(storage.strategy.clone()),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    affinity: resource.spec.affinity.clone(),
                    containers: vec![generate_container(resource, storage)],
                    volumes: Some(generate_volumes(resource, storage)),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn generate_container(resource: &Limitador, storage: &DeploymentStorageOptions) -> Container {
    Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(resource.image()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(server_command(resource, storage)),
        ports: Some(vec![
            ContainerPort {
                name: Some("http".to_string()),
                container_port: resource.http_port(),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                name: Some("grpc".to_string()),
                container_port: resource.grpc_port(),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        env: non_empty(storage.env.clone()),
        liveness_probe: Some(status_probe(5, 10)),
        readiness_probe: Some(status_probe(5, 5)),
        resources: Some(
            resource
                .spec
                .resource_requirements
                .clone()
                .unwrap_or_else(default_resource_requirements),
        ),
        volume_mounts: Some(generate_volume_mounts(storage)),
        ..Default::default()
    }
}

fn status_probe(initial_delay: i32, period: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(STATUS_PATH.to_string()),
            port: IntOrString::String("http".to_string()),
            scheme: Some("HTTP".to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        timeout_seconds: Some(2),
        success_threshold: Some(1),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

fn generate_volumes(resource: &Limitador, storage: &DeploymentStorageOptions) -> Vec<Volume> {
    let mut volumes = vec![Volume {
        name: CONFIG_VOLUME_NAME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: limits_config_map_name(resource),
            items: Some(vec![KeyToPath {
                key: LIMITS_CONFIG_FILE.to_string(),
                path: LIMITS_CONFIG_FILE.to_string(),
                mode: None,
            }]),
            default_mode: Some(CONFIG_FILE_MODE),
            optional: None,
        }),
        ..Default::default()
    }];
    volumes.extend(storage.volumes.iter().cloned());
    volumes
}

fn generate_volume_mounts(storage: &DeploymentStorageOptions) -> Vec<VolumeMount> {
    let mut mounts = vec![VolumeMount {
        name: CONFIG_VOLUME_NAME.to_string(),
        mount_path: LIMITS_CONFIG_DIR.to_string(),
        read_only: Some(true),
        ..Default::default()
    }];
    mounts.extend(storage.volume_mounts.iter().cloned());
    mounts
}
