//! Common resource generation utilities.
//!
//! Names, labels, owner references and the tag-for-deletion annotation
//! shared by every child object of a Limitador.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

use crate::crd::Limitador;

/// Annotation marking a desired object that must not exist.
pub const DELETE_TAG_ANNOTATION: &str = "limitador.kuadrant.io/delete";

/// Key of the limits file inside the limits ConfigMap.
pub const LIMITS_CONFIG_FILE: &str = "limitador-config.yaml";
/// Directory the limits ConfigMap is mounted at.
pub const LIMITS_CONFIG_DIR: &str = "/home/limitador/etc";

/// Name of the Service, Deployment, PVC and PDB of a Limitador.
pub fn resource_name(resource: &Limitador) -> String {
    format!("limitador-{}", resource.name_any())
}

/// Name of the ConfigMap carrying the limits file.
pub fn limits_config_map_name(resource: &Limitador) -> String {
    format!("limitador-limits-config-{}", resource.name_any())
}

/// Limits ConfigMap name used by releases before 0.7.0.
pub fn legacy_limits_config_map_name(resource: &Limitador) -> String {
    format!("limits-config-{}", resource.name_any())
}

/// Absolute path of the limits file inside the container.
pub fn limits_config_path() -> String {
    format!("{LIMITS_CONFIG_DIR}/{LIMITS_CONFIG_FILE}")
}

/// In-cluster DNS name of the Limitador Service.
pub fn service_host(resource: &Limitador) -> String {
    format!(
        "{}.{}.svc.cluster.local",
        resource_name(resource),
        resource.namespace().unwrap_or_default()
    )
}

/// Labels applied to every child object and used as pod selector.
pub fn standard_labels(resource: &Limitador) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "limitador".to_string()),
        ("limitador-resource".to_string(), resource.name_any()),
    ])
}

/// Controller owner reference pointing back to the Limitador.
pub fn owner_reference(resource: &Limitador) -> OwnerReference {
    OwnerReference {
        api_version: Limitador::api_version(&()).into_owned(),
        kind: Limitador::kind(&()).into_owned(),
        name: resource.name_any(),
        uid: resource.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Metadata for a child object named `name`.
pub fn child_metadata(resource: &Limitador, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: resource.namespace(),
        labels: Some(standard_labels(resource)),
        owner_references: Some(vec![owner_reference(resource)]),
        ..Default::default()
    }
}

pub fn tag_for_deletion(meta: &mut ObjectMeta) {
    meta.annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(DELETE_TAG_ANNOTATION.to_string(), "true".to_string());
}

pub fn is_tagged_for_deletion(meta: &ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(DELETE_TAG_ANNOTATION))
        .is_some_and(|v| v == "true")
}

/// `None` for an empty list; the API server drops empty lists.
pub(crate) fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() { None } else { Some(items) }
}
