//! PersistentVolumeClaim generation for disk storage.
//!
//! The claim is generated for every Limitador, whatever its storage
//! backend, so switching to disk later needs no separate creation path.
//! It is created once and never updated or deleted by the controller.

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

use crate::crd::{Limitador, PvcGenericSpec};
use crate::resources::common::{child_metadata, resource_name};

/// Storage requested when the declaration sets no size.
pub const DEFAULT_STORAGE_REQUEST: &str = "1Gi";

/// Generate the PersistentVolumeClaim for a Limitador.
pub fn generate_pvc(resource: &Limitador) -> PersistentVolumeClaim {
    let claim: Option<&PvcGenericSpec> = resource
        .spec
        .storage
        .as_ref()
        .and_then(|s| s.disk.as_ref())
        .and_then(|d| d.persistent_volume_claim.as_ref());

    let request = claim
        .and_then(|c| c.resources.as_ref())
        .map(|r| r.requests.clone())
        .unwrap_or_else(|| Quantity(DEFAULT_STORAGE_REQUEST.to_string()));

    PersistentVolumeClaim {
        metadata: child_metadata(resource, resource_name(resource)),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), request)])),
                ..Default::default()
            }),
            storage_class_name: claim.and_then(|c| c.storage_class_name.clone()),
            volume_name: claim.and_then(|c| c.volume_name.clone()),
            ..Default::default()
        }),
        ..Default::default()
    }
}
