//! PodDisruptionBudget generation for Limitador.
//!
//! The budget is optional. Without a declared policy the generated object
//! is tagged for deletion so that a previously created budget is removed.

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::controller::error::{Error, Result};
use crate::crd::Limitador;
use crate::resources::common::{child_metadata, resource_name, standard_labels, tag_for_deletion};

/// Generate the PodDisruptionBudget for a Limitador.
pub fn generate_pod_disruption_budget(resource: &Limitador) -> PodDisruptionBudget {
    let mut metadata = child_metadata(resource, resource_name(resource));
    let policy = resource.spec.pdb.clone().unwrap_or_default();
    if resource.spec.pdb.is_none() {
        tag_for_deletion(&mut metadata);
    }

    PodDisruptionBudget {
        metadata,
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: policy.max_unavailable,
            min_available: policy.min_available,
            selector: Some(LabelSelector {
                match_labels: Some(standard_labels(resource)),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Exactly one of `maxUnavailable` and `minAvailable` must be set.
pub fn validate_pod_disruption_budget(pdb: &PodDisruptionBudget) -> Result<()> {
    let spec = pdb.spec.as_ref();
    let max = spec.and_then(|s| s.max_unavailable.as_ref());
    let min = spec.and_then(|s| s.min_available.as_ref());
    match (max, min) {
        (Some(_), Some(_)) => Err(Error::Config(
            "pdb spec invalid, maxunavailable and minavailable are mutually exclusive".to_string(),
        )),
        (None, None) => Err(Error::Config(
            "pdb spec invalid, one of maxunavailable or minavailable must be set".to_string(),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;
    use crate::crd::{LimitadorSpec, PodDisruptionBudgetType};
    use crate::resources::common::is_tagged_for_deletion;
    use crate::resources::common::tests::test_resource;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    fn with_pdb(pdb: Option<PodDisruptionBudgetType>) -> Limitador {
        test_resource(
            "lim",
            LimitadorSpec {
                pdb,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_generate_pdb_max_unavailable() {
        let resource = with_pdb(Some(PodDisruptionBudgetType {
            max_unavailable: Some(IntOrString::Int(1)),
            min_available: None,
        }));
        let pdb = generate_pod_disruption_budget(&resource);

        assert_eq!(pdb.metadata.name, Some("limitador-lim".to_string()));
        assert!(!is_tagged_for_deletion(&pdb.metadata));
        assert!(validate_pod_disruption_budget(&pdb).is_ok());

        let spec = pdb.spec.unwrap();
        assert_eq!(spec.max_unavailable, Some(IntOrString::Int(1)));
        assert!(spec.min_available.is_none());
        let labels = spec.selector.unwrap().match_labels.unwrap();
        assert_eq!(labels.get("limitador-resource"), Some(&"lim".to_string()));
    }

    #[test]
    fn test_generate_pdb_min_available_percent() {
        let resource = with_pdb(Some(PodDisruptionBudgetType {
            max_unavailable: None,
            min_available: Some(IntOrString::String("50%".to_string())),
        }));
        let pdb = generate_pod_disruption_budget(&resource);
        assert!(validate_pod_disruption_budget(&pdb).is_ok());
        assert_eq!(
            pdb.spec.unwrap().min_available,
            Some(IntOrString::String("50%".to_string()))
        );
    }

    #[test]
    fn test_no_policy_is_tagged_for_deletion() {
        let pdb = generate_pod_disruption_budget(&with_pdb(None));
        assert!(is_tagged_for_deletion(&pdb.metadata));
    }

    #[test]
    fn test_validate_both_set() {
        let pdb = generate_pod_disruption_budget(&with_pdb(Some(PodDisruptionBudgetType {
            max_unavailable: Some(IntOrString::Int(1)),
            min_available: Some(IntOrString::Int(1)),
        })));
        let err = validate_pod_disruption_budget(&pdb).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_none_set() {
        let pdb = generate_pod_disruption_budget(&with_pdb(Some(PodDisruptionBudgetType::default())));
        assert!(validate_pod_disruption_budget(&pdb).is_err());
    }
}
