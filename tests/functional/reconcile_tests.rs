//! Child object creation, idempotence and drift handling.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use limitador_operator::controller::apply::Outcome;
use limitador_operator::crd::{DiskSpec, Limitador, PvcGenericSpec, PvcResources, Storage};
use limitador_operator::resources::configmap::{deserialize_limits, limits_payload};
use limitador_operator::store::{MemoryStore, ObjectStore};

use crate::common::fixtures::{LimitadorBuilder, rate_limit};
use crate::{NAMESPACE, container, deployment, limitador, run_pass, store_with, writes_of};

fn outcomes(report: &limitador_operator::controller::reconciler::ReconcileReport) -> Vec<(&str, Outcome)> {
    report
        .outcomes
        .iter()
        .map(|o| (o.kind.as_str(), o.outcome))
        .collect()
}

fn limits_config_map(store: &MemoryStore) -> ConfigMap {
    store
        .object::<ConfigMap>(NAMESPACE, "limitador-limits-config-lim")
        .expect("limits config map exists")
}

#[tokio::test]
async fn test_first_pass_creates_children() {
    let store = store_with(
        LimitadorBuilder::new("lim")
            .max_unavailable(1)
            .limit(rate_limit("toystore", 10, 60))
            .build(),
    );

    let report = run_pass(&store, "lim").await.unwrap();

    assert_eq!(report.requeue, None);
    assert_eq!(
        outcomes(&report),
        vec![
            ("Service", Outcome::Created),
            ("PersistentVolumeClaim", Outcome::Created),
            ("Deployment", Outcome::Created),
            ("ConfigMap", Outcome::Created),
            ("PodDisruptionBudget", Outcome::Created),
        ]
    );
    assert_eq!(report.changes().count(), 5);
    assert_eq!(store.count::<Service>(), 1);
    assert_eq!(store.count::<PersistentVolumeClaim>(), 1);
    assert_eq!(store.count::<Deployment>(), 1);
    assert_eq!(store.count::<ConfigMap>(), 1);
    assert_eq!(store.count::<PodDisruptionBudget>(), 1);
}

#[tokio::test]
async fn test_children_owned_by_limitador() {
    let store = store_with(LimitadorBuilder::new("lim").build());
    run_pass(&store, "lim").await.unwrap();

    let uid = limitador(&store, "lim").metadata.uid.unwrap();
    let owners = deployment(&store, "lim").metadata.owner_references.unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "Limitador");
    assert_eq!(owners[0].name, "lim");
    assert_eq!(owners[0].uid, uid);
    assert_eq!(owners[0].controller, Some(true));

    let service = store
        .object::<Service>(NAMESPACE, "limitador-lim")
        .unwrap();
    let labels = service.metadata.labels.unwrap();
    assert_eq!(labels.get("app").map(String::as_str), Some("limitador"));
    assert_eq!(
        labels.get("limitador-resource").map(String::as_str),
        Some("lim")
    );
}

#[tokio::test]
async fn test_second_pass_writes_nothing() {
    let store = store_with(
        LimitadorBuilder::new("lim")
            .replicas(2)
            .max_unavailable(1)
            .limit(rate_limit("toystore", 10, 60))
            .build(),
    );
    run_pass(&store, "lim").await.unwrap();
    store.clear_calls();

    let report = run_pass(&store, "lim").await.unwrap();

    assert_eq!(report.requeue, None);
    assert!(
        report
            .outcomes
            .iter()
            .all(|o| o.outcome == Outcome::Unchanged)
    );
    assert_eq!(report.changes().count(), 0);
    assert!(store.writes().is_empty(), "writes: {:?}", store.writes());
}

#[tokio::test]
async fn test_service_drift_is_left_alone() {
    let store = store_with(LimitadorBuilder::new("lim").build());
    run_pass(&store, "lim").await.unwrap();
    store
        .modify::<Service>(NAMESPACE, "limitador-lim", |svc| {
            svc.spec.as_mut().unwrap().ports.as_mut().unwrap()[0].port = 9999;
        })
        .unwrap();
    store.clear_calls();

    let report = run_pass(&store, "lim").await.unwrap();

    assert_eq!(report.outcomes[0].kind, "Service");
    assert_eq!(report.outcomes[0].outcome, Outcome::Unchanged);
    assert_eq!(writes_of(&store, "Service"), 0);
    let service = store
        .object::<Service>(NAMESPACE, "limitador-lim")
        .unwrap();
    assert_eq!(service.spec.unwrap().ports.unwrap()[0].port, 9999);
}

#[tokio::test]
async fn test_pvc_is_never_patched() {
    let store = store_with(LimitadorBuilder::new("lim").build());
    run_pass(&store, "lim").await.unwrap();
    let claim = store
        .modify::<PersistentVolumeClaim>(NAMESPACE, "limitador-lim", |pvc| {
            pvc.metadata
                .labels
                .get_or_insert_with(Default::default)
                .insert("backup".to_string(), "daily".to_string());
        })
        .unwrap();
    store
        .modify::<Limitador>(NAMESPACE, "lim", |l| {
            l.spec.storage = Some(Storage {
                disk: Some(DiskSpec {
                    persistent_volume_claim: Some(PvcGenericSpec {
                        storage_class_name: Some("fast".to_string()),
                        resources: Some(PvcResources {
                            requests: Quantity("5Gi".to_string()),
                        }),
                        volume_name: None,
                    }),
                    optimize: None,
                }),
                ..Default::default()
            });
        })
        .unwrap();
    store.clear_calls();

    let report = run_pass(&store, "lim").await.unwrap();

    assert_eq!(report.outcomes[1].kind, "PersistentVolumeClaim");
    assert_eq!(report.outcomes[1].outcome, Outcome::Unchanged);
    assert_eq!(writes_of(&store, "PersistentVolumeClaim"), 0);
    let stored = store
        .object::<PersistentVolumeClaim>(NAMESPACE, "limitador-lim")
        .unwrap();
    assert_eq!(stored, claim);
    assert_eq!(
        stored.spec.unwrap().resources.unwrap().requests.unwrap().get("storage"),
        Some(&Quantity("1Gi".to_string()))
    );
}

#[tokio::test]
async fn test_deployment_image_drift_is_patched() {
    let store = store_with(LimitadorBuilder::new("lim").version("v1.6.0").build());
    run_pass(&store, "lim").await.unwrap();
    store
        .modify::<Deployment>(NAMESPACE, "limitador-lim", |d| {
            d.metadata
                .annotations
                .get_or_insert_with(Default::default)
                .insert("example.com/owner".to_string(), "someone-else".to_string());
            d.spec
                .as_mut()
                .unwrap()
                .template
                .spec
                .as_mut()
                .unwrap()
                .containers[0]
                .image = Some("example.com/other:1".to_string());
        })
        .unwrap();

    let report = run_pass(&store, "lim").await.unwrap();

    let outcome = report
        .outcomes
        .iter()
        .find(|o| o.kind == "Deployment")
        .unwrap();
    assert_eq!(outcome.outcome, Outcome::Patched);
    let deployment = deployment(&store, "lim");
    assert_eq!(
        container(&deployment).image.as_deref(),
        Some("quay.io/kuadrant/limitador:v1.6.0")
    );
    // fields the controller does not own survive the update
    assert_eq!(
        deployment
            .metadata
            .annotations
            .unwrap()
            .get("example.com/owner")
            .map(String::as_str),
        Some("someone-else")
    );
}

#[tokio::test]
async fn test_undeclared_replicas_left_alone() {
    let store = store_with(LimitadorBuilder::new("lim").build());
    run_pass(&store, "lim").await.unwrap();
    assert_eq!(
        deployment(&store, "lim").spec.unwrap().replicas,
        Some(1)
    );
    store
        .modify::<Deployment>(NAMESPACE, "limitador-lim", |d| {
            d.spec.as_mut().unwrap().replicas = Some(5);
        })
        .unwrap();
    store.clear_calls();

    run_pass(&store, "lim").await.unwrap();

    assert_eq!(writes_of(&store, "Deployment"), 0);
    assert_eq!(
        deployment(&store, "lim").spec.unwrap().replicas,
        Some(5)
    );
}

#[tokio::test]
async fn test_declared_replicas_enforced() {
    let store = store_with(LimitadorBuilder::new("lim").replicas(2).build());
    run_pass(&store, "lim").await.unwrap();
    store
        .modify::<Deployment>(NAMESPACE, "limitador-lim", |d| {
            d.spec.as_mut().unwrap().replicas = Some(5);
        })
        .unwrap();

    run_pass(&store, "lim").await.unwrap();

    assert_eq!(
        deployment(&store, "lim").spec.unwrap().replicas,
        Some(2)
    );
}

#[tokio::test]
async fn test_pdb_deleted_when_policy_removed() {
    let store = store_with(LimitadorBuilder::new("lim").max_unavailable(1).build());
    run_pass(&store, "lim").await.unwrap();
    assert_eq!(store.count::<PodDisruptionBudget>(), 1);

    store
        .modify::<limitador_operator::crd::Limitador>(NAMESPACE, "lim", |l| {
            l.spec.pdb = None;
        })
        .unwrap();
    let report = run_pass(&store, "lim").await.unwrap();

    let pdb = report.outcomes.last().unwrap();
    assert_eq!(pdb.kind, "PodDisruptionBudget");
    assert_eq!(pdb.outcome, Outcome::Deleted);
    assert_eq!(store.count::<PodDisruptionBudget>(), 0);

    // already gone
    let report = run_pass(&store, "lim").await.unwrap();
    assert_eq!(report.outcomes.last().unwrap().outcome, Outcome::Unchanged);
}

#[tokio::test]
async fn test_no_pdb_without_policy() {
    let store = store_with(LimitadorBuilder::new("lim").build());

    let report = run_pass(&store, "lim").await.unwrap();

    assert_eq!(report.outcomes.last().unwrap().outcome, Outcome::Unchanged);
    assert_eq!(store.count::<PodDisruptionBudget>(), 0);
    assert_eq!(writes_of(&store, "PodDisruptionBudget"), 0);
}

#[tokio::test]
async fn test_limits_change_patches_config_map() {
    let store = store_with(
        LimitadorBuilder::new("lim")
            .limit(rate_limit("toystore", 10, 60))
            .build(),
    );
    run_pass(&store, "lim").await.unwrap();

    store
        .modify::<limitador_operator::crd::Limitador>(NAMESPACE, "lim", |l| {
            l.spec.limits.push(rate_limit("petstore", 5, 1));
        })
        .unwrap();
    let report = run_pass(&store, "lim").await.unwrap();

    let outcome = report
        .outcomes
        .iter()
        .find(|o| o.kind == "ConfigMap")
        .unwrap();
    assert_eq!(outcome.outcome, Outcome::Patched);
    let cm = limits_config_map(&store);
    let limits = deserialize_limits(limits_payload(&cm).unwrap()).unwrap();
    assert_eq!(limits.len(), 2);
    assert_eq!(limits[1].namespace, "petstore");
}

#[tokio::test]
async fn test_reordered_limits_rewrite_config_map() {
    let store = store_with(
        LimitadorBuilder::new("lim")
            .limit(rate_limit("toystore", 10, 60))
            .limit(rate_limit("petstore", 5, 1))
            .build(),
    );
    run_pass(&store, "lim").await.unwrap();

    store
        .modify::<limitador_operator::crd::Limitador>(NAMESPACE, "lim", |l| {
            l.spec.limits.reverse();
        })
        .unwrap();
    store.clear_calls();
    run_pass(&store, "lim").await.unwrap();

    assert_eq!(writes_of(&store, "ConfigMap"), 1);
    let limits = deserialize_limits(limits_payload(&limits_config_map(&store)).unwrap()).unwrap();
    assert_eq!(limits[0].namespace, "petstore");
}

#[tokio::test]
async fn test_unparseable_limits_payload_overwritten() {
    let store = store_with(
        LimitadorBuilder::new("lim")
            .limit(rate_limit("toystore", 10, 60))
            .build(),
    );
    run_pass(&store, "lim").await.unwrap();
    store
        .modify::<ConfigMap>(NAMESPACE, "limitador-limits-config-lim", |cm| {
            cm.data.as_mut().unwrap().insert(
                "limitador-config.yaml".to_string(),
                "limits: [unterminated".to_string(),
            );
        })
        .unwrap();

    run_pass(&store, "lim").await.unwrap();

    let limits = deserialize_limits(limits_payload(&limits_config_map(&store)).unwrap()).unwrap();
    assert_eq!(limits, vec![rate_limit("toystore", 10, 60)]);
}

#[tokio::test]
async fn test_missing_limitador_is_a_no_op() {
    let store = MemoryStore::new();

    let report = run_pass(&store, "gone").await.unwrap();

    assert_eq!(report.requeue, None);
    assert!(report.outcomes.is_empty());
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn test_deleting_limitador_is_skipped() {
    let store = store_with(
        LimitadorBuilder::new("lim")
            .finalizer("example.com/cleanup")
            .build(),
    );
    let stored = limitador(&store, "lim");
    store.delete(&stored).await.unwrap();
    assert!(
        limitador(&store, "lim")
            .metadata
            .deletion_timestamp
            .is_some()
    );
    store.clear_calls();

    let report = run_pass(&store, "lim").await.unwrap();

    assert!(report.outcomes.is_empty());
    assert!(store.writes().is_empty());
    assert_eq!(store.count::<Deployment>(), 0);
}
