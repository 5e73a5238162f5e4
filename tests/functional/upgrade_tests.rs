//! Migration off the limits ConfigMap used before 0.7.0.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::ConfigMap;
use limitador_operator::controller::reconciler::Requeue;
use limitador_operator::store::MemoryStore;

use crate::common::fixtures::{LimitadorBuilder, legacy_config_map, rate_limit};
use crate::{NAMESPACE, deployment, run_pass, store_with};

fn legacy_exists(store: &MemoryStore) -> bool {
    store
        .object::<ConfigMap>(NAMESPACE, "limits-config-lim")
        .is_some()
}

fn current_exists(store: &MemoryStore) -> bool {
    store
        .object::<ConfigMap>(NAMESPACE, "limitador-limits-config-lim")
        .is_some()
}

fn mark_rolled_out(store: &MemoryStore) {
    store
        .modify::<Deployment>(NAMESPACE, "limitador-lim", |d| {
            let replicas = d.spec.as_ref().and_then(|s| s.replicas);
            d.status = Some(DeploymentStatus {
                observed_generation: d.metadata.generation,
                updated_replicas: replicas,
                replicas,
                ..Default::default()
            });
        })
        .unwrap();
}

#[tokio::test]
async fn test_fresh_install_does_not_wait() {
    let store = store_with(LimitadorBuilder::new("lim").build());

    let report = run_pass(&store, "lim").await.unwrap();

    assert_eq!(report.requeue, None);
    assert_eq!(store.count::<ConfigMap>(), 1);
}

#[tokio::test]
async fn test_waits_for_rollout_then_removes_legacy_config_map() {
    let store = store_with(
        LimitadorBuilder::new("lim")
            .limit(rate_limit("toystore", 10, 60))
            .build(),
    );
    store.insert(legacy_config_map("lim", NAMESPACE)).unwrap();

    // the new Deployment has not rolled out yet
    let report = run_pass(&store, "lim").await.unwrap();
    assert_eq!(report.requeue, Some(Requeue::Spec));
    assert_eq!(
        report.outcomes.last().map(|o| o.kind.as_str()),
        Some("ConfigMap")
    );
    assert!(legacy_exists(&store));
    // the new pods mount it, so it exists while the rollout is pending
    assert!(current_exists(&store));

    // still waiting
    let report = run_pass(&store, "lim").await.unwrap();
    assert_eq!(report.requeue, Some(Requeue::Spec));

    mark_rolled_out(&store);
    let report = run_pass(&store, "lim").await.unwrap();

    assert_eq!(report.requeue, None);
    assert!(!legacy_exists(&store));
    assert!(current_exists(&store));
    assert_eq!(store.count::<ConfigMap>(), 1);
}

#[tokio::test]
async fn test_waits_while_deployment_mounts_legacy_config_map() {
    let store = store_with(LimitadorBuilder::new("lim").build());
    store.insert(legacy_config_map("lim", NAMESPACE)).unwrap();
    run_pass(&store, "lim").await.unwrap();
    mark_rolled_out(&store);

    // an old pod template still pointing at the legacy ConfigMap
    store
        .modify::<Deployment>(NAMESPACE, "limitador-lim", |d| {
            let pod = d.spec.as_mut().unwrap().template.spec.as_mut().unwrap();
            for volume in pod.volumes.iter_mut().flatten() {
                if let Some(cm) = volume.config_map.as_mut() {
                    cm.name = "limits-config-lim".to_string();
                }
            }
        })
        .unwrap();

    // this pass puts the current ConfigMap back in the template; the
    // rollout of that change is still pending
    let report = run_pass(&store, "lim").await.unwrap();
    assert_eq!(report.requeue, Some(Requeue::Spec));
    assert!(legacy_exists(&store));
}

/// Surged pods only start once the ConfigMap they mount exists.
fn observe_rollout(store: &MemoryStore) {
    let started = current_exists(store);
    store
        .modify::<Deployment>(NAMESPACE, "limitador-lim", |d| {
            let desired = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            d.status = Some(DeploymentStatus {
                observed_generation: d.metadata.generation,
                updated_replicas: Some(if started { desired } else { 1 }),
                replicas: Some(desired),
                ..Default::default()
            });
        })
        .unwrap();
}

#[tokio::test]
async fn test_upgrade_with_replicas_converges() {
    let store = store_with(
        LimitadorBuilder::new("lim")
            .replicas(2)
            .limit(rate_limit("toystore", 10, 60))
            .build(),
    );
    store.insert(legacy_config_map("lim", NAMESPACE)).unwrap();

    let mut report = run_pass(&store, "lim").await.unwrap();
    for _ in 0..4 {
        if report.requeue.is_none() {
            break;
        }
        observe_rollout(&store);
        report = run_pass(&store, "lim").await.unwrap();
    }

    assert_eq!(report.requeue, None);
    assert!(current_exists(&store));
    assert!(!legacy_exists(&store));
    assert_eq!(
        deployment(&store, "lim").spec.unwrap().replicas,
        Some(2)
    );
}
