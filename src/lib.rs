//! Kubernetes operator for Limitador rate limiting services.
//!
//! - [`crd`]: the `Limitador` custom resource
//! - [`resources`]: builders for the objects a Limitador owns
//! - [`controller`]: the reconciliation pass and its kube adapter
//! - [`store`]: the object store the pass runs against
//! - [`health`]: probe and metrics endpoints
//! - [`config`]: command line and environment configuration

pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;
pub mod store;

pub use config::OperatorConfig;
pub use health::HealthState;

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::runtime::controller::{Action, Error as ControllerError};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{Controller, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::context::Context;
use controller::error::Error;
use controller::reconciler::{error_policy, reconcile};
use crd::Limitador;

/// Api for `K` in one namespace, or across the cluster when `namespace` is `None`.
pub fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + std::fmt::Debug,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

type PassResult = Result<(ObjectRef<Limitador>, Action), ControllerError<Error, watcher::Error>>;

fn log_pass_result(result: PassResult) {
    match result {
        Ok((object, _)) => debug!(limitador = %object, "Pass finished"),
        // owned objects keep triggering passes for a Limitador that is gone
        Err(ControllerError::ObjectNotFound(object)) => {
            debug!(limitador = %object, "Limitador no longer exists")
        }
        Err(ControllerError::ReconcilerFailed(e, object)) if e.is_not_found() => {
            debug!(limitador = %object, error = %e, "Pass hit a missing object")
        }
        Err(e) => error!(error = ?e, "Controller error"),
    }
}

/// Run the Limitador controller until its watch streams end.
///
/// Passes are triggered by changes to Limitador objects and to the
/// Deployments, ConfigMaps and PodDisruptionBudgets they own.
pub async fn run_controller(
    client: Client,
    config: &OperatorConfig,
    health_state: Option<Arc<HealthState>>,
) {
    let namespace = config.watch_namespace.as_deref();
    info!(
        namespace = namespace.unwrap_or("<all>"),
        "Starting Limitador controller"
    );

    let watch = watcher::Config::default().any_semantic();
    let controller = Controller::new(scoped_api::<Limitador>(client.clone(), namespace), watch.clone())
        .owns(scoped_api::<Deployment>(client.clone(), namespace), watch.clone())
        .owns(scoped_api::<ConfigMap>(client.clone(), namespace), watch.clone())
        .owns(scoped_api::<PodDisruptionBudget>(client.clone(), namespace), watch);

    if let Some(state) = &health_state {
        state.set_ready(true);
    }
    let ctx = Arc::new(Context::new(client, health_state, config.resync_interval()));

    controller
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move { log_pass_result(result) })
        .await;

    error!("Controller watch streams ended");
}
