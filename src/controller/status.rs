//! Status management.
//!
//! Computes the Limitador status from the observed Deployment and the
//! outcome of spec reconciliation, and writes it when it changed.

use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::controller::error::{Error, Result};
use crate::controller::reconciler::PassContext;
use crate::crd::{Condition, Limitador, LimitadorService, LimitadorStatus, Ports, READY_CONDITION};
use crate::resources::common::{resource_name, service_host};
use crate::store::{ObjectKey, ObjectStore};

pub const REASON_READY: &str = "Ready";
pub const REASON_RECONCILIATION_ERROR: &str = "ReconciliationError";
pub const REASON_DEPLOYMENT_NOT_AVAILABLE: &str = "DeploymentNotAvailable";

/// Add or update a condition.
///
/// The transition time only moves when the status flips. Returns whether
/// the list changed.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    let Some(existing) = conditions.iter_mut().find(|c| c.r#type == condition.r#type) else {
        conditions.push(condition);
        return true;
    };

    if existing.status != condition.status {
        *existing = condition;
        return true;
    }

    let changed = existing.reason != condition.reason
        || existing.message != condition.message
        || existing.observed_generation != condition.observed_generation;
    existing.reason = condition.reason;
    existing.message = condition.message;
    existing.observed_generation = condition.observed_generation;
    changed
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .is_some_and(Condition::is_true)
}

/// Whether the Deployment reports the `Available` condition as true.
pub fn deployment_available(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|c| c.iter().find(|c| c.type_ == "Available"))
        .is_some_and(|c| c.status == "True")
}

/// Ready condition for the given observations.
pub fn ready_condition(
    resource: &Limitador,
    deployment: Option<&Deployment>,
    spec_error: Option<&Error>,
) -> Condition {
    let generation = resource.metadata.generation;
    if let Some(err) = spec_error {
        return Condition::ready(false, REASON_RECONCILIATION_ERROR, &err.to_string(), generation);
    }
    match deployment {
        None => Condition::ready(
            false,
            REASON_DEPLOYMENT_NOT_AVAILABLE,
            "Limitador Deployment does not exist",
            generation,
        ),
        Some(d) if !deployment_available(d) => Condition::ready(
            false,
            REASON_DEPLOYMENT_NOT_AVAILABLE,
            "Limitador Deployment is not available",
            generation,
        ),
        Some(_) => Condition::ready(true, REASON_READY, "Limitador is ready", generation),
    }
}

/// New status of a Limitador, building on its current status.
pub fn calculate_status(
    resource: &Limitador,
    deployment: Option<&Deployment>,
    spec_error: Option<&Error>,
) -> LimitadorStatus {
    let mut status = resource.status.clone().unwrap_or_default();
    set_condition(
        &mut status.conditions,
        ready_condition(resource, deployment, spec_error),
    );
    status.observed_generation = resource.metadata.generation;
    status.service = Some(LimitadorService {
        host: service_host(resource),
        ports: Ports {
            http: resource.http_port(),
            grpc: resource.grpc_port(),
        },
    });
    status
}

/// Write the status of a Limitador if it changed.
///
/// Returns `true` when the write hit a conflict and the pass should be
/// retried.
pub async fn reconcile_status<S>(
    store: &S,
    pass: &PassContext,
    resource: &Limitador,
    spec_error: Option<&Error>,
) -> Result<bool>
where
    S: ObjectStore + ?Sized,
{
    let namespace = resource.namespace().unwrap_or_default();
    let deployment: Option<Deployment> = store
        .get(&ObjectKey::new(namespace, resource_name(resource)))
        .await?;

    let status = calculate_status(resource, deployment.as_ref(), spec_error);
    if resource.status.as_ref() == Some(&status) {
        debug!(correlation_id = %pass.correlation_id, "Status unchanged");
        return Ok(false);
    }

    let ready = is_condition_true(&status.conditions, READY_CONDITION);
    let mut updated = resource.clone();
    updated.status = Some(status);
    match store.update_status(&updated).await {
        Ok(_) => {
            info!(correlation_id = %pass.correlation_id, ready, "Updated status");
            Ok(false)
        }
        Err(e) if e.is_conflict() => {
            debug!(correlation_id = %pass.correlation_id, "Status update conflict, requeueing");
            Ok(true)
        }
        Err(e) => Err(e),
    }
}
