//! Reconciliation loop for Limitador.
//!
//! One pass reconciles the spec (Service, PVC, Deployment, limits ConfigMap,
//! PodDisruptionBudget, in that order), then the status, and combines both
//! results. [`reconcile_once`] runs a pass against any [`ObjectStore`];
//! [`reconcile`] adapts it to the kube runtime controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::ResourceExt;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    controller::{
        apply::{ResourceOutcome, reconcile_resource},
        context::Context,
        error::{Error, Result},
        mutators, status, upgrades,
    },
    crd::Limitador,
    resources::{configmap, deployment, pdb, pvc, services, storage},
    store::{ObjectKey, ObjectStore},
};

/// Delay before retrying a pass that asked to be requeued.
pub const REQUEUE_DELAY: Duration = Duration::from_secs(5);

/// Per-pass context carried explicitly through every step.
#[derive(Clone, Debug)]
pub struct PassContext {
    /// Correlation id attached to every log line of the pass.
    pub correlation_id: Uuid,
    /// Limitador being reconciled.
    pub key: ObjectKey,
}

impl PassContext {
    pub fn new(key: ObjectKey) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            key,
        }
    }
}

/// Which half of the pass asked for a requeue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requeue {
    Spec,
    Status,
}

/// Result of spec reconciliation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpecReport {
    pub requeue: bool,
    pub outcomes: Vec<ResourceOutcome>,
}

/// Result of a whole pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReconcileReport {
    pub requeue: Option<Requeue>,
    pub outcomes: Vec<ResourceOutcome>,
}

impl ReconcileReport {
    /// Outcomes that wrote to the store.
    pub fn changes(&self) -> impl Iterator<Item = &ResourceOutcome> {
        self.outcomes.iter().filter(|o| o.outcome.is_change())
    }
}

/// Combine the spec and status results of a pass.
///
/// Spec error, then status error, then spec requeue, then status requeue.
pub fn combine(spec: Result<SpecReport>, status: Result<bool>) -> Result<ReconcileReport> {
    let spec = spec?;
    let status_requeue = status?;
    let requeue = if spec.requeue {
        Some(Requeue::Spec)
    } else if status_requeue {
        Some(Requeue::Status)
    } else {
        None
    };
    Ok(ReconcileReport {
        requeue,
        outcomes: spec.outcomes,
    })
}

/// Run one reconciliation pass for the Limitador `pass.key`.
pub async fn reconcile_once<S>(store: &S, pass: &PassContext) -> Result<ReconcileReport>
where
    S: ObjectStore + ?Sized,
{
    let Some(resource) = store.get::<Limitador>(&pass.key).await? else {
        info!(correlation_id = %pass.correlation_id, "no object found");
        return Ok(ReconcileReport::default());
    };

    if resource.metadata.deletion_timestamp.is_some() {
        info!(correlation_id = %pass.correlation_id, "marked to be deleted");
        return Ok(ReconcileReport::default());
    }

    let spec = reconcile_spec(store, pass, &resource).await;
    if let Err(e) = &spec {
        warn!(correlation_id = %pass.correlation_id, error = %e, "Spec reconciliation failed");
    }
    let status = status::reconcile_status(store, pass, &resource, spec.as_ref().err()).await;

    let report = combine(spec, status)?;
    match report.requeue {
        Some(Requeue::Spec) => {
            debug!(correlation_id = %pass.correlation_id, "Reconciling spec not finished, requeueing")
        }
        Some(Requeue::Status) => {
            debug!(correlation_id = %pass.correlation_id, "Reconciling status not finished, requeueing")
        }
        None => info!(correlation_id = %pass.correlation_id, "successfully reconciled"),
    }
    Ok(report)
}

/// Reconcile the child objects of a Limitador.
///
/// Stops at the first error. A Deployment that is still migrating off the
/// legacy limits ConfigMap ends the spec half early with a requeue, after the
/// limits ConfigMap it mounts has been reconciled.
pub async fn reconcile_spec<S>(
    store: &S,
    pass: &PassContext,
    resource: &Limitador,
) -> Result<SpecReport>
where
    S: ObjectStore + ?Sized,
{
    let mut report = SpecReport::default();

    report.outcomes.push(
        reconcile_resource(
            store,
            pass,
            services::generate_service(resource),
            mutators::create_only,
        )
        .await?,
    );

    report.outcomes.push(
        reconcile_resource(store, pass, pvc::generate_pvc(resource), mutators::create_only)
            .await?,
    );

    let storage_options = storage::resolve(store, resource).await?;
    report.outcomes.push(
        reconcile_resource(
            store,
            pass,
            deployment::generate_deployment(resource, &storage_options),
            mutators::compose(mutators::deployment_mutators(resource)),
        )
        .await?,
    );

    // the Deployment already mounts this ConfigMap, so it must exist before
    // the rollout can finish
    report.outcomes.push(
        reconcile_resource(
            store,
            pass,
            configmap::generate_limits_config_map(resource)?,
            mutators::limits_config_map,
        )
        .await?,
    );
    if upgrades::upgrade_deployment_to_v070(store, pass, resource).await? {
        report.requeue = true;
        return Ok(report);
    }
    upgrades::upgrade_config_map_to_v070(store, pass, resource).await?;

    let budget = pdb::generate_pod_disruption_budget(resource);
    if resource.spec.pdb.is_some() {
        pdb::validate_pod_disruption_budget(&budget)?;
    }
    report.outcomes.push(
        reconcile_resource(store, pass, budget, mutators::pod_disruption_budget).await?,
    );

    Ok(report)
}

/// Reconcile a Limitador
///
/// Entry point for the kube runtime controller. Each call is one pass with
/// its own correlation id.
pub async fn reconcile(obj: Arc<Limitador>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();
    let pass = PassContext::new(ObjectKey::of(obj.as_ref()));

    let span = info_span!(
        "reconcile",
        correlation_id = %pass.correlation_id,
        limitador = %pass.key
    );
    let result = reconcile_once(&ctx.store, &pass).instrument(span).await;

    if let Some(ref health_state) = ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        health_state
            .metrics
            .record_reconcile(&namespace, &name, duration);
        if let Ok(report) = &result {
            health_state.mark_reconciled();
            for outcome in &report.outcomes {
                health_state
                    .metrics
                    .record_outcome(&outcome.kind, outcome.outcome.as_str());
            }
        }
    }

    match result {
        Ok(report) => {
            for change in report.changes() {
                ctx.publish_event(
                    &obj,
                    EventType::Normal,
                    "Reconciled",
                    Some(format!(
                        "{} {} {}",
                        change.kind, change.name, change.outcome
                    )),
                )
                .await;
            }
            Ok(match report.requeue {
                Some(_) => Action::requeue(REQUEUE_DELAY),
                None => Action::requeue(ctx.resync_interval),
            })
        }
        Err(e) => {
            ctx.publish_event(&obj, EventType::Warning, "ReconcileFailed", Some(e.to_string()))
                .await;
            Err(e)
        }
    }
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<Limitador>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();

    // Record error metric
    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}
