//! State shared by every reconciliation pass run by the kube controller.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

use crate::crd::Limitador;
use crate::health::HealthState;
use crate::store::KubeStore;

/// Field manager and event reporter name.
pub const FIELD_MANAGER: &str = "limitador-operator";

#[derive(Clone)]
pub struct Context {
    /// Store the passes read and write through.
    pub store: KubeStore,
    recorder: Recorder,
    pub health_state: Option<Arc<HealthState>>,
    /// Requeue delay after a pass that left nothing pending.
    pub resync_interval: Duration,
}

impl Context {
    pub fn new(
        client: Client,
        health_state: Option<Arc<HealthState>>,
        resync_interval: Duration,
    ) -> Self {
        let reporter = Reporter {
            controller: FIELD_MANAGER.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            store: KubeStore::new(client.clone()),
            recorder: Recorder::new(client, reporter),
            health_state,
            resync_interval,
        }
    }

    /// Record a Kubernetes event on a Limitador. Failures are logged and
    /// otherwise ignored.
    pub async fn publish_event(
        &self,
        resource: &Limitador,
        type_: EventType,
        reason: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: "Reconciling".to_string(),
            secondary: None,
        };
        if let Err(e) = self
            .recorder
            .publish(&event, &resource.object_ref(&()))
            .await
        {
            warn!(reason, error = %e, "Failed to publish event");
        }
    }
}
