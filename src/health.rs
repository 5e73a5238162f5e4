//! Probe and metrics endpoints.
//!
//! | Path | Answers |
//! |------|---------|
//! | `/healthz` | 200 while the process serves requests |
//! | `/readyz` | 200 once the controller runs, 503 before and during shutdown |
//! | `/metrics` | Prometheus text exposition of [`Metrics`] |

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tracing::{error, info};

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Identifies the Limitador a pass ran for.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct LimitadorLabels {
    pub namespace: String,
    pub name: String,
}

impl LimitadorLabels {
    fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// Child object kind and what the pass did with it.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub kind: String,
    pub outcome: String,
}

/// Operator metrics, registered under the `limitador_operator` prefix.
pub struct Metrics {
    pub passes: Family<LimitadorLabels, Counter>,
    pub pass_errors: Family<LimitadorLabels, Counter>,
    pub pass_duration: Family<LimitadorLabels, Histogram>,
    pub object_outcomes: Family<OutcomeLabels, Counter>,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("limitador_operator");

        let passes = Family::<LimitadorLabels, Counter>::default();
        registry.register(
            "reconciliations",
            "Reconciliation passes run",
            passes.clone(),
        );

        let pass_errors = Family::<LimitadorLabels, Counter>::default();
        registry.register(
            "reconciliation_errors",
            "Reconciliation passes that ended in an error",
            pass_errors.clone(),
        );

        // 1ms up to ~16s
        let pass_duration = Family::<LimitadorLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 15))
        });
        registry.register(
            "reconcile_duration_seconds",
            "Wall time of one reconciliation pass",
            pass_duration.clone(),
        );

        let object_outcomes = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "object_outcomes",
            "Child objects created, patched, deleted or left unchanged",
            object_outcomes.clone(),
        );

        Self {
            passes,
            pass_errors,
            pass_duration,
            object_outcomes,
            registry,
        }
    }

    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = LimitadorLabels::new(namespace, name);
        self.passes.get_or_create(&labels).inc();
        self.pass_duration
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    pub fn record_error(&self, namespace: &str, name: &str) {
        self.pass_errors
            .get_or_create(&LimitadorLabels::new(namespace, name))
            .inc();
    }

    pub fn record_outcome(&self, kind: &str, outcome: &str) {
        self.object_outcomes
            .get_or_create(&OutcomeLabels {
                kind: kind.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Prometheus text exposition of every registered metric.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        match encode(&mut out, &self.registry) {
            Ok(()) => out,
            Err(e) => {
                error!(error = %e, "Failed to encode metrics");
                String::new()
            }
        }
    }
}

/// State shared between the controller and the probe server.
#[derive(Default)]
pub struct HealthState {
    ready: AtomicBool,
    pub metrics: Metrics,
    /// Unix seconds of the last pass that finished without error, 0 if none.
    pub last_reconcile: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn mark_reconciled(&self) {
        let now = u64::try_from(jiff::Timestamp::now().as_second()).unwrap_or_default();
        self.last_reconcile.store(now, Ordering::Relaxed);
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
        state.metrics.encode(),
    )
}

pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the probe and metrics endpoints on `0.0.0.0:port` until the
/// listener fails.
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Health server listening");
    axum::serve(listener, create_router(state)).await
}
