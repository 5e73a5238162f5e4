// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Functional tests for the Limitador reconciliation pass.
//!
//! These tests run whole passes against the in-memory object store, WITHOUT
//! requiring a live Kubernetes cluster, and check the objects left behind,
//! the store calls issued and the reported outcomes.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_first_pass_creates_children
//! ```
//!
//! ## Test Categories
//!
//! - **Reconcile tests**: child object creation, idempotence and drift
//! - **Storage tests**: in-memory, disk, redis and redis-cached backends
//! - **Status tests**: Ready condition, conflicts and reported errors
//! - **Upgrade tests**: migration off the pre-0.7.0 limits ConfigMap

#[path = "../common/mod.rs"]
mod common;

mod reconcile_tests;
mod upgrade_tests;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Container;
use limitador_operator::controller::error::Result;
use limitador_operator::controller::reconciler::{PassContext, ReconcileReport, reconcile_once};
use limitador_operator::crd::Limitador;
use limitador_operator::store::{MemoryStore, ObjectKey};

pub const NAMESPACE: &str = "default";

/// Seed a Limitador into a fresh store.
pub fn store_with(resource: Limitador) -> MemoryStore {
    let store = MemoryStore::new();
    store.insert(resource).unwrap();
    store
}

/// Run one pass for the Limitador `name` in the default namespace.
pub async fn run_pass(store: &MemoryStore, name: &str) -> Result<ReconcileReport> {
    reconcile_once(store, &PassContext::new(ObjectKey::new(NAMESPACE, name))).await
}

/// Number of recorded writes to objects of kind `kind`.
pub fn writes_of(store: &MemoryStore, kind: &str) -> usize {
    store.writes().iter().filter(|c| c.kind() == kind).count()
}

pub fn deployment(store: &MemoryStore, name: &str) -> Deployment {
    store
        .object::<Deployment>(NAMESPACE, &format!("limitador-{name}"))
        .expect("deployment exists")
}

pub fn container(deployment: &Deployment) -> &Container {
    &deployment
        .spec
        .as_ref()
        .unwrap()
        .template
        .spec
        .as_ref()
        .unwrap()
        .containers[0]
}

pub fn limitador(store: &MemoryStore, name: &str) -> Limitador {
    store
        .object::<Limitador>(NAMESPACE, name)
        .expect("limitador exists")
}
