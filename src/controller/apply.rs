//! Mutate-compare-apply engine.
//!
//! For each child object: fetch the existing object, create the desired one
//! when it is missing, otherwise let a kind-specific mutator fold the owned
//! fields of the desired object into the existing one and update only when
//! the mutator reports a change. Desired objects tagged for deletion are
//! removed instead.

use std::fmt;

use kube::Resource;
use tracing::{debug, info};

use crate::controller::error::{Error, Result};
use crate::controller::reconciler::PassContext;
use crate::resources::common::is_tagged_for_deletion;
use crate::store::{Managed, ObjectKey, ObjectStore, kind_of};

/// What the engine did with one child object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    Created,
    Unchanged,
    Patched,
    Deleted,
}

impl Outcome {
    /// True when the pass wrote to the store.
    pub fn is_change(&self) -> bool {
        !matches!(self, Outcome::Unchanged)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Created => "created",
            Outcome::Unchanged => "unchanged",
            Outcome::Patched => "patched",
            Outcome::Deleted => "deleted",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome for one child object of a pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceOutcome {
    pub kind: String,
    pub name: String,
    pub outcome: Outcome,
}

/// Bring the stored object in line with `desired`.
///
/// `mutate(existing, desired)` merges the fields the controller owns into
/// `existing` and returns whether anything changed.
pub async fn reconcile_resource<S, K, M>(
    store: &S,
    pass: &PassContext,
    desired: K,
    mutate: M,
) -> Result<ResourceOutcome>
where
    S: ObjectStore + ?Sized,
    K: Managed,
    M: Fn(&mut K, &K) -> Result<bool> + Send + Sync,
{
    let key = ObjectKey::of(&desired);
    let kind = kind_of::<K>();
    let existing: Option<K> = store.get(&key).await?;

    let outcome = if is_tagged_for_deletion(desired.meta()) {
        delete_existing(store, pass, &kind, &key, existing).await?
    } else {
        match existing {
            None => {
                store.create(&desired).await?;
                info!(
                    correlation_id = %pass.correlation_id,
                    kind = %kind,
                    object = %key,
                    "Created object"
                );
                Outcome::Created
            }
            Some(mut existing) => {
                ensure_same_object(&existing, &desired)?;
                if mutate(&mut existing, &desired)? {
                    store.update(&existing).await?;
                    info!(
                        correlation_id = %pass.correlation_id,
                        kind = %kind,
                        object = %key,
                        "Updated object"
                    );
                    Outcome::Patched
                } else {
                    Outcome::Unchanged
                }
            }
        }
    };

    debug!(
        correlation_id = %pass.correlation_id,
        kind = %kind,
        object = %key,
        outcome = %outcome,
        "Reconciled object"
    );
    Ok(ResourceOutcome {
        kind,
        name: key.name,
        outcome,
    })
}

async fn delete_existing<S, K>(
    store: &S,
    pass: &PassContext,
    kind: &str,
    key: &ObjectKey,
    existing: Option<K>,
) -> Result<Outcome>
where
    S: ObjectStore + ?Sized,
    K: Managed,
{
    let Some(existing) = existing else {
        return Ok(Outcome::Unchanged);
    };
    if existing.meta().deletion_timestamp.is_some() {
        debug!(
            correlation_id = %pass.correlation_id,
            kind = %kind,
            object = %key,
            "Object already being deleted"
        );
        return Ok(Outcome::Unchanged);
    }

    match store.delete(&existing).await {
        Ok(()) => {
            info!(
                correlation_id = %pass.correlation_id,
                kind = %kind,
                object = %key,
                "Deleted object"
            );
            Ok(Outcome::Deleted)
        }
        // removed concurrently
        Err(e) if e.is_not_found() => Ok(Outcome::Unchanged),
        Err(e) => Err(e),
    }
}

fn ensure_same_object<K: Managed>(existing: &K, desired: &K) -> Result<()> {
    let existing_key = ObjectKey::of(existing);
    let desired_key = ObjectKey::of(desired);
    if existing_key != desired_key {
        return Err(Error::ObjectMismatch {
            existing: format!("{} {}", kind_of::<K>(), existing_key),
            desired: format!("{} {}", kind_of::<K>(), desired_key),
        });
    }
    Ok(())
}
