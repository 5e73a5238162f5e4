//! Limitador Custom Resource Definition.
//!
//! A `Limitador` declares one rate-limiting service instance: how many
//! replicas to run, which storage backend keeps the counters, and the list
//! of limits the server enforces.

use k8s_openapi::api::core::v1::{Affinity, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::{Deserialize, Serialize};

use crate::controller::error::Error;

/// Limitador is a custom resource for deploying a Limitador rate-limit server.
///
/// Example:
/// ```yaml
/// apiVersion: limitador.kuadrant.io/v1alpha1
/// kind: Limitador
/// metadata:
///   name: limitador
/// spec:
///   replicas: 2
///   storage:
///     redis:
///       configSecretRef:
///         name: redis-config
///   limits:
///     - conditions: ["get_toy == 'yes'"]
///       max_value: 2
///       namespace: toystore-app
///       seconds: 30
///       variables: []
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "limitador.kuadrant.io",
    version = "v1alpha1",
    kind = "Limitador",
    plural = "limitadors",
    status = "LimitadorStatus",
    namespaced,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LimitadorSpec {
    /// Number of server replicas. When unset the operator never overrides
    /// the replica count of an existing Deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Limitador image tag (default: latest).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// HTTP and gRPC listener ports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener: Option<Listener>,

    /// Counter storage backend. Unset means in-memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<Storage>,

    /// Rate limit response headers format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_headers: Option<RateLimitHeaders>,

    /// Metrics detail level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<Telemetry>,

    /// Log verbosity, 1 to 4.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1, max = 4))]
    pub verbosity: Option<u8>,

    /// Limits served by this instance.
    #[serde(default)]
    pub limits: Vec<RateLimit>,

    /// PodDisruptionBudget policy. Removing it deletes the budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdb: Option<PodDisruptionBudgetType>,

    /// Pod affinity rules, copied verbatim into the pod template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub affinity: Option<Affinity>,

    /// Container resource requests and limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub resource_requirements: Option<ResourceRequirements>,
}

fn preserve_unknown_fields(_generator: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "object",
        "nullable": true,
        "x-kubernetes-preserve-unknown-fields": true
    })
}

fn int_or_string(_generator: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "nullable": true,
        "x-kubernetes-int-or-string": true
    })
}

/// Listener ports for the Limitador server.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<TransportProtocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc: Option<TransportProtocol>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransportProtocol {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

/// Storage backend selection.
///
/// The wire form keeps one optional field per backend; at most one may be
/// set. Use [`Storage::backend`] to get the validated selection.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Storage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<Redis>,

    #[serde(
        rename = "redis-cached",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub redis_cached: Option<RedisCached>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskSpec>,
}

/// Validated storage backend.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StorageBackend<'a> {
    InMemory,
    Disk(&'a DiskSpec),
    Redis(&'a Redis),
    RedisCached(&'a RedisCached),
}

impl Storage {
    /// Select the declared backend.
    ///
    /// Declaring more than one backend is rejected instead of silently
    /// preferring one of them.
    pub fn backend(&self) -> Result<StorageBackend<'_>, Error> {
        let mut selected = Vec::with_capacity(1);
        if let Some(redis) = &self.redis {
            selected.push(StorageBackend::Redis(redis));
        }
        if let Some(cached) = &self.redis_cached {
            selected.push(StorageBackend::RedisCached(cached));
        }
        if let Some(disk) = &self.disk {
            selected.push(StorageBackend::Disk(disk));
        }

        match selected.as_slice() {
            [] => Ok(StorageBackend::InMemory),
            [backend] => Ok(*backend),
            _ => Err(Error::Config(format!(
                "storage backends are mutually exclusive, found {}: {}",
                selected.len(),
                selected
                    .iter()
                    .map(StorageBackend::name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

impl StorageBackend<'_> {
    /// Wire name of the backend.
    pub fn name(&self) -> &'static str {
        match self {
            StorageBackend::InMemory => "memory",
            StorageBackend::Disk(_) => "disk",
            StorageBackend::Redis(_) => "redis",
            StorageBackend::RedisCached(_) => "redis-cached",
        }
    }
}

/// Reference to the Secret holding the redis `URL`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub name: String,
    /// Namespace the Secret is validated in. Defaults to the namespace of
    /// the Limitador.
    ///
    /// The pod reads `URL` through a `secretKeyRef`, which always resolves in
    /// the pod's own namespace. A Secret of the same name must exist there
    /// too; only the one in this namespace is checked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Redis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_secret_ref: Option<SecretReference>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisCached {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_secret_ref: Option<SecretReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<RedisCachedOptions>,
}

/// Tuning flags for the cached redis backend. Unset options are not passed.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct RedisCachedOptions {
    /// TTL for cached counters in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,

    /// Ratio to apply to the TTL from redis on cached counters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<i64>,

    /// Flushing period for counters in milliseconds.
    #[serde(
        rename = "flush-period",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub flush_period: Option<i64>,

    /// Max number of counters to cache.
    #[serde(
        rename = "max-cached",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_cached: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiskSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PvcGenericSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimize: Option<DiskOptimize>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PvcGenericSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<PvcResources>,

    /// Bind to an existing PersistentVolume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PvcResources {
    #[schemars(schema_with = "int_or_string")]
    pub requests: Quantity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DiskOptimize {
    Throughput,
    Disk,
}

impl DiskOptimize {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskOptimize::Throughput => "throughput",
            DiskOptimize::Disk => "disk",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum RateLimitHeaders {
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "DRAFT_VERSION_03")]
    DraftVersion03,
}

impl RateLimitHeaders {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitHeaders::None => "NONE",
            RateLimitHeaders::DraftVersion03 => "DRAFT_VERSION_03",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Telemetry {
    Basic,
    Exhaustive,
}

/// One rate limit as consumed by the Limitador server.
///
/// Keys stay snake_case: this is the file format Limitador reads, not a
/// Kubernetes API shape.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct RateLimit {
    #[serde(default)]
    pub conditions: Vec<String>,
    pub max_value: i64,
    pub namespace: String,
    pub seconds: i64,
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Disruption budget policy. Exactly one field must be set.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodDisruptionBudgetType {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "int_or_string")]
    pub max_unavailable: Option<IntOrString>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "int_or_string")]
    pub min_available: Option<IntOrString>,
}

/// Status of a Limitador.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LimitadorStatus {
    /// The generation most recently observed by the controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions describing the current state.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Where clients reach the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<LimitadorService>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct LimitadorService {
    pub host: String,
    pub ports: Ports,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Ports {
    pub http: i32,
    pub grpc: i32,
}

/// Condition describes the state of a Limitador at a certain point.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition stamped with the current time.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Ready" condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new(READY_CONDITION, ready, reason, message, generation)
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Condition type reporting server availability.
pub const READY_CONDITION: &str = "Ready";

/// Image repository of the Limitador server.
pub const LIMITADOR_REPOSITORY: &str = "quay.io/kuadrant/limitador";

/// Image tag used when the declaration does not pin one.
pub const DEFAULT_VERSION: &str = "latest";

/// Replica count for a freshly created Deployment.
pub const DEFAULT_REPLICAS: i32 = 1;

pub const DEFAULT_HTTP_PORT: i32 = 8080;
pub const DEFAULT_GRPC_PORT: i32 = 8081;

impl Limitador {
    /// Port of the HTTP (admin and metrics) listener.
    pub fn http_port(&self) -> i32 {
        self.spec
            .listener
            .as_ref()
            .and_then(|l| l.http.as_ref())
            .and_then(|p| p.port)
            .unwrap_or(DEFAULT_HTTP_PORT)
    }

    /// Port of the gRPC (envoy RLS) listener.
    pub fn grpc_port(&self) -> i32 {
        self.spec
            .listener
            .as_ref()
            .and_then(|l| l.grpc.as_ref())
            .and_then(|p| p.port)
            .unwrap_or(DEFAULT_GRPC_PORT)
    }

    /// Full container image reference.
    pub fn image(&self) -> String {
        format!(
            "{}:{}",
            LIMITADOR_REPOSITORY,
            self.spec.version.as_deref().unwrap_or(DEFAULT_VERSION)
        )
    }

    /// Validated storage backend; in-memory when no storage is declared.
    pub fn storage_backend(&self) -> Result<StorageBackend<'_>, Error> {
        match &self.spec.storage {
            Some(storage) => storage.backend(),
            None => Ok(StorageBackend::InMemory),
        }
    }

    /// Ready condition, if the controller has reported one.
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()?
            .conditions
            .iter()
            .find(|c| c.r#type == READY_CONDITION)
    }
}
