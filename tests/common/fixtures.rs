//! Test fixtures and builder patterns for Limitador.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use limitador_operator::crd::{
    DiskSpec, Limitador, LimitadorSpec, PodDisruptionBudgetType, RateLimit, Redis, RedisCached,
    RedisCachedOptions, SecretReference, Storage,
};

/// Builder for creating Limitador test fixtures.
///
/// # Example
/// ```
/// let resource = LimitadorBuilder::new("lim")
///     .namespace("test-ns")
///     .replicas(3)
///     .limit(rate_limit("toystore", 10, 60))
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct LimitadorBuilder {
    name: String,
    namespace: String,
    spec: LimitadorSpec,
    generation: Option<i64>,
    finalizers: Vec<String>,
}

impl LimitadorBuilder {
    /// Create a new builder with the given resource name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: "default".to_string(),
            spec: LimitadorSpec::default(),
            generation: None,
            finalizers: Vec::new(),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn replicas(mut self, replicas: i32) -> Self {
        self.spec.replicas = Some(replicas);
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.spec.version = Some(version.into());
        self
    }

    pub fn limit(mut self, limit: RateLimit) -> Self {
        self.spec.limits.push(limit);
        self
    }

    pub fn storage(mut self, storage: Storage) -> Self {
        self.spec.storage = Some(storage);
        self
    }

    /// Use redis storage backed by the Secret `secret`.
    pub fn redis(self, secret: &str) -> Self {
        self.storage(Storage {
            redis: Some(Redis {
                config_secret_ref: Some(secret_ref(secret)),
            }),
            ..Default::default()
        })
    }

    /// Use cached redis storage backed by the Secret `secret`.
    pub fn redis_cached(self, secret: &str, options: Option<RedisCachedOptions>) -> Self {
        self.storage(Storage {
            redis_cached: Some(RedisCached {
                config_secret_ref: Some(secret_ref(secret)),
                options,
            }),
            ..Default::default()
        })
    }

    pub fn disk(self, disk: DiskSpec) -> Self {
        self.storage(Storage {
            disk: Some(disk),
            ..Default::default()
        })
    }

    pub fn max_unavailable(mut self, value: i32) -> Self {
        self.spec.pdb = Some(PodDisruptionBudgetType {
            max_unavailable: Some(IntOrString::Int(value)),
            min_available: None,
        });
        self
    }

    pub fn pdb(mut self, pdb: PodDisruptionBudgetType) -> Self {
        self.spec.pdb = Some(pdb);
        self
    }

    /// Set the generation (for testing status updates).
    pub fn generation(mut self, generation: i64) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.finalizers.push(finalizer.into());
        self
    }

    /// Build the Limitador.
    pub fn build(self) -> Limitador {
        let mut resource = Limitador::new(&self.name, self.spec);
        resource.metadata.namespace = Some(self.namespace);
        resource.metadata.generation = self.generation;
        if !self.finalizers.is_empty() {
            resource.metadata.finalizers = Some(self.finalizers);
        }
        resource
    }
}

pub fn secret_ref(name: &str) -> SecretReference {
    SecretReference {
        name: name.to_string(),
        namespace: None,
    }
}

pub fn rate_limit(namespace: &str, max_value: i64, seconds: i64) -> RateLimit {
    RateLimit {
        conditions: vec!["get_toy == 'yes'".to_string()],
        max_value,
        namespace: namespace.to_string(),
        seconds,
        variables: vec![],
        name: None,
    }
}

/// Secret carrying a redis `URL`, or only unrelated keys.
pub fn redis_secret(name: &str, namespace: &str, url: Option<&str>) -> Secret {
    let key = if url.is_some() { "URL" } else { "HOST" };
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            key.to_string(),
            ByteString(url.unwrap_or("redis").as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

/// Limits ConfigMap left behind by releases before 0.7.0.
pub fn legacy_config_map(limitador: &str, namespace: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(format!("limits-config-{limitador}")),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "limitador-config.yaml".to_string(),
            "[]\n".to_string(),
        )])),
        ..Default::default()
    }
}
