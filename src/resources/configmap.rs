//! Limits ConfigMap generation.
//!
//! The limits are stored as a YAML list under a single key, in the
//! snake_case layout read by the Limitador server.

use k8s_openapi::api::core::v1::ConfigMap;
use std::collections::BTreeMap;

use crate::controller::error::Result;
use crate::crd::{Limitador, RateLimit};
use crate::resources::common::{LIMITS_CONFIG_FILE, child_metadata, limits_config_map_name};

/// Serialize a limits list to the limits file format.
pub fn serialize_limits(limits: &[RateLimit]) -> Result<String> {
    Ok(serde_yaml::to_string(limits)?)
}

/// Parse a limits file.
pub fn deserialize_limits(data: &str) -> Result<Vec<RateLimit>> {
    Ok(serde_yaml::from_str(data)?)
}

/// Limits payload carried by a ConfigMap, if any.
pub fn limits_payload(config_map: &ConfigMap) -> Option<&str> {
    config_map
        .data
        .as_ref()
        .and_then(|d| d.get(LIMITS_CONFIG_FILE))
        .map(String::as_str)
}

/// Generate the limits ConfigMap for a Limitador.
pub fn generate_limits_config_map(resource: &Limitador) -> Result<ConfigMap> {
    let payload = serialize_limits(&resource.spec.limits)?;

    Ok(ConfigMap {
        metadata: child_metadata(resource, limits_config_map_name(resource)),
        data: Some(BTreeMap::from([(LIMITS_CONFIG_FILE.to_string(), payload)])),
        ..Default::default()
    })
}
