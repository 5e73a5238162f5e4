//! Service generation for Limitador.
//!
//! One ClusterIP Service exposing the HTTP (admin, metrics) and gRPC
//! (rate limit service) listeners. The Service is created once and never
//! updated afterwards.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::Limitador;
use crate::resources::common::{child_metadata, resource_name, standard_labels};

/// Generate the Service for a Limitador.
pub fn generate_service(resource: &Limitador) -> Service {
    Service {
        metadata: child_metadata(resource, resource_name(resource)),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(standard_labels(resource)),
            ports: Some(vec![
                ServicePort {
                    name: Some("http".to_string()),
                    port: resource.http_port(),
                    target_port: Some(IntOrString::String("http".to_string())),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("grpc".to_string()),
                    port: resource.grpc_port(),
                    target_port: Some(IntOrString::String("grpc".to_string())),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;
    use crate::crd::{LimitadorSpec, Listener, TransportProtocol};
    use crate::resources::common::tests::test_resource;

    #[test]
    fn test_generate_service() {
        let resource = test_resource("lim", LimitadorSpec::default());
        let svc = generate_service(&resource);

        assert_eq!(svc.metadata.name, Some("limitador-lim".to_string()));
        assert_eq!(svc.metadata.namespace, Some("default".to_string()));

        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_, Some("ClusterIP".to_string()));

        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].name, Some("http".to_string()));
        assert_eq!(ports[0].port, 8080);
        assert_eq!(ports[1].name, Some("grpc".to_string()));
        assert_eq!(ports[1].port, 8081);
    }

    #[test]
    fn test_service_listener_ports() {
        let resource = test_resource(
            "lim",
            LimitadorSpec {
                listener: Some(Listener {
                    http: Some(TransportProtocol { port: Some(18080) }),
                    grpc: None,
                }),
                ..Default::default()
            },
        );
        let ports = generate_service(&resource).spec.unwrap().ports.unwrap();
        assert_eq!(ports[0].port, 18080);
        assert_eq!(ports[1].port, 8081);
    }

    #[test]
    fn test_service_selector() {
        let resource = test_resource("lim", LimitadorSpec::default());
        let selector = generate_service(&resource).spec.unwrap().selector.unwrap();
        assert_eq!(selector.get("limitador-resource"), Some(&"lim".to_string()));
    }
}
