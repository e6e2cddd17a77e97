use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend,
    IngressRule, IngressServiceBackend, IngressSpec, IngressTLS,
    ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::RenderContext;

pub const CLUSTER_ISSUER_ANNOTATION: &str = "cert-manager.io/cluster-issuer";

pub fn network_service(ctx: &RenderContext<'_>) -> Service {
    let def = ctx.def;
    Service {
        metadata: ctx.meta(def.service_name(), def.workload_labels()),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".into()),
            selector: Some(def.label_selectors()),
            ports: Some(vec![ServicePort {
                name: Some("api".into()),
                port: ctx.port,
                target_port: Some(IntOrString::Int(ctx.port)),
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Public route for the definition. TLS settings appear only when the
/// definition asks for them.
pub fn ingress(ctx: &RenderContext<'_>) -> Ingress {
    let def = ctx.def;
    let host = ctx.host();
    let mut metadata = ctx.meta(def.ingress_name(), def.workload_labels());

    let tls = if def.spec.enable_tls {
        metadata.annotations = Some(BTreeMap::from([(
            CLUSTER_ISSUER_ANNOTATION.to_string(),
            ctx.settings.cluster_issuer.clone(),
        )]));
        Some(vec![IngressTLS {
            hosts: Some(vec![host.clone()]),
            secret_name: Some(def.tls_secret_name()),
        }])
    } else {
        None
    };

    let path = HTTPIngressPath {
        path: Some("/".into()),
        path_type: "Prefix".into(),
        backend: IngressBackend {
            service: Some(IngressServiceBackend {
                name: def.service_name(),
                port: Some(ServiceBackendPort {
                    number: Some(ctx.port),
                    name: None,
                }),
            }),
            resource: None,
        },
    };

    Ingress {
        metadata,
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(host),
                http: Some(HTTPIngressRuleValue { paths: vec![path] }),
            }]),
            tls,
            ..Default::default()
        }),
        ..Default::default()
    }
}
