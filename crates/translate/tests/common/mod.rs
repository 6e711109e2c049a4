#![allow(dead_code)]

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointPort, EndpointSubset, Endpoints, LoadBalancerIngress, LoadBalancerStatus, Secret, Service,
    ServicePort, ServiceSpec, ServiceStatus,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend, IngressSpec,
    IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;

pub enum Port<'a> {
    Num(i32),
    Name(&'a str),
}

pub fn meta(ns: &str, name: &str) -> ObjectMeta {
    ObjectMeta { namespace: Some(ns.into()), name: Some(name.into()), ..Default::default() }
}

pub fn backend(service: &str, port: Port<'_>) -> IngressBackend {
    let port = match port {
        Port::Num(n) => ServiceBackendPort { number: Some(n), name: None },
        Port::Name(s) => ServiceBackendPort { number: None, name: Some(s.into()) },
    };
    IngressBackend { service: Some(IngressServiceBackend { name: service.into(), port: Some(port) }), ..Default::default() }
}

pub fn rule(host: &str, paths: Vec<(&str, IngressBackend)>) -> IngressRule {
    IngressRule {
        host: if host.is_empty() { None } else { Some(host.into()) },
        http: Some(HTTPIngressRuleValue {
            paths: paths
                .into_iter()
                .map(|(p, b)| HTTPIngressPath {
                    path: if p.is_empty() { None } else { Some(p.into()) },
                    path_type: "Prefix".into(),
                    backend: b,
                })
                .collect(),
        }),
    }
}

pub fn ingress(ns: &str, name: &str, rules: Vec<IngressRule>) -> Ingress {
    Ingress {
        metadata: meta(ns, name),
        spec: Some(IngressSpec { rules: Some(rules), ..Default::default() }),
        ..Default::default()
    }
}

pub fn default_backend_ingress(ns: &str, name: &str, b: IngressBackend) -> Ingress {
    Ingress {
        metadata: meta(ns, name),
        spec: Some(IngressSpec { default_backend: Some(b), ..Default::default() }),
        ..Default::default()
    }
}

pub fn with_class(mut ing: Ingress, class: &str) -> Ingress {
    ing.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert("kubernetes.io/ingress.class".into(), class.into());
    ing
}

pub fn with_class_name(mut ing: Ingress, class: &str) -> Ingress {
    ing.spec.get_or_insert_with(IngressSpec::default).ingress_class_name = Some(class.into());
    ing
}

pub fn with_tls(mut ing: Ingress, secrets: &[&str]) -> Ingress {
    let spec = ing.spec.get_or_insert_with(IngressSpec::default);
    spec.tls = Some(
        secrets
            .iter()
            .map(|s| IngressTLS { hosts: None, secret_name: if s.is_empty() { None } else { Some(s.to_string()) } })
            .collect(),
    );
    ing
}

fn service_ports(ports: &[(Option<&str>, i32)]) -> Vec<ServicePort> {
    ports
        .iter()
        .map(|(name, port)| ServicePort { name: name.map(str::to_string), port: *port, ..Default::default() })
        .collect()
}

pub fn cluster_service(ns: &str, name: &str, ports: &[(Option<&str>, i32)]) -> Service {
    Service {
        metadata: meta(ns, name),
        spec: Some(ServiceSpec { type_: Some("ClusterIP".into()), ports: Some(service_ports(ports)), ..Default::default() }),
        ..Default::default()
    }
}

pub fn external_service(ns: &str, name: &str, external: &str, ports: &[(Option<&str>, i32)]) -> Service {
    Service {
        metadata: meta(ns, name),
        spec: Some(ServiceSpec {
            type_: Some("ExternalName".into()),
            external_name: Some(external.into()),
            ports: Some(service_ports(ports)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn load_balanced_service(ns: &str, name: &str, ip: Option<&str>, hostname: Option<&str>) -> Service {
    let ingress = if ip.is_none() && hostname.is_none() {
        None
    } else {
        Some(vec![LoadBalancerIngress {
            ip: ip.map(str::to_string),
            hostname: hostname.map(str::to_string),
            ..Default::default()
        }])
    };
    Service {
        metadata: meta(ns, name),
        status: Some(ServiceStatus { load_balancer: Some(LoadBalancerStatus { ingress }), ..Default::default() }),
        ..Default::default()
    }
}

pub struct Subset<'a> {
    pub ips: Vec<&'a str>,
    pub ports: Vec<(Option<&'a str>, i32)>,
}

pub fn endpoints(ns: &str, name: &str, subsets: Vec<Subset<'_>>) -> Endpoints {
    Endpoints {
        metadata: meta(ns, name),
        subsets: Some(
            subsets
                .into_iter()
                .map(|s| EndpointSubset {
                    addresses: Some(
                        s.ips.iter().map(|ip| EndpointAddress { ip: ip.to_string(), ..Default::default() }).collect(),
                    ),
                    ports: Some(
                        s.ports
                            .iter()
                            .map(|(n, p)| EndpointPort { name: n.map(str::to_string), port: *p, ..Default::default() })
                            .collect(),
                    ),
                    ..Default::default()
                })
                .collect(),
        ),
    }
}

pub fn tls_secret(ns: &str, name: &str, entries: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: meta(ns, name),
        data: Some(entries.iter().map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec()))).collect()),
        ..Default::default()
    }
}
