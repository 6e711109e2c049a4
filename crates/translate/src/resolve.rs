//! Service resolution: backend reference -> upstream target set.

use k8s_openapi::api::core::v1::{Service, ServicePort};
use k8s_openapi::api::networking::v1::IngressBackend;
use tracing::debug;
use waypost_core::{LoadBalancerService, PortSelector, Server};
use waypost_kubehub::ResourceClient;

use crate::error::ResolveError;

/// How a service is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind<'a> {
    /// DNS alias for an external name; never has endpoints.
    ExternalName(&'a str),
    /// Backed by endpoint subsets.
    Cluster,
}

impl<'a> ServiceKind<'a> {
    pub fn of(service: &'a Service) -> Result<Self, ResolveError> {
        let Some(spec) = service.spec.as_ref() else { return Ok(ServiceKind::Cluster) };
        if spec.type_.as_deref() != Some("ExternalName") {
            return Ok(ServiceKind::Cluster);
        }
        match spec.external_name.as_deref().filter(|s| !s.is_empty()) {
            Some(name) => Ok(ServiceKind::ExternalName(name)),
            None => Err(ResolveError::InvalidBackend(format!(
                "service {} is ExternalName without an external name",
                service.metadata.name.as_deref().unwrap_or("")
            ))),
        }
    }
}

/// Extract `(service name, port selector)` from an Ingress backend.
pub fn backend_ref(backend: &IngressBackend) -> Result<(String, PortSelector), ResolveError> {
    let svc = backend
        .service
        .as_ref()
        .ok_or_else(|| ResolveError::InvalidBackend("backend does not reference a service".into()))?;
    let port = svc.port.as_ref();
    let selector = match (port.and_then(|p| p.number), port.and_then(|p| p.name.as_deref())) {
        (Some(n), _) => PortSelector::Number(n),
        (None, Some(name)) if !name.is_empty() => PortSelector::Name(name.to_string()),
        _ => return Err(ResolveError::InvalidBackend(format!("backend service {} has no port", svc.name))),
    };
    Ok((svc.name.clone(), selector))
}

/// Resolve `namespace/name` at `port` into the servers the proxy should balance over.
pub fn resolve_service<C: ResourceClient + ?Sized>(
    client: &C,
    namespace: &str,
    name: &str,
    port: &PortSelector,
) -> Result<LoadBalancerService, ResolveError> {
    let service = client
        .service(namespace, name)?
        .ok_or_else(|| ResolveError::NotFound(format!("service {}/{}", namespace, name)))?;
    let matched = service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_deref())
        .unwrap_or_default()
        .iter()
        .find(|p| port.matches(p.name.as_deref(), p.port))
        .ok_or_else(|| ResolveError::PortMismatch { service: format!("{}/{}", namespace, name), port: port.to_string() })?;

    let servers = match ServiceKind::of(&service)? {
        ServiceKind::ExternalName(external) => vec![Server::new("http", external, matched.port)],
        ServiceKind::Cluster => cluster_servers(client, namespace, name, matched)?,
    };
    Ok(LoadBalancerService::new(servers))
}

fn cluster_servers<C: ResourceClient + ?Sized>(
    client: &C,
    namespace: &str,
    name: &str,
    matched: &ServicePort,
) -> Result<Vec<Server>, ResolveError> {
    let endpoints = client
        .endpoints(namespace, name)?
        .ok_or_else(|| ResolveError::NotFound(format!("endpoints {}/{}", namespace, name)))?;
    let port_name = matched.name.as_deref().unwrap_or("");

    let mut servers = Vec::new();
    let mut eligible = 0usize;
    for (idx, subset) in endpoints.subsets.iter().flatten().enumerate() {
        let port = subset
            .ports
            .iter()
            .flatten()
            .find(|p| p.name.as_deref().unwrap_or("") == port_name && p.port != 0)
            .map(|p| p.port);
        let Some(port) = port else {
            debug!(ns = %namespace, service = %name, subset = idx, port_name = %port_name, "subset does not expose the service port");
            continue;
        };
        eligible += 1;
        let scheme = if port == 443 || port_name.starts_with("https") { "https" } else { "http" };
        for addr in subset.addresses.iter().flatten() {
            servers.push(Server::new(scheme, &addr.ip, port));
        }
    }
    if eligible == 0 {
        return Err(ResolveError::NoSubsets(format!("{}/{}", namespace, name)));
    }
    Ok(servers)
}
