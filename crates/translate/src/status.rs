//! Mirror the proxy's reachable address onto Ingress status.

use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use tracing::debug;
use waypost_core::EndpointIngress;
use waypost_kubehub::ResourceClient;

use crate::error::StatusError;

/// No-op without endpoint settings. A published service without a
/// load-balancer address yet is skipped, not an error.
pub async fn update_ingress_status<C: ResourceClient + ?Sized>(
    client: &C,
    ingress: &Ingress,
    endpoint: Option<&EndpointIngress>,
) -> Result<(), StatusError> {
    let Some(endpoint) = endpoint else { return Ok(()) };
    let namespace = ingress.namespace().unwrap_or_default();
    let name = ingress.name_any();

    let (ip, hostname) = match endpoint.published_service_ref() {
        None => {
            let ip = endpoint.ip.as_deref().filter(|s| !s.is_empty());
            let hostname = endpoint.hostname.as_deref().filter(|s| !s.is_empty());
            if ip.is_none() && hostname.is_none() {
                return Err(StatusError::InvalidConfig("publishedService or ip or hostname must be defined".into()));
            }
            (ip.map(str::to_string), hostname.map(str::to_string))
        }
        Some(Err(e)) => return Err(StatusError::InvalidConfig(e.to_string())),
        Some(Ok((svc_ns, svc_name))) => {
            let published = format!("{}/{}", svc_ns, svc_name);
            let service = client
                .service(svc_ns, svc_name)
                .map_err(|source| StatusError::Lookup { service: published.clone(), source })?
                .ok_or_else(|| StatusError::NotFound(published.clone()))?;
            let first = service
                .status
                .as_ref()
                .and_then(|s| s.load_balancer.as_ref())
                .and_then(|lb| lb.ingress.as_ref())
                .and_then(|v| v.first());
            let Some(first) = first else {
                debug!(ns = %namespace, ingress = %name, service = %published, "skipping status update: service has no load-balancer address yet");
                return Ok(());
            };
            (first.ip.clone(), first.hostname.clone())
        }
    };

    client
        .update_ingress_status(&namespace, &name, ip.as_deref(), hostname.as_deref())
        .await
        .map_err(|source| StatusError::Update { ingress: format!("{}/{}", namespace, name), source })
}
