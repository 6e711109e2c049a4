//! Ingress translator.

use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::networking::v1::{Ingress, IngressBackend};
use kube::ResourceExt;
use metrics::{counter, histogram};
use tracing::{debug, error};
use waypost_core::{
    match_rule, router_key, service_key, Configuration, ProviderSettings, Router, Service, TlsConfiguration,
    DEFAULT_BACKEND_ROUTER, DEFAULT_BACKEND_SERVICE,
};
use waypost_kubehub::ResourceClient;

use crate::quote::check_quote_validity;
use crate::resolve::{backend_ref, resolve_service};
use crate::status::update_ingress_status;
use crate::tls::TlsCollector;

pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

/// Class processed when no class is configured.
pub const DEFAULT_INGRESS_CLASS: &str = "waypost";

/// Class of an Ingress as carried by its annotation. `spec.ingressClassName` is not consulted.
pub fn ingress_class_of(ingress: &Ingress) -> Option<&str> {
    ingress.annotations().get(INGRESS_CLASS_ANNOTATION).map(String::as_str)
}

/// Exact match against the configured class; with no class configured,
/// unclassified resources and the default class are both taken.
pub fn should_process_ingress(configured: Option<&str>, class: Option<&str>) -> bool {
    let configured = configured.unwrap_or("");
    let class = class.unwrap_or("");
    configured == class || (configured.is_empty() && class == DEFAULT_INGRESS_CLASS)
}

fn error_kind(kind: &'static str) {
    counter!("translate_errors_total", 1u64, "kind" => kind);
}

pub struct Translator<'a, C: ?Sized> {
    client: &'a C,
    settings: &'a ProviderSettings,
}

impl<'a, C: ResourceClient + ?Sized> Translator<'a, C> {
    pub fn new(client: &'a C, settings: &'a ProviderSettings) -> Self {
        Self { client, settings }
    }

    /// Translate whatever the client currently sees.
    pub async fn translate(&self) -> Configuration {
        let snapshot = self.client.ingresses();
        self.translate_snapshot(&snapshot).await
    }

    pub async fn translate_snapshot(&self, snapshot: &[Arc<Ingress>]) -> Configuration {
        let started = Instant::now();
        let mut conf = Configuration::default();
        let mut tls = TlsCollector::new();

        let mut ordered: Vec<&Ingress> = snapshot.iter().map(Arc::as_ref).collect();
        ordered.sort_by_cached_key(|i| (i.namespace().unwrap_or_default(), i.name_any()));

        let mut processed = 0usize;
        for ingress in ordered {
            if !should_process_ingress(self.settings.ingress_class(), ingress_class_of(ingress)) {
                continue;
            }
            processed += 1;
            self.load_ingress(ingress, &mut conf, &mut tls);
            if let Err(e) = update_ingress_status(self.client, ingress, self.settings.ingress_endpoint.as_ref()).await {
                error_kind("status");
                error!(ns = ?ingress.namespace(), ingress = %ingress.name_any(), error = %e, "error while updating ingress status");
            }
        }

        let certificates = tls.into_certificates();
        if !certificates.is_empty() {
            conf.tls = Some(TlsConfiguration { certificates });
        }
        histogram!("translate_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(
            ingresses = snapshot.len(),
            processed,
            routers = conf.http.routers.len(),
            services = conf.http.services.len(),
            "translation done"
        );
        conf
    }

    fn load_ingress(&self, ingress: &Ingress, conf: &mut Configuration, tls: &mut TlsCollector) {
        let ns = ingress.namespace().unwrap_or_default();
        let name = ingress.name_any();
        let Some(spec) = ingress.spec.as_ref() else { return };

        for section in spec.tls.iter().flatten() {
            let Some(secret_name) = section.secret_name.as_deref().filter(|s| !s.is_empty()) else {
                debug!(ns = %ns, ingress = %name, "skipping TLS sub-section: no secret name provided");
                continue;
            };
            if let Err(e) = tls.collect(self.client, &ns, secret_name) {
                error_kind("tls");
                error!(ns = %ns, ingress = %name, error = %e, "error configuring TLS");
            }
        }

        let rules = spec.rules.as_deref().unwrap_or_default();
        if rules.is_empty() {
            if let Some(backend) = spec.default_backend.as_ref() {
                self.load_default_backend(&ns, &name, backend, conf);
            }
            return;
        }

        for rule in rules {
            let host = rule.host.as_deref().unwrap_or("");
            if let Err(e) = check_quote_validity(host) {
                error_kind("validation");
                error!(ns = %ns, ingress = %name, host = %host, error = %e, "invalid syntax for host");
                continue;
            }
            for path in rule.http.iter().flat_map(|h| h.paths.iter()) {
                let p = path.path.as_deref().unwrap_or("");
                if let Err(e) = check_quote_validity(p) {
                    error_kind("validation");
                    error!(ns = %ns, ingress = %name, path = %p, error = %e, "invalid syntax for path");
                    continue;
                }
                let (service_name, port) = match backend_ref(&path.backend) {
                    Ok(r) => r,
                    Err(e) => {
                        error_kind("service");
                        error!(ns = %ns, ingress = %name, error = %e, "cannot create service");
                        continue;
                    }
                };
                let load_balancer = match resolve_service(self.client, &ns, &service_name, &port) {
                    Ok(lb) => lb,
                    Err(e) => {
                        error_kind("service");
                        error!(ns = %ns, ingress = %name, service = %service_name, port = %port, error = %e, "cannot create service");
                        continue;
                    }
                };
                let key = service_key(&ns, &service_name, &port);
                conf.http.routers.insert(
                    router_key(host, p),
                    Router { rule: match_rule(host, p), service: key.clone(), priority: None },
                );
                conf.http.services.insert(key, Service { load_balancer });
            }
        }
    }

    fn load_default_backend(&self, ns: &str, name: &str, backend: &IngressBackend, conf: &mut Configuration) {
        if conf.http.services.contains_key(DEFAULT_BACKEND_SERVICE) {
            error_kind("default_backend");
            error!(ns = %ns, ingress = %name, "the default backend already exists");
            return;
        }
        let resolved = backend_ref(backend).and_then(|(service_name, port)| resolve_service(self.client, ns, &service_name, &port));
        let load_balancer = match resolved {
            Ok(lb) => lb,
            Err(e) => {
                error_kind("service");
                error!(ns = %ns, ingress = %name, error = %e, "cannot create default backend service");
                return;
            }
        };
        conf.http.routers.insert(
            DEFAULT_BACKEND_ROUTER.to_string(),
            Router { rule: match_rule("", "/"), service: DEFAULT_BACKEND_SERVICE.to_string(), priority: Some(i32::MIN) },
        );
        conf.http.services.insert(DEFAULT_BACKEND_SERVICE.to_string(), Service { load_balancer });
    }
}
