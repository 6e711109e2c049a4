//! Waypost core types: the routing configuration handed to the proxy engine.
//!
//! Everything in here is plain data. Maps are ordered so two structurally equal
//! configurations also serialize identically, which keeps downstream diffs quiet.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod keys;
pub mod settings;

pub use keys::{match_rule, router_key, service_key, PortSelector};
pub use settings::{EndpointIngress, ProviderSettings, SettingsError};

/// Name the provider reports on every emitted message.
pub const PROVIDER_NAME: &str = "kubernetes";

/// Service key shared by the single no-rule default backend.
pub const DEFAULT_BACKEND_SERVICE: &str = "default-backend";

/// Router key of the default backend router.
pub const DEFAULT_BACKEND_ROUTER: &str = "/";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub http: HttpConfiguration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfiguration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfiguration {
    pub routers: BTreeMap<String, Router>,
    pub services: BTreeMap<String, Service>,
}

/// Binds a match rule to a service key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Router {
    pub rule: String,
    pub service: String,
    /// Only set for the default backend, which must lose against any specific rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub load_balancer: LoadBalancerService,
}

/// Resolved upstream target set for one service key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerService {
    pub servers: Vec<Server>,
    pub pass_host_header: bool,
}

impl LoadBalancerService {
    pub fn new(servers: Vec<Server>) -> Self {
        Self { servers, pass_host_header: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub url: String,
}

impl Server {
    pub fn new(scheme: &str, host: &str, port: i32) -> Self {
        Self { url: format!("{}://{}:{}", scheme, host, port) }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfiguration {
    pub certificates: Vec<Certificate>,
}

/// PEM material of one TLS secret.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub cert_file: String,
    pub key_file: String,
}

/// Unit emitted downstream whenever the computed configuration changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub provider_name: String,
    pub configuration: Configuration,
}

impl Message {
    pub fn new(configuration: Configuration) -> Self {
        Self { provider_name: PROVIDER_NAME.to_string(), configuration }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_url_is_scheme_host_port() {
        assert_eq!(Server::new("https", "10.0.0.1", 443).url, "https://10.0.0.1:443");
    }

    #[test]
    fn empty_tls_is_not_serialized() {
        let v = serde_json::to_value(Configuration::default()).unwrap();
        assert!(v.get("tls").is_none());
        assert!(v["http"]["routers"].as_object().unwrap().is_empty());
    }

    #[test]
    fn message_carries_provider_name() {
        let m = Message::new(Configuration::default());
        assert_eq!(m.provider_name, "kubernetes");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["providerName"], "kubernetes");
    }

    #[test]
    fn load_balancer_passes_host_header() {
        let lb = LoadBalancerService::new(vec![Server::new("http", "a", 1)]);
        assert!(lb.pass_host_header);
        let v = serde_json::to_value(&lb).unwrap();
        assert_eq!(v["passHostHeader"], true);
    }
}
