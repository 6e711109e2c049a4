//! Provider settings as read from flags, env or a YAML file.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("invalid ingress label selector: {0:?}")]
    LabelSelector(String),
    #[error("invalid publishedService format (expected 'namespace/service' format): {0}")]
    PublishedService(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    /// Kubernetes server endpoint (required for an external cluster client).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Bearer token (not needed in-cluster).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Certificate authority file path (not needed in-cluster).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_auth_file_path: Option<String>,
    pub disable_pass_host_headers: bool,
    /// Namespaces to watch; empty means all.
    pub namespaces: Vec<String>,
    /// Label selector applied to the Ingress watch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<String>,
    /// Value of the ingress class to process; empty means the default class.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_endpoint: Option<EndpointIngress>,
}

/// Address published onto Ingress status.
///
/// `published_service` wins over `ip`/`hostname` when set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointIngress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_service: Option<String>,
}

impl EndpointIngress {
    /// Split `published_service` into `(namespace, name)`.
    pub fn published_service_ref(&self) -> Option<Result<(&str, &str), SettingsError>> {
        let raw = self.published_service.as_deref().filter(|s| !s.is_empty())?;
        let parts: Vec<&str> = raw.split('/').collect();
        Some(match parts.as_slice() {
            [ns, name] => Ok((*ns, *name)),
            _ => Err(SettingsError::PublishedService(raw.to_string())),
        })
    }
}

impl ProviderSettings {
    pub fn ingress_class(&self) -> Option<&str> {
        self.ingress_class.as_deref().filter(|s| !s.is_empty())
    }

    pub fn label_selector(&self) -> Option<&str> {
        self.label_selector.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Checks that can fail before talking to the cluster.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if let Some(sel) = self.label_selector() {
            if !is_valid_label_selector(sel) {
                return Err(SettingsError::LabelSelector(sel.to_string()));
            }
        }
        Ok(())
    }
}

/// Loose grammar check of a label selector: `k`, `!k`, `k=v`, `k==v`, `k!=v`,
/// `k in (a,b)`, `k notin (a,b)`, comma separated.
pub fn is_valid_label_selector(selector: &str) -> bool {
    match selector_term() {
        Some(re) => split_terms(selector).iter().all(|t| re.is_match(t)),
        None => false,
    }
}

fn selector_term() -> Option<&'static Regex> {
    static TERM: OnceLock<Option<Regex>> = OnceLock::new();
    TERM.get_or_init(|| {
        let key = r"(?:[A-Za-z0-9][-A-Za-z0-9_.]*/)?[A-Za-z0-9](?:[-A-Za-z0-9_.]*[A-Za-z0-9])?";
        let value = r"(?:[A-Za-z0-9](?:[-A-Za-z0-9_.]*[A-Za-z0-9])?)?";
        let term = format!(
            r"^\s*(?:!\s*{key}|{key}\s*(?:(?:==|=|!=)\s*{value}|\s(?:in|notin)\s*\(\s*{value}(?:\s*,\s*{value})*\s*\))?)\s*$",
            key = key,
            value = value
        );
        Regex::new(&term).ok()
    })
    .as_ref()
}

// Commas inside `in (...)` sets do not separate terms.
fn split_terms(selector: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&selector[start..]);
    out
}
