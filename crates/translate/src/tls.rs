//! TLS secret aggregation for one translation pass.

use k8s_openapi::api::core::v1::Secret;
use rustc_hash::FxHashMap;
use waypost_core::Certificate;
use waypost_kubehub::ResourceClient;

use crate::error::TlsError;

const TLS_CRT: &str = "tls.crt";
const TLS_KEY: &str = "tls.key";

/// Collects at most one certificate per `namespace/secret` within a pass.
#[derive(Debug, Default)]
pub struct TlsCollector {
    entries: FxHashMap<String, Certificate>,
}

impl TlsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch and validate `namespace/secret_name` unless it was already
    /// collected. Returns whether a fetch happened.
    pub fn collect<C: ResourceClient + ?Sized>(
        &mut self,
        client: &C,
        namespace: &str,
        secret_name: &str,
    ) -> Result<bool, TlsError> {
        let key = format!("{}/{}", namespace, secret_name);
        if self.entries.contains_key(&key) {
            return Ok(false);
        }
        let secret = client
            .secret(namespace, secret_name)
            .map_err(|source| TlsError::Fetch { secret: key.clone(), source })?
            .ok_or_else(|| TlsError::NotFound(key.clone()))?;
        let (cert_file, key_file) = certificate_blocks(&secret, &key)?;
        self.entries.insert(key, Certificate { cert_file, key_file });
        Ok(true)
    }

    /// Certificates ordered by `namespace/secret` so output is independent of map order.
    pub fn into_certificates(self) -> Vec<Certificate> {
        let mut entries: Vec<(String, Certificate)> = self.entries.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, c)| c).collect()
    }
}

/// Pull the PEM certificate and key out of a TLS secret.
pub fn certificate_blocks(secret: &Secret, secret_ref: &str) -> Result<(String, String), TlsError> {
    let mut missing = Vec::new();
    let mut empty = Vec::new();
    let mut block = |entry: &'static str| -> Option<String> {
        match secret.data.as_ref().and_then(|d| d.get(entry)) {
            None => {
                missing.push(entry);
                None
            }
            Some(bytes) if bytes.0.is_empty() => {
                empty.push(entry);
                None
            }
            Some(bytes) => Some(String::from_utf8_lossy(&bytes.0).into_owned()),
        }
    };
    let cert = block(TLS_CRT);
    let key = block(TLS_KEY);
    match (cert, key) {
        (Some(cert), Some(key)) => Ok((cert, key)),
        _ => Err(TlsError::InvalidData { secret: secret_ref.to_string(), missing, empty }),
    }
}
