use thiserror::Error;

/// Host or path rejected by the quoting check.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuoteError {
    #[error("unescaped quote at offset {at}")]
    BareQuote { at: usize },
    #[error("control character {ch:?} at offset {at}")]
    Control { ch: char, at: usize },
    #[error("invalid escape sequence at offset {at}")]
    Escape { at: usize },
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("service {service} has no port matching {port}")]
    PortMismatch { service: String, port: String },
    #[error("endpoints {0} have no subset exposing the service port")]
    NoSubsets(String),
    #[error("invalid backend: {0}")]
    InvalidBackend(String),
    #[error(transparent)]
    Client(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to fetch secret {secret}: {source}")]
    Fetch {
        secret: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("secret {0} does not exist")]
    NotFound(String),
    #[error("secret {secret} {}", describe_entries(.missing, .empty))]
    InvalidData { secret: String, missing: Vec<&'static str>, empty: Vec<&'static str> },
}

fn describe_entries(missing: &[&str], empty: &[&str]) -> String {
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("is missing the following TLS data entries: {}", missing.join(", ")));
    }
    if !empty.is_empty() {
        parts.push(format!("contains the following empty TLS data entries: {}", empty.join(", ")));
    }
    parts.join("; ")
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("invalid endpoint configuration: {0}")]
    InvalidConfig(String),
    #[error("missing service: {0}")]
    NotFound(String),
    #[error("cannot get service {service}: {source}")]
    Lookup {
        service: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("updating status of ingress {ingress}: {source}")]
    Update {
        ingress: String,
        #[source]
        source: anyhow::Error,
    },
}
