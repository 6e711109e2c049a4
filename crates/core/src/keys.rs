//! Router/service key synthesis and match-rule rendering.
//!
//! Keys are plain strings consumed by the proxy's key grammar, where `.` is a
//! separator, so dots coming from hosts and names are replaced by `-`.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Port reference of a backend: by number or by port name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSelector {
    Number(i32),
    Name(String),
}

impl PortSelector {
    /// True if a service port `(name, number)` is the one this selector points at.
    pub fn matches(&self, name: Option<&str>, number: i32) -> bool {
        match self {
            PortSelector::Number(n) => *n == number,
            PortSelector::Name(s) => name == Some(s.as_str()),
        }
    }
}

impl fmt::Display for PortSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSelector::Number(n) => write!(f, "{}", n),
            PortSelector::Name(s) => f.write_str(s),
        }
    }
}

fn sanitize(s: &str) -> String {
    s.replace('.', "-")
}

/// `example.com` + `/api` -> `example-com/api`
pub fn router_key(host: &str, path: &str) -> String {
    let mut key = sanitize(host);
    key.push_str(path);
    key
}

/// `ns/name/port` with every `.` replaced, so two ports of one service never collide.
pub fn service_key(namespace: &str, service: &str, port: &PortSelector) -> String {
    sanitize(&format!("{}/{}/{}", namespace, service, port))
}

/// Host and path-prefix clauses joined by `&&`; empty parts are left out.
pub fn match_rule(host: &str, path: &str) -> String {
    let mut clauses: SmallVec<[String; 2]> = SmallVec::new();
    if !host.is_empty() {
        clauses.push(format!("Host(`{}`)", host));
    }
    if !path.is_empty() {
        clauses.push(format!("PathPrefix(`{}`)", path));
    }
    clauses.join(" && ")
}
