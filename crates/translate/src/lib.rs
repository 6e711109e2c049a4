//! Waypost translate: Ingress snapshot -> routing configuration.
//!
//! [`Translator`] walks the snapshot and leans on the service resolver, the
//! TLS collector and the status reconciler. One bad resource never aborts a
//! pass; its error is logged and only the affected router/service/certificate
//! is left out.

#![forbid(unsafe_code)]

mod error;
mod ingress;
mod quote;
mod resolve;
mod status;
mod tls;

pub use error::{QuoteError, ResolveError, StatusError, TlsError};
pub use ingress::{ingress_class_of, should_process_ingress, Translator, DEFAULT_INGRESS_CLASS, INGRESS_CLASS_ANNOTATION};
pub use quote::check_quote_validity;
pub use resolve::{backend_ref, resolve_service, ServiceKind};
pub use status::update_ingress_status;
pub use tls::{certificate_blocks, TlsCollector};
