//! Waypost kubehub: read access to cluster resources, change notifications
//! and Ingress status writes.
//!
//! [`ResourceClient`] is the seam the translator and the reconciliation loop
//! depend on. [`KubeClient`] backs it with kube-rs reflectors; [`MemoryClient`]
//! is a fake cluster for tests and dry runs.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Result;
use k8s_openapi::api::core::v1::{Endpoints, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod kube_client;
mod memory;

pub use kube_client::{connect, KubeClient};
pub use memory::{MemoryClient, StatusUpdate};

/// Kind of object a change notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Ingress,
    Service,
    Endpoints,
    Secret,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Ingress => "ingress",
            ResourceKind::Service => "service",
            ResourceKind::Endpoints => "endpoints",
            ResourceKind::Secret => "secret",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Applied,
    Deleted,
    /// The watch (re)listed everything; `name` is empty.
    Resynced,
}

/// A notification that something the translation depends on may have changed.
///
/// It carries no payload: receivers re-read the full snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ResourceKind,
    pub change: ChangeKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ChangeEvent {
    pub fn for_object<K: kube::Resource>(kind: ResourceKind, change: ChangeKind, obj: &K) -> Self {
        Self { kind, change, namespace: obj.namespace(), name: obj.name_any() }
    }

    pub fn resynced(kind: ResourceKind, namespace: Option<&str>) -> Self {
        Self { kind, change: ChangeKind::Resynced, namespace: namespace.map(str::to_string), name: String::new() }
    }
}

/// Capabilities consumed from the cluster.
///
/// Lookups return `Ok(None)` when the object does not exist; `Err` is
/// reserved for failures to answer at all.
#[async_trait::async_trait]
pub trait ResourceClient: Send + Sync {
    /// Every Ingress currently visible (namespace allow-list and label selector applied).
    fn ingresses(&self) -> Vec<Arc<Ingress>>;

    fn service(&self, namespace: &str, name: &str) -> Result<Option<Arc<Service>>>;

    fn endpoints(&self, namespace: &str, name: &str) -> Result<Option<Arc<Endpoints>>>;

    fn secret(&self, namespace: &str, name: &str) -> Result<Option<Arc<Secret>>>;

    /// Start watching `namespaces` (all when empty). The stream ends when
    /// `stop` fires or the watch dies.
    async fn watch_all(&self, namespaces: &[String], stop: CancellationToken) -> Result<mpsc::Receiver<ChangeEvent>>;

    /// Mirror a reachable address onto the Ingress status.
    async fn update_ingress_status(
        &self,
        namespace: &str,
        name: &str,
        ip: Option<&str>,
        hostname: Option<&str>,
    ) -> Result<()>;
}

#[async_trait::async_trait]
impl<C: ResourceClient + ?Sized> ResourceClient for Arc<C> {
    fn ingresses(&self) -> Vec<Arc<Ingress>> {
        (**self).ingresses()
    }

    fn service(&self, namespace: &str, name: &str) -> Result<Option<Arc<Service>>> {
        (**self).service(namespace, name)
    }

    fn endpoints(&self, namespace: &str, name: &str) -> Result<Option<Arc<Endpoints>>> {
        (**self).endpoints(namespace, name)
    }

    fn secret(&self, namespace: &str, name: &str) -> Result<Option<Arc<Secret>>> {
        (**self).secret(namespace, name)
    }

    async fn watch_all(&self, namespaces: &[String], stop: CancellationToken) -> Result<mpsc::Receiver<ChangeEvent>> {
        (**self).watch_all(namespaces, stop).await
    }

    async fn update_ingress_status(
        &self,
        namespace: &str,
        name: &str,
        ip: Option<&str>,
        hostname: Option<&str>,
    ) -> Result<()> {
        (**self).update_ingress_status(namespace, name, ip, hostname).await
    }
}
