//! In-memory fake cluster implementing [`ResourceClient`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};
use k8s_openapi::api::core::v1::{Endpoints, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{ChangeEvent, ChangeKind, ResourceClient, ResourceKind};

type Key = (String, String);

fn key_of<K: kube::Resource>(obj: &K) -> Key {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

/// Status write captured by [`MemoryClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub namespace: String,
    pub name: String,
    pub ip: Option<String>,
    pub hostname: Option<String>,
}

#[derive(Default)]
struct State {
    ingresses: BTreeMap<Key, Arc<Ingress>>,
    services: BTreeMap<Key, Arc<Service>>,
    endpoints: BTreeMap<Key, Arc<Endpoints>>,
    secrets: BTreeMap<Key, Arc<Secret>>,
    status_updates: Vec<StatusUpdate>,
    failing_lookups: bool,
    watch_failures: usize,
    watch_calls: usize,
    watch_tx: Option<mpsc::Sender<ChangeEvent>>,
}

/// Objects live in ordered maps; watch subscriptions get a buffered channel
/// driven by [`MemoryClient::notify`].
#[derive(Default)]
pub struct MemoryClient {
    state: Mutex<State>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_ingress(&self, obj: Ingress) {
        self.state().ingresses.insert(key_of(&obj), Arc::new(obj));
    }

    pub fn insert_service(&self, obj: Service) {
        self.state().services.insert(key_of(&obj), Arc::new(obj));
    }

    pub fn insert_endpoints(&self, obj: Endpoints) {
        self.state().endpoints.insert(key_of(&obj), Arc::new(obj));
    }

    pub fn insert_secret(&self, obj: Secret) {
        self.state().secrets.insert(key_of(&obj), Arc::new(obj));
    }

    pub fn remove_ingress(&self, namespace: &str, name: &str) {
        self.state().ingresses.remove(&(namespace.to_string(), name.to_string()));
    }

    /// Make every service/endpoints/secret lookup fail with a client error.
    pub fn set_failing_lookups(&self, on: bool) {
        self.state().failing_lookups = on;
    }

    /// Make the next `n` calls to `watch_all` fail.
    pub fn fail_next_watches(&self, n: usize) {
        self.state().watch_failures = n;
    }

    pub fn watch_calls(&self) -> usize {
        self.state().watch_calls
    }

    pub fn status_updates(&self) -> Vec<StatusUpdate> {
        self.state().status_updates.clone()
    }

    /// Deliver a change notification to the current subscription.
    ///
    /// Returns false when there is no live subscription.
    pub async fn notify(&self, kind: ResourceKind, namespace: &str, name: &str) -> bool {
        let tx = self.state().watch_tx.clone();
        let Some(tx) = tx else { return false };
        let ev = ChangeEvent {
            kind,
            change: ChangeKind::Applied,
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        };
        tx.send(ev).await.is_ok()
    }

    /// End the current subscription's change stream.
    pub fn close_watch(&self) {
        self.state().watch_tx = None;
    }

    fn get<K>(&self, pick: impl FnOnce(&State) -> Option<Arc<K>>) -> Result<Option<Arc<K>>> {
        let state = self.state();
        if state.failing_lookups {
            return Err(anyhow!("memory client: lookups disabled"));
        }
        Ok(pick(&state))
    }
}

#[async_trait::async_trait]
impl ResourceClient for MemoryClient {
    fn ingresses(&self) -> Vec<Arc<Ingress>> {
        self.state().ingresses.values().cloned().collect()
    }

    fn service(&self, namespace: &str, name: &str) -> Result<Option<Arc<Service>>> {
        let key = (namespace.to_string(), name.to_string());
        self.get(|s| s.services.get(&key).cloned())
    }

    fn endpoints(&self, namespace: &str, name: &str) -> Result<Option<Arc<Endpoints>>> {
        let key = (namespace.to_string(), name.to_string());
        self.get(|s| s.endpoints.get(&key).cloned())
    }

    fn secret(&self, namespace: &str, name: &str) -> Result<Option<Arc<Secret>>> {
        let key = (namespace.to_string(), name.to_string());
        self.get(|s| s.secrets.get(&key).cloned())
    }

    async fn watch_all(&self, _namespaces: &[String], _stop: CancellationToken) -> Result<mpsc::Receiver<ChangeEvent>> {
        let mut state = self.state();
        state.watch_calls += 1;
        if state.watch_failures > 0 {
            state.watch_failures -= 1;
            return Err(anyhow!("memory client: watch refused"));
        }
        let (tx, rx) = mpsc::channel(16);
        state.watch_tx = Some(tx);
        Ok(rx)
    }

    async fn update_ingress_status(
        &self,
        namespace: &str,
        name: &str,
        ip: Option<&str>,
        hostname: Option<&str>,
    ) -> Result<()> {
        self.state().status_updates.push(StatusUpdate {
            namespace: namespace.to_string(),
            name: name.to_string(),
            ip: ip.map(str::to_string),
            hostname: hostname.map(str::to_string),
        });
        Ok(())
    }
}
