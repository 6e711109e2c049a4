//! kube-rs backed [`ResourceClient`]: one reflector per kind and namespace.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use arc_swap::ArcSwap;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, IngressLoadBalancerIngress, IngressLoadBalancerStatus, IngressStatus};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, ListParams, Patch, PatchParams},
    runtime::{
        reflector::{self, ObjectRef, Store},
        watcher::{self, Event},
        WatchStreamExt,
    },
    Client, Resource,
};
use metrics::counter;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use waypost_core::ProviderSettings;

use crate::{ChangeEvent, ChangeKind, ResourceClient, ResourceKind};

/// How long a fresh subscription may take to list every watched kind.
const CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct Caches {
    ingresses: Vec<Store<Ingress>>,
    services: Vec<Store<Service>>,
    endpoints: Vec<Store<Endpoints>>,
    secrets: Vec<Store<Secret>>,
}

fn lookup<K>(stores: &[Store<K>], namespace: &str, name: &str) -> Option<Arc<K>>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    let key = ObjectRef::<K>::new(name).within(namespace);
    stores.iter().find_map(|s| s.get(&key))
}

pub struct KubeClient {
    client: Client,
    label_selector: Option<String>,
    caches: ArcSwap<Caches>,
}

impl KubeClient {
    pub fn new(client: Client, label_selector: Option<String>) -> Self {
        Self { client, label_selector, caches: ArcSwap::from_pointee(Caches::default()) }
    }

    fn api<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    /// Spawn a reflector feeding `tx`; `ready` fires once the first full list landed in the store.
    fn spawn_reflector<K>(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        config: watcher::Config,
        tx: mpsc::Sender<ChangeEvent>,
        ready: oneshot::Sender<()>,
        stop: CancellationToken,
    ) -> Store<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + DeserializeOwned
            + Send
            + Sync
            + 'static,
    {
        let api = self.api::<K>(namespace);
        let (reader, writer) = reflector::store::<K>();
        let stream = reflector::reflector(writer, watcher::watcher(api, config).default_backoff());
        let ns = namespace.map(str::to_string);
        tokio::spawn(async move {
            futures::pin_mut!(stream);
            let mut ready = Some(ready);
            debug!(kind = kind.as_str(), ns = ?ns, "watch started");
            loop {
                let next = tokio::select! {
                    _ = stop.cancelled() => break,
                    next = stream.next() => next,
                };
                let change = match next {
                    Some(Ok(Event::Applied(o))) => ChangeEvent::for_object(kind, ChangeKind::Applied, &o),
                    Some(Ok(Event::Deleted(o))) => ChangeEvent::for_object(kind, ChangeKind::Deleted, &o),
                    Some(Ok(Event::Restarted(list))) => {
                        debug!(kind = kind.as_str(), ns = ?ns, count = list.len(), "watch restart");
                        if let Some(r) = ready.take() {
                            let _ = r.send(());
                        }
                        ChangeEvent::resynced(kind, ns.as_deref())
                    }
                    Some(Err(e)) => {
                        warn!(kind = kind.as_str(), ns = ?ns, error = %e, "watch error");
                        counter!("kubehub_watch_errors_total", 1u64, "kind" => kind.as_str());
                        continue;
                    }
                    None => break,
                };
                // Single slot: when an event is already pending, the receiver will re-read everything anyway.
                if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(change) {
                    break;
                }
            }
            debug!(kind = kind.as_str(), ns = ?ns, "watch stopped");
        });
        reader
    }
}

#[async_trait::async_trait]
impl ResourceClient for KubeClient {
    fn ingresses(&self) -> Vec<Arc<Ingress>> {
        self.caches.load().ingresses.iter().flat_map(|s| s.state()).collect()
    }

    fn service(&self, namespace: &str, name: &str) -> Result<Option<Arc<Service>>> {
        Ok(lookup(&self.caches.load().services, namespace, name))
    }

    fn endpoints(&self, namespace: &str, name: &str) -> Result<Option<Arc<Endpoints>>> {
        Ok(lookup(&self.caches.load().endpoints, namespace, name))
    }

    fn secret(&self, namespace: &str, name: &str) -> Result<Option<Arc<Secret>>> {
        Ok(lookup(&self.caches.load().secrets, namespace, name))
    }

    async fn watch_all(&self, namespaces: &[String], stop: CancellationToken) -> Result<mpsc::Receiver<ChangeEvent>> {
        let scopes: Vec<Option<&str>> =
            if namespaces.is_empty() { vec![None] } else { namespaces.iter().map(|s| Some(s.as_str())).collect() };

        // Surface connection/RBAC problems here so the caller backs off.
        for ns in &scopes {
            self.api::<Ingress>(*ns)
                .list(&ListParams::default().limit(1))
                .await
                .with_context(|| format!("listing ingresses in {}", ns.unwrap_or("all namespaces")))?;
        }

        let (tx, rx) = mpsc::channel::<ChangeEvent>(1);
        let mut readies = Vec::new();
        let mut caches = Caches::default();
        let mut ready = || {
            let (t, r) = oneshot::channel::<()>();
            readies.push(r);
            t
        };
        let ingress_cfg = match self.label_selector.as_deref() {
            Some(sel) => watcher::Config::default().labels(sel),
            None => watcher::Config::default(),
        };
        for ns in &scopes {
            caches.ingresses.push(self.spawn_reflector(ResourceKind::Ingress, *ns, ingress_cfg.clone(), tx.clone(), ready(), stop.clone()));
            caches.services.push(self.spawn_reflector(ResourceKind::Service, *ns, watcher::Config::default(), tx.clone(), ready(), stop.clone()));
            caches.endpoints.push(self.spawn_reflector(ResourceKind::Endpoints, *ns, watcher::Config::default(), tx.clone(), ready(), stop.clone()));
            caches.secrets.push(self.spawn_reflector(ResourceKind::Secret, *ns, watcher::Config::default(), tx.clone(), ready(), stop.clone()));
        }
        drop(tx);

        let synced = tokio::time::timeout(CACHE_SYNC_TIMEOUT, futures::future::join_all(readies));
        tokio::select! {
            _ = stop.cancelled() => bail!("stopped while waiting for caches to sync"),
            res = synced => {
                let results = res.map_err(|_| anyhow!("timed out waiting for caches to sync"))?;
                if results.iter().any(|r| r.is_err()) {
                    bail!("a watch ended before its cache synced");
                }
            }
        }
        self.caches.store(Arc::new(caches));
        info!(namespaces = ?namespaces, "caches synced");
        Ok(rx)
    }

    async fn update_ingress_status(
        &self,
        namespace: &str,
        name: &str,
        ip: Option<&str>,
        hostname: Option<&str>,
    ) -> Result<()> {
        if let Some(current) = lookup(&self.caches.load().ingresses, namespace, name) {
            let first = current
                .status
                .as_ref()
                .and_then(|s| s.load_balancer.as_ref())
                .and_then(|lb| lb.ingress.as_ref())
                .and_then(|v| v.first());
            if let Some(first) = first {
                if first.ip.as_deref() == ip && first.hostname.as_deref() == hostname {
                    debug!(ns = %namespace, ingress = %name, "skipping status update: already up to date");
                    return Ok(());
                }
            }
        }

        let status = IngressStatus {
            load_balancer: Some(IngressLoadBalancerStatus {
                ingress: Some(vec![IngressLoadBalancerIngress {
                    ip: ip.map(str::to_string),
                    hostname: hostname.map(str::to_string),
                    ..Default::default()
                }]),
            }),
        };
        let patch = serde_json::json!({ "status": status });
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("patching status of ingress {}/{}", namespace, name))?;
        counter!("kubehub_status_updates_total", 1u64);
        info!(ns = %namespace, ingress = %name, ip = ?ip, hostname = ?hostname, "updated ingress status");
        Ok(())
    }
}

/// Build a [`KubeClient`] the way the provider settings ask for.
///
/// In-cluster credentials win when the service env vars are present, then
/// `KUBECONFIG`, then the explicit endpoint/token/CA settings.
pub async fn connect(settings: &ProviderSettings) -> Result<KubeClient> {
    settings.validate()?;
    let config = client_config(settings).await?;
    let client = Client::try_from(config).context("building kube client")?;
    info!(selector = ?settings.label_selector(), "ingress label selector");
    Ok(KubeClient::new(client, settings.label_selector().map(str::to_string)))
}

fn env_set(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

async fn client_config(settings: &ProviderSettings) -> Result<kube::Config> {
    let endpoint = settings.endpoint.as_deref().filter(|s| !s.is_empty());
    if env_set("KUBERNETES_SERVICE_HOST").is_some() && env_set("KUBERNETES_SERVICE_PORT").is_some() {
        info!(endpoint = ?endpoint, "creating in-cluster provider client");
        let mut config = kube::Config::incluster().context("loading in-cluster config")?;
        if let Some(ep) = endpoint {
            config.cluster_url = ep.parse().with_context(|| format!("invalid endpoint {}", ep))?;
        }
        return Ok(config);
    }
    if let Some(path) = env_set("KUBECONFIG") {
        info!(kubeconfig = %path, "creating cluster-external provider client from KUBECONFIG");
        return kube::Config::infer().await.context("loading KUBECONFIG");
    }
    info!(endpoint = ?endpoint, "creating cluster-external provider client");
    let kubeconfig = external_kubeconfig(
        endpoint.unwrap_or("http://localhost:8080"),
        settings.token.as_deref().filter(|s| !s.is_empty()),
        settings.cert_auth_file_path.as_deref().filter(|s| !s.is_empty()),
    )?;
    kube::Config::from_custom_kubeconfig(kubeconfig, &kube::config::KubeConfigOptions::default())
        .await
        .context("building external cluster config")
}

fn external_kubeconfig(server: &str, token: Option<&str>, ca_file: Option<&str>) -> Result<kube::config::Kubeconfig> {
    let mut cluster = serde_json::json!({ "server": server });
    if let Some(ca) = ca_file {
        cluster["certificate-authority"] = serde_json::Value::String(ca.to_string());
    }
    let mut user = serde_json::json!({});
    if let Some(t) = token {
        user["token"] = serde_json::Value::String(t.to_string());
    }
    let raw = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": "waypost", "cluster": cluster }],
        "users": [{ "name": "waypost", "user": user }],
        "contexts": [{ "name": "waypost", "context": { "cluster": "waypost", "user": "waypost" } }],
        "current-context": "waypost",
    });
    serde_json::from_value(raw).context("assembling kubeconfig")
}
