#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend, IngressSpec,
    ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use waypost_core::{Message, ProviderSettings};
use waypost_kubehub::{MemoryClient, ResourceKind};
use waypost_provider::{BackoffPolicy, Provider};

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta { namespace: Some("default".into()), name: Some(name.into()), ..Default::default() }
}

fn external(name: &str, target: &str) -> Service {
    Service {
        metadata: meta(name),
        spec: Some(ServiceSpec {
            type_: Some("ExternalName".into()),
            external_name: Some(target.into()),
            ports: Some(vec![ServicePort { port: 80, ..Default::default() }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn site(name: &str, host: &str, service: &str) -> Ingress {
    let backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: service.into(),
            port: Some(ServiceBackendPort { number: Some(80), name: None }),
        }),
        ..Default::default()
    };
    Ingress {
        metadata: meta(name),
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(host.into()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath { path: Some("/".into()), path_type: "Prefix".into(), backend }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn cluster() -> Arc<MemoryClient> {
    let c = Arc::new(MemoryClient::new());
    c.insert_service(external("web", "web.example.org"));
    c.insert_ingress(site("one", "one.example.com", "web"));
    c
}

async fn wait_for_watch_calls(client: &MemoryClient, n: usize) {
    while client.watch_calls() < n {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn no_message(rx: &mut mpsc::Receiver<Message>) -> bool {
    timeout(Duration::from_secs(5), rx.recv()).await.is_err()
}

#[tokio::test(start_paused = true)]
async fn publishes_only_on_change() {
    let client = cluster();
    let (tx, mut rx) = mpsc::channel(4);
    let stop = CancellationToken::new();
    let provider = Provider::new(Arc::clone(&client), ProviderSettings::default());
    let handle = provider.last_published();
    let task = tokio::spawn(provider.provide(tx, stop.clone()));

    wait_for_watch_calls(&client, 1).await;
    assert!(client.notify(ResourceKind::Ingress, "default", "one").await);
    let first = rx.recv().await.unwrap();
    assert_eq!(first.provider_name, "kubernetes");
    assert_eq!(first.configuration.http.routers["one-example-com/"].rule, "Host(`one.example.com`) && PathPrefix(`/`)");
    assert_eq!(handle.current().as_deref(), Some(&first.configuration));

    assert!(client.notify(ResourceKind::Service, "default", "web").await);
    assert!(no_message(&mut rx).await);

    client.insert_ingress(site("two", "two.example.com", "web"));
    assert!(client.notify(ResourceKind::Ingress, "default", "two").await);
    let second = rx.recv().await.unwrap();
    assert_eq!(second.configuration.http.routers.len(), 2);
    assert_eq!(*handle.subscribe_generation().borrow(), 2);

    stop.cancel();
    task.await.unwrap().unwrap();
    assert_eq!(client.watch_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn removal_is_published() {
    let client = cluster();
    let (tx, mut rx) = mpsc::channel(4);
    let stop = CancellationToken::new();
    let task = tokio::spawn(Provider::new(Arc::clone(&client), ProviderSettings::default()).provide(tx, stop.clone()));

    wait_for_watch_calls(&client, 1).await;
    client.notify(ResourceKind::Ingress, "default", "one").await;
    assert_eq!(rx.recv().await.unwrap().configuration.http.routers.len(), 1);

    client.remove_ingress("default", "one");
    client.notify(ResourceKind::Ingress, "default", "one").await;
    let msg = rx.recv().await.unwrap();
    assert!(msg.configuration.http.routers.is_empty());
    assert!(msg.configuration.http.services.is_empty());

    stop.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_subscriptions_are_retried_and_observed() {
    let client = cluster();
    client.fail_next_watches(3);
    let delays = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&delays);
    let (tx, mut rx) = mpsc::channel(4);
    let stop = CancellationToken::new();
    let provider = Provider::new(Arc::clone(&client), ProviderSettings::default())
        .with_observer(move |_err, delay| seen.lock().unwrap().push(delay));
    let task = tokio::spawn(provider.provide(tx, stop.clone()));

    wait_for_watch_calls(&client, 4).await;
    let delays = delays.lock().unwrap().clone();
    assert_eq!(delays.len(), 3);
    let windows = [(250, 750), (375, 1125), (562, 1688)];
    for (delay, (low, high)) in delays.iter().zip(windows) {
        assert!(*delay >= Duration::from_millis(low) && *delay <= Duration::from_millis(high), "{:?}", delay);
    }

    // subscribed now; events flow
    assert!(client.notify(ResourceKind::Ingress, "default", "one").await);
    assert!(rx.recv().await.is_some());

    stop.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_during_backoff_terminates() {
    let client = cluster();
    client.fail_next_watches(usize::MAX);
    let (tx, _rx) = mpsc::channel(4);
    let stop = CancellationToken::new();
    let policy = BackoffPolicy { initial_interval: Duration::from_secs(3600), ..Default::default() };
    let provider = Provider::new(Arc::clone(&client), ProviderSettings::default()).with_backoff(policy);
    let task = tokio::spawn(provider.provide(tx, stop.clone()));

    wait_for_watch_calls(&client, 1).await;
    stop.cancel();
    let done = timeout(Duration::from_secs(1), task).await.expect("provider ignored stop");
    done.unwrap().unwrap();
    assert_eq!(client.watch_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn closed_change_stream_resubscribes() {
    let client = cluster();
    let observed = Arc::new(Mutex::new(0usize));
    let count = Arc::clone(&observed);
    let (tx, mut rx) = mpsc::channel(4);
    let stop = CancellationToken::new();
    let provider = Provider::new(Arc::clone(&client), ProviderSettings::default())
        .with_observer(move |_, _| *count.lock().unwrap() += 1);
    let task = tokio::spawn(provider.provide(tx, stop.clone()));

    wait_for_watch_calls(&client, 1).await;
    client.close_watch();
    wait_for_watch_calls(&client, 2).await;
    assert_eq!(*observed.lock().unwrap(), 1);

    assert!(client.notify(ResourceKind::Ingress, "default", "one").await);
    assert!(rx.recv().await.is_some());

    stop.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn closed_downstream_is_an_error() {
    let client = cluster();
    let (tx, rx) = mpsc::channel(4);
    drop(rx);
    let stop = CancellationToken::new();
    let task = tokio::spawn(Provider::new(Arc::clone(&client), ProviderSettings::default()).provide(tx, stop));

    wait_for_watch_calls(&client, 1).await;
    client.notify(ResourceKind::Ingress, "default", "one").await;
    assert!(task.await.unwrap().is_err());
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_does_nothing() {
    let client = cluster();
    let (tx, _rx) = mpsc::channel(1);
    let stop = CancellationToken::new();
    stop.cancel();
    Provider::new(Arc::clone(&client), ProviderSettings::default()).provide(tx, stop).await.unwrap();
    assert_eq!(client.watch_calls(), 0);
}
