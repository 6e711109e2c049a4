//! Waypost provider: the watch-and-reconcile loop.
//!
//! [`Provider::provide`] subscribes to cluster changes, re-translates the
//! whole snapshot on every notification and publishes a [`Message`] only when
//! the result differs from what was published last. Lost subscriptions are
//! re-established with exponential backoff until the stop token fires.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use metrics::counter;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use waypost_core::{Message, ProviderSettings};
use waypost_kubehub::ResourceClient;
use waypost_store::{ConfigHandle, LastPublished};
use waypost_translate::Translator;

mod backoff;

pub use backoff::{Backoff, BackoffPolicy};

/// Told about every failed subscription attempt and the delay before the next one.
pub type RetryObserver = Arc<dyn Fn(&anyhow::Error, Duration) + Send + Sync>;

/// How a subscription ended.
enum Watch {
    Stopped,
    Failed(anyhow::Error),
}

pub struct Provider<C> {
    client: C,
    settings: ProviderSettings,
    backoff: BackoffPolicy,
    observer: Option<RetryObserver>,
    last: LastPublished,
}

impl<C: ResourceClient> Provider<C> {
    pub fn new(client: C, settings: ProviderSettings) -> Self {
        Self { client, settings, backoff: BackoffPolicy::default(), observer: None, last: LastPublished::new() }
    }

    pub fn with_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = policy;
        self
    }

    pub fn with_observer(mut self, observer: impl Fn(&anyhow::Error, Duration) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Read access to the last published configuration; take it before `provide`.
    pub fn last_published(&self) -> ConfigHandle {
        self.last.handle()
    }

    /// Run until `stop` fires. Errors only when `tx` is closed.
    pub async fn provide(mut self, tx: mpsc::Sender<Message>, stop: CancellationToken) -> Result<()> {
        if self.settings.disable_pass_host_headers {
            info!("disablePassHostHeaders is set but ignored: the host header is always passed");
        }
        let mut backoff = Backoff::new(self.backoff.clone());
        loop {
            if stop.is_cancelled() {
                break;
            }
            match self.watch(&tx, &stop, &mut backoff).await? {
                Watch::Stopped => break,
                Watch::Failed(err) => {
                    let delay = backoff.next_delay(rand::thread_rng().gen::<f64>());
                    self.observe(&err, delay);
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        info!("provider stopped");
        Ok(())
    }

    fn observe(&self, err: &anyhow::Error, delay: Duration) {
        counter!("provider_subscribe_errors_total", 1u64);
        warn!(error = %err, delay_ms = delay.as_millis() as u64, "provider connection error, retrying");
        if let Some(observer) = &self.observer {
            observer(err, delay);
        }
    }

    async fn watch(&mut self, tx: &mpsc::Sender<Message>, stop: &CancellationToken, backoff: &mut Backoff) -> Result<Watch> {
        // watch tasks of this subscription die with the guard
        let subscription = stop.child_token();
        let _guard = subscription.clone().drop_guard();

        let mut events = tokio::select! {
            _ = stop.cancelled() => return Ok(Watch::Stopped),
            res = self.client.watch_all(&self.settings.namespaces, subscription.clone()) => match res {
                Ok(events) => events,
                Err(e) => return Ok(Watch::Failed(e.context("subscribing to cluster changes"))),
            },
        };
        backoff.reset();
        info!(namespaces = ?self.settings.namespaces, "watching cluster changes");

        loop {
            let event = tokio::select! {
                _ = stop.cancelled() => return Ok(Watch::Stopped),
                ev = events.recv() => ev,
            };
            let Some(event) = event else {
                return Ok(Watch::Failed(anyhow!("change stream closed")));
            };
            debug!(kind = event.kind.as_str(), ns = ?event.namespace, name = %event.name, change = ?event.change, "change received");

            let conf = Translator::new(&self.client, &self.settings).translate().await;
            if stop.is_cancelled() {
                return Ok(Watch::Stopped);
            }
            let Some(conf) = self.last.replace_if_changed(conf) else {
                counter!("provider_skip_total", 1u64);
                debug!("skipping same configuration");
                continue;
            };
            let msg = Message::new(conf.as_ref().clone());
            tokio::select! {
                _ = stop.cancelled() => return Ok(Watch::Stopped),
                res = tx.send(msg) => res.map_err(|_| anyhow!("configuration channel closed"))?,
            }
            counter!("provider_publish_total", 1u64);
            debug!(
                routers = conf.http.routers.len(),
                services = conf.http.services.len(),
                "configuration published"
            );
        }
    }
}
