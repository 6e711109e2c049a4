//! Waypost store: the most recently published configuration.
//!
//! The reconciliation loop is the only writer. Readers get a [`ConfigHandle`]
//! that loads the current value lock-free and can wait for the next swap.

#![forbid(unsafe_code)]

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::watch;
use tracing::debug;
use waypost_core::Configuration;

/// Single-writer holder of the last emitted configuration, used for change suppression.
pub struct LastPublished {
    current: Arc<ArcSwapOption<Configuration>>,
    generation_tx: watch::Sender<u64>,
    generation: u64,
}

impl Default for LastPublished {
    fn default() -> Self {
        Self::new()
    }
}

impl LastPublished {
    pub fn new() -> Self {
        let (generation_tx, _) = watch::channel(0u64);
        Self { current: Arc::new(ArcSwapOption::empty()), generation_tx, generation: 0 }
    }

    /// Store `next` unless it equals what was published last.
    ///
    /// Returns the stored value when it was swapped in, `None` when unchanged.
    pub fn replace_if_changed(&mut self, next: Configuration) -> Option<Arc<Configuration>> {
        if self.current.load().as_deref() == Some(&next) {
            return None;
        }
        let next = Arc::new(next);
        self.current.store(Some(Arc::clone(&next)));
        self.generation = self.generation.saturating_add(1);
        self.generation_tx.send_replace(self.generation);
        debug!(generation = self.generation, "published configuration swapped");
        metrics::gauge!("store_generation", self.generation as f64);
        Some(next)
    }

    pub fn current(&self) -> Option<Arc<Configuration>> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn handle(&self) -> ConfigHandle {
        ConfigHandle { current: Arc::clone(&self.current), generation_rx: self.generation_tx.subscribe() }
    }
}

/// Read side of [`LastPublished`]; cheap to clone.
#[derive(Clone)]
pub struct ConfigHandle {
    current: Arc<ArcSwapOption<Configuration>>,
    generation_rx: watch::Receiver<u64>,
}

impl ConfigHandle {
    pub fn current(&self) -> Option<Arc<Configuration>> {
        self.current.load_full()
    }

    pub fn subscribe_generation(&self) -> watch::Receiver<u64> {
        self.generation_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypost_core::{LoadBalancerService, Router, Server, Service};

    fn conf(url: &str) -> Configuration {
        let mut c = Configuration::default();
        c.http.routers.insert(
            "example-com/".into(),
            Router { rule: "Host(`example.com`)".into(), service: "default/web/80".into(), priority: None },
        );
        c.http.services.insert(
            "default/web/80".into(),
            Service { load_balancer: LoadBalancerService::new(vec![Server { url: url.into() }]) },
        );
        c
    }

    #[test]
    fn equal_configuration_is_not_replaced() {
        let mut lp = LastPublished::new();
        assert!(lp.current().is_none());
        assert!(lp.replace_if_changed(conf("http://10.0.0.1:80")).is_some());
        assert!(lp.replace_if_changed(conf("http://10.0.0.1:80")).is_none());
        assert_eq!(lp.generation(), 1);
        assert!(lp.replace_if_changed(conf("http://10.0.0.2:80")).is_some());
        assert_eq!(lp.generation(), 2);
    }

    #[test]
    fn empty_configuration_counts_as_a_change_from_nothing() {
        let mut lp = LastPublished::new();
        assert!(lp.replace_if_changed(Configuration::default()).is_some());
        assert!(lp.replace_if_changed(Configuration::default()).is_none());
    }

    #[tokio::test]
    async fn handle_sees_swaps() {
        let mut lp = LastPublished::new();
        let h = lp.handle();
        let mut gen = h.subscribe_generation();
        lp.replace_if_changed(conf("http://10.0.0.1:80"));
        gen.changed().await.unwrap();
        assert_eq!(*gen.borrow(), 1);
        let seen = h.current().unwrap();
        assert_eq!(seen.http.services["default/web/80"].load_balancer.servers[0].url, "http://10.0.0.1:80");
    }
}
