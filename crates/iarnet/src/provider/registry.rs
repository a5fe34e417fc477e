//! In-memory provider registry and the background health-check loop.
//!
//! The registry owns every provider exclusively; everything else refers to
//! providers by id. Selection primitives return snapshots; the registry
//! lock is never held across network I/O.

use crate::error::{IarnetError, Result};
use crate::provider::{Provider, ProviderSnapshot, ProviderStatus};
use crate::resources::{Capacity, ResourceTags};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider under its id. Ids are unique; re-registering an
    /// existing id is an operator error, not an upsert.
    pub fn register(&self, provider: Provider) -> Result<Arc<Provider>> {
        let provider = Arc::new(provider);
        let mut providers = self.providers.write();
        if providers.contains_key(provider.id()) {
            return Err(IarnetError::Internal(format!(
                "provider id already registered: {}",
                provider.id()
            )));
        }
        providers.insert(provider.id().to_string(), provider.clone());
        Ok(provider)
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Provider>> {
        self.providers.write().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Provider>> {
        self.providers.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }

    /// Snapshot of all providers, ordered by id so iteration order is
    /// stable for a whole scheduling invocation.
    pub fn list(&self) -> Vec<Arc<Provider>> {
        let mut all: Vec<Arc<Provider>> =
            self.providers.read().values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    /// Snapshot of providers currently in `status`.
    pub fn get_by_status(&self, status: ProviderStatus) -> Vec<Arc<Provider>> {
        self.list()
            .into_iter()
            .filter(|p| p.status() == status)
            .collect()
    }

    /// The scheduling candidate set: Connected, non-fake.
    pub fn connected_real(&self) -> Vec<Arc<Provider>> {
        self.list()
            .into_iter()
            .filter(|p| !p.is_fake() && p.status() == ProviderStatus::Connected)
            .collect()
    }

    /// Serializable listing for administrative surfaces.
    pub fn snapshots(&self, include_fake: bool) -> Vec<ProviderSnapshot> {
        self.list()
            .into_iter()
            .filter(|p| include_fake || !p.is_fake())
            .map(|p| p.snapshot())
            .collect()
    }

    /// Node-level capacity aggregate from cached values.
    ///
    /// Capacity reports include placeholders; the gossip announcement and
    /// scheduling both call with `include_fake = false`. Providers whose
    /// cache is still cold contribute nothing.
    pub fn aggregate_capacity(&self, include_fake: bool) -> (Capacity, ResourceTags) {
        let mut capacity = Capacity::default();
        let mut tags = ResourceTags::default();
        for provider in self.list() {
            if provider.is_fake() && !include_fake {
                continue;
            }
            if provider.status() != ProviderStatus::Connected {
                continue;
            }
            if let Some(snap) = provider.snapshot().capacity {
                capacity = capacity.merged(&snap);
            }
            if let Some(t) = provider.cached_tags() {
                tags = tags.union(&t);
            }
        }
        (capacity, tags)
    }

    /// Start the periodic health-check loop.
    ///
    /// Every `interval`, each real provider is probed: Connected adapters
    /// get a HealthCheck (failure downgrades them to Disconnected without
    /// removing them), Disconnected ones get a reconnect attempt followed
    /// by an immediate health check to warm the cache. The task exits when
    /// `cancel` fires; `stop()` joins the returned handle.
    pub fn spawn_health_loop(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        log::debug!("health-check loop stopped");
                        return;
                    }
                    _ = ticker.tick() => {}
                }
                registry.run_health_pass(&cancel).await;
            }
        })
    }

    /// One pass over every real provider. Probes run concurrently; each is
    /// individually bounded by the adapter's own RPC deadline.
    pub async fn run_health_pass(&self, cancel: &CancellationToken) {
        let providers: Vec<Arc<Provider>> = self
            .list()
            .into_iter()
            .filter(|p| !p.is_fake())
            .collect();

        let probes = providers.into_iter().map(|provider| {
            let cancel = cancel.clone();
            async move {
                match provider.status() {
                    ProviderStatus::Connected => {
                        match provider.health_check(&cancel).await {
                            Ok(outcome) => {
                                if let Some((old, new)) = outcome.tags_changed {
                                    log::info!(
                                        "provider {} tags changed: {} -> {}",
                                        provider.id(),
                                        old,
                                        new
                                    );
                                }
                            }
                            Err(e) => {
                                log::warn!(
                                    "health check failed for provider {}: {}; marking disconnected",
                                    provider.id(),
                                    e
                                );
                                provider.mark_disconnected();
                            }
                        }
                    }
                    ProviderStatus::Disconnected | ProviderStatus::Unknown => {
                        match provider.connect(&cancel).await {
                            Ok(()) => {
                                log::info!("provider {} reconnected", provider.id());
                                if let Err(e) = provider.health_check(&cancel).await {
                                    log::debug!(
                                        "post-reconnect health check failed for {}: {}",
                                        provider.id(),
                                        e
                                    );
                                }
                            }
                            Err(e) => {
                                log::debug!(
                                    "reconnect attempt failed for provider {}: {}",
                                    provider.id(),
                                    e
                                );
                            }
                        }
                    }
                }
            }
        });
        futures_util::future::join_all(probes).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::adapter::{AdapterTimeouts, ProviderAdapter};
    use crate::provider::fake::FakeProvider;
    use crate::resources::ResourceInfo;
    use crate::test_support::InMemoryBackend;

    fn real_provider(id: &str, backend: Arc<InMemoryBackend>) -> Provider {
        Provider::Real(ProviderAdapter::new(
            id,
            id,
            "127.0.0.1",
            8200,
            backend,
            AdapterTimeouts::default(),
        ))
    }

    fn fake_provider(id: &str, cpu: i64) -> Provider {
        Provider::Fake(FakeProvider::new(
            id,
            id,
            Capacity::from_total_used(ResourceInfo::new(cpu, 1 << 30, 0), ResourceInfo::zero()),
            ResourceTags {
                cpu: true,
                ..Default::default()
            },
        ))
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let registry = ProviderRegistry::new();
        let backend = Arc::new(InMemoryBackend::new(ResourceInfo::new(1000, 1024, 0)));
        registry.register(real_provider("p-1", backend.clone())).unwrap();
        assert!(registry.register(real_provider("p-1", backend)).is_err());
    }

    #[test]
    fn list_is_ordered_by_id() {
        let registry = ProviderRegistry::new();
        for id in ["p-c", "p-a", "p-b"] {
            let backend = Arc::new(InMemoryBackend::new(ResourceInfo::new(1000, 1024, 0)));
            registry.register(real_provider(id, backend)).unwrap();
        }
        let ids: Vec<String> = registry.list().iter().map(|p| p.id().to_string()).collect();
        assert_eq!(ids, vec!["p-a", "p-b", "p-c"]);
    }

    #[tokio::test]
    async fn connected_real_excludes_fakes_and_disconnected() {
        let registry = ProviderRegistry::new();
        let cancel = CancellationToken::new();

        let backend = Arc::new(InMemoryBackend::new(ResourceInfo::new(1000, 1024, 0)));
        let connected = registry.register(real_provider("p-up", backend)).unwrap();
        connected.connect(&cancel).await.unwrap();

        let backend = Arc::new(InMemoryBackend::new(ResourceInfo::new(1000, 1024, 0)));
        registry.register(real_provider("p-down", backend)).unwrap();

        registry.register(fake_provider("fake-1", 64_000)).unwrap();

        let candidates = registry.connected_real();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id(), "p-up");
    }

    #[tokio::test]
    async fn aggregate_capacity_honors_include_fake() {
        let registry = ProviderRegistry::new();
        let cancel = CancellationToken::new();

        let backend = Arc::new(InMemoryBackend::new(ResourceInfo::new(4000, 1 << 30, 0)));
        let p = registry.register(real_provider("p-1", backend)).unwrap();
        p.connect(&cancel).await.unwrap();
        p.health_check(&cancel).await.unwrap();

        registry.register(fake_provider("fake-1", 64_000)).unwrap();

        let (with_fake, _) = registry.aggregate_capacity(true);
        assert_eq!(with_fake.total.cpu_millicores, 68_000);

        let (without_fake, _) = registry.aggregate_capacity(false);
        assert_eq!(without_fake.total.cpu_millicores, 4000);
    }

    #[tokio::test]
    async fn health_pass_downgrades_failing_provider_without_removal() {
        let registry = Arc::new(ProviderRegistry::new());
        let cancel = CancellationToken::new();

        let backend = Arc::new(InMemoryBackend::new(ResourceInfo::new(1000, 1024, 0)));
        let p = registry.register(real_provider("p-1", backend.clone())).unwrap();
        p.connect(&cancel).await.unwrap();
        assert_eq!(p.status(), ProviderStatus::Connected);

        backend.set_health_failing(true);
        registry.run_health_pass(&cancel).await;
        assert_eq!(p.status(), ProviderStatus::Disconnected);
        assert!(registry.get("p-1").is_some());
    }

    #[tokio::test]
    async fn health_pass_reconnects_recovered_provider() {
        let registry = Arc::new(ProviderRegistry::new());
        let cancel = CancellationToken::new();

        let backend = Arc::new(InMemoryBackend::new(ResourceInfo::new(1000, 1024, 0)));
        let p = registry.register(real_provider("p-1", backend.clone())).unwrap();
        p.connect(&cancel).await.unwrap();

        backend.set_health_failing(true);
        registry.run_health_pass(&cancel).await;
        assert_eq!(p.status(), ProviderStatus::Disconnected);

        backend.set_health_failing(false);
        registry.run_health_pass(&cancel).await;
        assert_eq!(p.status(), ProviderStatus::Connected);
        // the reconnect pass also warmed the cache
        assert!(p.snapshot().capacity.is_some());
    }

    #[tokio::test]
    async fn health_loop_stops_on_cancel() {
        let registry = Arc::new(ProviderRegistry::new());
        let cancel = CancellationToken::new();
        let handle = registry.spawn_health_loop(Duration::from_millis(10), cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should stop promptly")
            .unwrap();
    }
}
