//! Adapter over one real provider backend.
//!
//! Owns the RPC channel and the capacity/tag cache. The cache is read far
//! more often than it changes (every scheduling pass consults it), so it
//! sits behind a reader-writer lock and every read hands out a deep copy,
//! so callers can never alias the cached value.
//!
//! Locking discipline: the lock is released before any network call and
//! re-acquired to write results back. No lock is ever held across I/O.

use crate::error::{IarnetError, Result};
use crate::provider::backend::{ComputeBackend, DeploySpec};
use crate::provider::{ProviderSnapshot, ProviderStatus};
use crate::resources::{Capacity, Language, ResourceInfo, ResourceTags};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// Per-operation deadlines applied around every backend call.
#[derive(Debug, Clone, Copy)]
pub struct AdapterTimeouts {
    /// Health checks, capacity probes, undeploys.
    pub rpc: Duration,
    /// Deploys pull images and get a longer budget.
    pub deploy: Duration,
}

impl Default for AdapterTimeouts {
    fn default() -> Self {
        Self {
            rpc: Duration::from_secs(5),
            deploy: Duration::from_secs(30),
        }
    }
}

/// Result of a successful health check.
///
/// `tags_changed` carries the before/after pair when the backend's
/// capability bits moved, so the registry loop can log the transition.
#[derive(Debug, Clone, Default)]
pub struct HealthOutcome {
    pub tags_changed: Option<(ResourceTags, ResourceTags)>,
}

struct AdapterState {
    status: ProviderStatus,
    provider_type: String,
    supported_languages: Vec<Language>,
    cached_capacity: Option<Capacity>,
    cached_tags: Option<ResourceTags>,
    cache_refreshed_at: Option<Instant>,
    last_update: OffsetDateTime,
}

/// One managed backend: identity, RPC client, status machine, cache.
pub struct ProviderAdapter {
    id: String,
    name: String,
    host: String,
    port: u16,
    backend: Arc<dyn ComputeBackend>,
    timeouts: AdapterTimeouts,
    state: RwLock<AdapterState>,
}

impl ProviderAdapter {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        backend: Arc<dyn ComputeBackend>,
        timeouts: AdapterTimeouts,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            host: host.into(),
            port,
            backend,
            timeouts,
            state: RwLock::new(AdapterState {
                status: ProviderStatus::Unknown,
                provider_type: String::new(),
                supported_languages: Vec::new(),
                cached_capacity: None,
                cached_tags: None,
                cache_refreshed_at: None,
                last_update: OffsetDateTime::now_utc(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn status(&self) -> ProviderStatus {
        self.state.read().status
    }

    pub fn supported_languages(&self) -> Vec<Language> {
        self.state.read().supported_languages.clone()
    }

    /// Deep copy of the cached capability bits, if any health check or
    /// connect has populated them yet.
    pub fn cached_tags(&self) -> Option<ResourceTags> {
        self.state.read().cached_tags
    }

    /// Deep copy of the cached capacity.
    pub fn cached_capacity(&self) -> Option<Capacity> {
        self.state.read().cached_capacity.clone()
    }

    /// Caller-side downgrade after an RPC failure observed elsewhere
    /// (health-check loop). Identity and cache survive for reconnects.
    pub fn mark_disconnected(&self) {
        let mut state = self.state.write();
        state.status = ProviderStatus::Disconnected;
    }

    /// Run one backend RPC under cancellation and a deadline.
    async fn rpc<T, F>(&self, cancel: &CancellationToken, deadline: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IarnetError::Cancelled),
            outcome = tokio::time::timeout(deadline, fut) => match outcome {
                Ok(result) => result,
                Err(_) => Err(IarnetError::backend_network(format!(
                    "rpc to provider {} timed out after {:?}",
                    self.id, deadline
                ))),
            },
        }
    }

    /// Handshake with the backend. On success the adapter becomes
    /// Connected and learns the backend's type and supported languages.
    /// On failure the status stays where it was.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<()> {
        let ack = self
            .rpc(cancel, self.timeouts.rpc, self.backend.connect(&self.id))
            .await?;

        let mut state = self.state.write();
        state.status = ProviderStatus::Connected;
        state.provider_type = ack.provider_type;
        state.supported_languages = ack.supported_languages;
        state.last_update = OffsetDateTime::now_utc();
        log::info!("provider {} connected ({}:{})", self.id, self.host, self.port);
        Ok(())
    }

    /// Close the channel and downgrade to Disconnected. Idempotent; the
    /// backend farewell is best-effort.
    pub async fn disconnect(&self, cancel: &CancellationToken) -> Result<()> {
        if self.status() == ProviderStatus::Disconnected {
            return Ok(());
        }
        if let Err(e) = self
            .rpc(cancel, self.timeouts.rpc, self.backend.disconnect(&self.id))
            .await
        {
            log::debug!("provider {} disconnect rpc failed: {}", self.id, e);
        }
        self.mark_disconnected();
        Ok(())
    }

    /// Refresh capacity, tags and language support from the backend.
    ///
    /// Does not change `status` on failure; the health-check loop owns
    /// that transition.
    pub async fn health_check(&self, cancel: &CancellationToken) -> Result<HealthOutcome> {
        let report = self
            .rpc(cancel, self.timeouts.rpc, self.backend.health_check(&self.id))
            .await?;

        let mut state = self.state.write();
        let tags_changed = match state.cached_tags {
            Some(old) if old != report.resource_tags => Some((old, report.resource_tags)),
            _ => None,
        };
        state.cached_capacity = Some(report.capacity.normalized());
        state.cached_tags = Some(report.resource_tags);
        state.supported_languages = report.supported_languages;
        state.cache_refreshed_at = Some(Instant::now());
        state.last_update = OffsetDateTime::now_utc();
        Ok(HealthOutcome { tags_changed })
    }

    /// Capacity, from cache unless `force` or the cache is cold.
    ///
    /// A not-yet-connected adapter still answers by opening a temporary
    /// channel. The administrative "test connection" path relies on this.
    pub async fn get_capacity(&self, cancel: &CancellationToken, force: bool) -> Result<Capacity> {
        if !force
            && let Some(cached) = self.cached_capacity()
        {
            return Ok(cached);
        }

        let fresh = self
            .rpc(cancel, self.timeouts.rpc, self.backend.get_capacity(&self.id))
            .await?;

        let mut state = self.state.write();
        state.cached_capacity = Some(fresh.clone());
        state.cache_refreshed_at = Some(Instant::now());
        Ok(fresh)
    }

    /// `available` slice of [`get_capacity`](Self::get_capacity).
    pub async fn get_available(
        &self,
        cancel: &CancellationToken,
        force: bool,
    ) -> Result<ResourceInfo> {
        Ok(self.get_capacity(cancel, force).await?.available)
    }

    /// Live usage from the backend's current metrics. Never cached.
    pub async fn get_real_time_usage(&self, cancel: &CancellationToken) -> Result<ResourceInfo> {
        self.rpc(
            cancel,
            self.timeouts.rpc,
            self.backend.get_real_time_usage(&self.id),
        )
        .await
    }

    /// Start one component on the backend.
    ///
    /// Requires Connected status and language support; capacity and tag
    /// admission happened in the scheduler, and the backend remains the
    /// final authority. A successful deploy always refreshes the capacity
    /// cache before returning; if that refresh fails the deploy still
    /// counts and the next health check repairs the cache.
    pub async fn deploy(
        &self,
        cancel: &CancellationToken,
        component_id: &str,
        language: Language,
        request: &ResourceInfo,
        env_vars: Vec<(String, String)>,
    ) -> Result<()> {
        {
            let state = self.state.read();
            if state.status != ProviderStatus::Connected {
                return Err(IarnetError::ProviderNotConnected {
                    provider_id: self.id.clone(),
                });
            }
            if !language.supported_by(&state.supported_languages) {
                return Err(IarnetError::LanguageUnsupported {
                    provider_id: self.id.clone(),
                    language,
                });
            }
        }

        let spec = DeploySpec {
            instance_id: component_id.to_string(),
            language,
            request: request.clone(),
            env_vars: env_vars.into_iter().collect::<HashMap<_, _>>(),
            provider_id: self.id.clone(),
        };
        self.rpc(cancel, self.timeouts.deploy, self.backend.deploy(&spec))
            .await?;

        self.refresh_cache_after_mutation(cancel, "deploy").await;
        Ok(())
    }

    /// Remove one component from the backend. Refreshes the cache on the
    /// same terms as [`deploy`](Self::deploy).
    pub async fn undeploy(&self, cancel: &CancellationToken, component_id: &str) -> Result<()> {
        if self.status() != ProviderStatus::Connected {
            return Err(IarnetError::ProviderNotConnected {
                provider_id: self.id.clone(),
            });
        }

        self.rpc(
            cancel,
            self.timeouts.rpc,
            self.backend.undeploy(component_id, &self.id),
        )
        .await?;

        self.refresh_cache_after_mutation(cancel, "undeploy").await;
        Ok(())
    }

    async fn refresh_cache_after_mutation(&self, cancel: &CancellationToken, op: &str) {
        if let Err(e) = self.get_capacity(cancel, true).await {
            log::warn!(
                "provider {}: capacity refresh after {} failed (next health check will repair): {}",
                self.id,
                op,
                e
            );
        }
    }

    pub fn snapshot(&self) -> ProviderSnapshot {
        let state = self.state.read();
        ProviderSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            host: Some(self.host.clone()),
            port: Some(self.port),
            provider_type: state.provider_type.clone(),
            is_fake: false,
            status: state.status,
            supported_languages: state.supported_languages.clone(),
            capacity: state.cached_capacity.clone(),
            tags: state.cached_tags,
            last_update: state.last_update.unix_timestamp(),
        }
    }
}
