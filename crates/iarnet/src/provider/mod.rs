//! Provider management: adapters over remote backends, placeholder
//! providers, the registry and its health-check loop, and the durable
//! provider store.
//!
//! Real and fake providers share one capability surface. They are modelled
//! as a sum type rather than trait objects, because exactly two variants exist
//! and the scheduler needs cheap, explicit `is_fake` discrimination.

pub mod adapter;
pub mod backend;
pub mod fake;
pub mod persistence;
pub mod registry;

use crate::error::Result;
use crate::resources::{Capacity, Language, ResourceInfo, ResourceTags};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use adapter::{AdapterTimeouts, HealthOutcome, ProviderAdapter};
pub use backend::{ComputeBackend, ConnectAck, DeploySpec, HealthReport, HttpComputeBackend};
pub use fake::FakeProvider;
pub use persistence::{ProviderRecord, ProviderStore};
pub use registry::ProviderRegistry;

/// Connection state of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderStatus {
    Unknown,
    Connected,
    Disconnected,
}

/// Serializable point-in-time view of one provider, as returned by
/// administrative listings and the cross-node `ListProviders` RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSnapshot {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub provider_type: String,
    pub is_fake: bool,
    pub status: ProviderStatus,
    pub supported_languages: Vec<Language>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<Capacity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<ResourceTags>,
    /// Unix timestamp of the last successful backend exchange.
    pub last_update: i64,
}

/// A provider under management: a real backend adapter or an
/// administrative placeholder.
pub enum Provider {
    Real(ProviderAdapter),
    Fake(FakeProvider),
}

impl Provider {
    pub fn id(&self) -> &str {
        match self {
            Provider::Real(a) => a.id(),
            Provider::Fake(f) => f.id(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Provider::Real(a) => a.name(),
            Provider::Fake(f) => f.name(),
        }
    }

    /// Placeholders are included in capacity reports but never scheduled.
    pub fn is_fake(&self) -> bool {
        matches!(self, Provider::Fake(_))
    }

    pub fn status(&self) -> ProviderStatus {
        match self {
            Provider::Real(a) => a.status(),
            Provider::Fake(f) => f.status(),
        }
    }

    pub fn supported_languages(&self) -> Vec<Language> {
        match self {
            Provider::Real(a) => a.supported_languages(),
            Provider::Fake(f) => f.supported_languages(),
        }
    }

    pub fn cached_tags(&self) -> Option<ResourceTags> {
        match self {
            Provider::Real(a) => a.cached_tags(),
            Provider::Fake(f) => Some(f.tags()),
        }
    }

    pub async fn connect(&self, cancel: &CancellationToken) -> Result<()> {
        match self {
            Provider::Real(a) => a.connect(cancel).await,
            Provider::Fake(_) => Ok(()),
        }
    }

    pub async fn disconnect(&self, cancel: &CancellationToken) -> Result<()> {
        match self {
            Provider::Real(a) => a.disconnect(cancel).await,
            Provider::Fake(_) => Ok(()),
        }
    }

    pub async fn health_check(&self, cancel: &CancellationToken) -> Result<HealthOutcome> {
        match self {
            Provider::Real(a) => a.health_check(cancel).await,
            Provider::Fake(_) => Ok(HealthOutcome::default()),
        }
    }

    pub async fn get_capacity(&self, cancel: &CancellationToken, force: bool) -> Result<Capacity> {
        match self {
            Provider::Real(a) => a.get_capacity(cancel, force).await,
            Provider::Fake(f) => Ok(f.capacity()),
        }
    }

    pub async fn get_available(
        &self,
        cancel: &CancellationToken,
        force: bool,
    ) -> Result<ResourceInfo> {
        Ok(self.get_capacity(cancel, force).await?.available)
    }

    pub async fn get_real_time_usage(&self, cancel: &CancellationToken) -> Result<ResourceInfo> {
        match self {
            Provider::Real(a) => a.get_real_time_usage(cancel).await,
            Provider::Fake(f) => Ok(f.capacity().used),
        }
    }

    pub async fn deploy(
        &self,
        cancel: &CancellationToken,
        component_id: &str,
        language: Language,
        request: &ResourceInfo,
        env_vars: Vec<(String, String)>,
    ) -> Result<()> {
        match self {
            Provider::Real(a) => {
                a.deploy(cancel, component_id, language, request, env_vars)
                    .await
            }
            Provider::Fake(f) => f.reject_workload(),
        }
    }

    pub async fn undeploy(&self, cancel: &CancellationToken, component_id: &str) -> Result<()> {
        match self {
            Provider::Real(a) => a.undeploy(cancel, component_id).await,
            Provider::Fake(f) => f.reject_workload(),
        }
    }

    pub fn mark_disconnected(&self) {
        if let Provider::Real(a) = self {
            a.mark_disconnected();
        }
    }

    pub fn snapshot(&self) -> ProviderSnapshot {
        match self {
            Provider::Real(a) => a.snapshot(),
            Provider::Fake(f) => f.snapshot(),
        }
    }
}
