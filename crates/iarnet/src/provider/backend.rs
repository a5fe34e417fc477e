//! Wire contract with provider backends.
//!
//! A backend is an opaque execution runtime (container host, k8s agent,
//! unikernel monitor) exposing a small HTTP/JSON API on `host:port`. The
//! scheduler is always the client. `ComputeBackend` is the seam: production
//! uses [`HttpComputeBackend`], tests install an in-memory double.

use crate::error::{IarnetError, Result};
use crate::resources::{Capacity, Language, ResourceInfo, ResourceTags};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

// ── Wire types ────────────────────────────────────────────────────────────────

/// Handshake result returned by `Connect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectAck {
    pub success: bool,
    /// Backend self-description, e.g. `"docker"`, `"k8s"`, `"osv"`.
    pub provider_type: String,
    #[serde(default)]
    pub supported_languages: Vec<Language>,
}

/// Full state snapshot returned by `HealthCheck`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub capacity: Capacity,
    #[serde(default)]
    pub resource_tags: ResourceTags,
    #[serde(default)]
    pub supported_languages: Vec<Language>,
}

/// Everything a backend needs to start one component instance.
///
/// The backend selects its container image from `language`; `env_vars`
/// carries the dial-back addresses (`COMPONENT_ID`, `ZMQ_ADDR`,
/// `STORE_ADDR`, `LOGGER_ADDR`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySpec {
    pub instance_id: String,
    pub language: Language,
    pub request: ResourceInfo,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    pub provider_id: String,
}

#[derive(Debug, Clone, Serialize)]
struct ProviderIdBody<'a> {
    provider_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct UndeployBody<'a> {
    instance_id: &'a str,
    provider_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct CapacityBody {
    capacity: Capacity,
}

#[derive(Debug, Clone, Deserialize)]
struct UsageBody {
    usage: ResourceInfo,
}

// ── Backend trait ─────────────────────────────────────────────────────────────

/// RPC surface of one provider backend.
///
/// Implementations must be safe to call concurrently; the adapter applies
/// per-operation timeouts and cancellation around these calls.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    async fn connect(&self, provider_id: &str) -> Result<ConnectAck>;

    async fn disconnect(&self, provider_id: &str) -> Result<()>;

    async fn health_check(&self, provider_id: &str) -> Result<HealthReport>;

    async fn get_capacity(&self, provider_id: &str) -> Result<Capacity>;

    async fn get_real_time_usage(&self, provider_id: &str) -> Result<ResourceInfo>;

    async fn deploy(&self, spec: &DeploySpec) -> Result<()>;

    async fn undeploy(&self, instance_id: &str, provider_id: &str) -> Result<()>;
}

// ── HTTP implementation ───────────────────────────────────────────────────────

/// HTTP/JSON client for a backend at `http://host:port`.
pub struct HttpComputeBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpComputeBackend {
    /// Build a client for `host:port`.
    ///
    /// The connect timeout is short; per-operation deadlines are enforced
    /// by the adapter on top of this.
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .build()
            .map_err(IarnetError::from)?;
        Ok(Self {
            http,
            base_url: format!("http://{}:{}", host, port),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B: Serialize + ?Sized, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(IarnetError::from)?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(IarnetError::backend_status(status.as_u16(), message));
        }
        response.json::<T>().await.map_err(IarnetError::from)
    }

    async fn post_unit<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(IarnetError::from)?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(IarnetError::backend_status(status.as_u16(), message));
        }
        Ok(())
    }
}

#[async_trait]
impl ComputeBackend for HttpComputeBackend {
    async fn connect(&self, provider_id: &str) -> Result<ConnectAck> {
        let ack: ConnectAck = self
            .post_json("/v1/connect", &ProviderIdBody { provider_id })
            .await?;
        if !ack.success {
            return Err(IarnetError::backend_network("backend refused handshake"));
        }
        Ok(ack)
    }

    async fn disconnect(&self, provider_id: &str) -> Result<()> {
        self.post_unit("/v1/disconnect", &ProviderIdBody { provider_id })
            .await
    }

    async fn health_check(&self, provider_id: &str) -> Result<HealthReport> {
        let mut report: HealthReport = self
            .post_json("/v1/health", &ProviderIdBody { provider_id })
            .await?;
        report.capacity = report.capacity.normalized();
        Ok(report)
    }

    async fn get_capacity(&self, provider_id: &str) -> Result<Capacity> {
        let body: CapacityBody = self
            .post_json("/v1/capacity", &ProviderIdBody { provider_id })
            .await?;
        Ok(body.capacity.normalized())
    }

    async fn get_real_time_usage(&self, provider_id: &str) -> Result<ResourceInfo> {
        let body: UsageBody = self
            .post_json("/v1/usage", &ProviderIdBody { provider_id })
            .await?;
        Ok(body.usage.clamped())
    }

    async fn deploy(&self, spec: &DeploySpec) -> Result<()> {
        self.post_unit("/v1/deploy", spec).await
    }

    async fn undeploy(&self, instance_id: &str, provider_id: &str) -> Result<()> {
        self.post_unit(
            "/v1/undeploy",
            &UndeployBody {
                instance_id,
                provider_id,
            },
        )
        .await
    }
}
