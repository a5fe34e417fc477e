//! The scheduling decision pipeline.
//!
//! `deploy_component` runs two local selection passes (first against
//! cached capacity, then against force-refreshed capacity) and falls back
//! to remote nodes discovered via gossip. Selection never holds a registry
//! lock across I/O: candidates are snapshots, checked in stable id order,
//! first match wins. Two concurrent deploys may pick the same provider on
//! purpose; the backend is the final admission authority and the
//! post-deploy cache refresh steers later calls away.
//!
//! Rollback rule: a component that fails to schedule anywhere is removed
//! from the component registry before the error is returned; callers
//! never observe a leaked, unbound component.

pub mod component;
pub mod retry;

pub use component::{Component, ComponentRegistry, ProviderRef};

use crate::error::{IarnetError, Result};
use crate::provider::{Provider, ProviderRegistry};
use crate::remote::mesh::{LookupPolicy, MeshHandle};
use crate::remote::node_table::NodeTable;
use crate::remote::server::{RemoteSchedule, ScheduleRemote, SchedulerServer, UndeployRemote};
use crate::resources::{Language, ResourceInfo};
use crate::runtime::RuntimeContext;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Deadline on every node-to-node RPC. Deploys dominate the worst case,
/// so this matches the per-deploy backend budget.
const REMOTE_RPC_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Scheduler {
    ctx: Arc<RuntimeContext>,
    registry: Arc<ProviderRegistry>,
    components: Arc<ComponentRegistry>,
    node_table: Arc<NodeTable>,
    mesh: Option<MeshHandle>,
}

impl Scheduler {
    pub fn new(
        ctx: Arc<RuntimeContext>,
        registry: Arc<ProviderRegistry>,
        components: Arc<ComponentRegistry>,
        node_table: Arc<NodeTable>,
        mesh: Option<MeshHandle>,
    ) -> Self {
        Self {
            ctx,
            registry,
            components,
            node_table,
            mesh,
        }
    }

    pub fn components(&self) -> &Arc<ComponentRegistry> {
        &self.components
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn node_table(&self) -> &Arc<NodeTable> {
        &self.node_table
    }

    /// Deploy a component somewhere in the cluster.
    ///
    /// Local providers are preferred; remote nodes are consulted only when
    /// both local passes miss. On total failure every candidate error is
    /// folded into a single `NoAvailableProvider`; callers retry on it
    /// without caring why each candidate declined.
    #[tracing::instrument(
        name = "scheduler.deploy_component",
        skip(self, cancel, request),
        fields(language = %language, component_id = tracing::field::Empty, provider = tracing::field::Empty)
    )]
    pub async fn deploy_component(
        &self,
        cancel: &CancellationToken,
        language: Language,
        request: ResourceInfo,
    ) -> Result<Arc<Component>> {
        let provisional_id = Component::generate_id();
        tracing::Span::current().record("component_id", provisional_id.as_str());
        let provisional = Arc::new(Component::new(provisional_id.clone(), request.clone()));
        self.components.add(Arc::clone(&provisional));

        match self
            .local_passes(cancel, &provisional_id, language, &request)
            .await
        {
            Ok(Some(provider_id)) => {
                let provider_ref = ProviderRef::local(provider_id);
                tracing::Span::current().record("provider", provider_ref.to_string().as_str());
                provisional.bind(provider_ref);
                return Ok(provisional);
            }
            Ok(None) => {}
            Err(e) => {
                self.components.remove(&provisional_id);
                return Err(e);
            }
        }

        match self.remote_pass(cancel, language, &request).await {
            Ok(Some((provider_id, node_id, remote_component_id))) => {
                // The remote node owns the backend instance and keyed it by
                // its own id; re-key our record so undeploy carries the id
                // the owning provider actually knows.
                self.components.remove(&provisional_id);
                let component = Arc::new(Component::new(remote_component_id, request));
                let provider_ref = ProviderRef::remote(provider_id, node_id);
                tracing::Span::current().record("provider", provider_ref.to_string().as_str());
                component.bind(provider_ref);
                self.components.add(Arc::clone(&component));
                Ok(component)
            }
            Ok(None) => {
                self.components.remove(&provisional_id);
                Err(IarnetError::NoAvailableProvider)
            }
            Err(e) => {
                self.components.remove(&provisional_id);
                Err(e)
            }
        }
    }

    /// Strictly-local scheduling, used to serve `ScheduleRemote`.
    ///
    /// Runs the same two local passes but never recurses into remote
    /// fallback, and does not register a component record, because the record
    /// lives with the calling node. Returns the backend instance id
    /// generated here alongside the chosen provider.
    pub async fn schedule_local(
        &self,
        cancel: &CancellationToken,
        language: Language,
        request: ResourceInfo,
    ) -> Result<(String, String)> {
        let component_id = Component::generate_id();
        match self
            .local_passes(cancel, &component_id, language, &request)
            .await?
        {
            Some(provider_id) => Ok((provider_id, component_id)),
            None => Err(IarnetError::NoAvailableProvider),
        }
    }

    /// Pass 1 (cached) then pass 2 (forced refresh).
    ///
    /// Pass 2 exists for one race: a burst of undeploys can leave every
    /// cached capacity reading "full" moments after space freed up, and a
    /// stale cache must not produce a spurious miss.
    async fn local_passes(
        &self,
        cancel: &CancellationToken,
        component_id: &str,
        language: Language,
        request: &ResourceInfo,
    ) -> Result<Option<String>> {
        if let Some(provider_id) = self
            .local_pass(cancel, component_id, language, request, false)
            .await?
        {
            return Ok(Some(provider_id));
        }
        self.local_pass(cancel, component_id, language, request, true)
            .await
    }

    async fn local_pass(
        &self,
        cancel: &CancellationToken,
        component_id: &str,
        language: Language,
        request: &ResourceInfo,
        force_refresh: bool,
    ) -> Result<Option<String>> {
        for provider in self.registry.connected_real() {
            if cancel.is_cancelled() {
                return Err(IarnetError::Cancelled);
            }
            if !language.supported_by(&provider.supported_languages()) {
                continue;
            }
            let tags = provider.cached_tags().unwrap_or_default();
            if !tags.covers(&request.tags) {
                continue;
            }
            let available = match provider.get_available(cancel, force_refresh).await {
                Ok(available) => available,
                Err(IarnetError::Cancelled) => return Err(IarnetError::Cancelled),
                Err(e) => {
                    log::warn!(
                        "capacity read failed for provider {}: {}; skipping",
                        provider.id(),
                        e
                    );
                    continue;
                }
            };
            if !request.fits_within(&available) {
                continue;
            }

            match self
                .deploy_on(cancel, &provider, component_id, language, request)
                .await
            {
                Ok(()) => return Ok(Some(provider.id().to_string())),
                Err(IarnetError::Cancelled) => return Err(IarnetError::Cancelled),
                Err(e) => {
                    // Adapter-level failure: the status machine already
                    // reacted; move on to the next candidate.
                    log::warn!(
                        "deploy of {} on provider {} failed: {}; trying next candidate",
                        component_id,
                        provider.id(),
                        e
                    );
                    continue;
                }
            }
        }
        Ok(None)
    }

    async fn deploy_on(
        &self,
        cancel: &CancellationToken,
        provider: &Arc<Provider>,
        component_id: &str,
        language: Language,
        request: &ResourceInfo,
    ) -> Result<()> {
        let env = self.ctx.component_env(component_id);
        provider
            .deploy(cancel, component_id, language, request, env)
            .await
    }

    /// Cross-node fallback over gossip candidates.
    ///
    /// Candidates are filtered by advertised capacity and tags, then tried
    /// in stable order; the first node that acknowledges wins. Every
    /// failure short of cancellation moves on to the next candidate.
    async fn remote_pass(
        &self,
        cancel: &CancellationToken,
        language: Language,
        request: &ResourceInfo,
    ) -> Result<Option<(String, String, String)>> {
        let Some(mesh) = &self.mesh else {
            return Ok(None);
        };

        for node in self.node_table.online_remote_nodes() {
            if cancel.is_cancelled() {
                return Err(IarnetError::Cancelled);
            }
            if !node.resource_tags.covers(&request.tags) {
                continue;
            }
            if !request.fits_within(&node.resource_capacity.available) {
                continue;
            }

            let server = match mesh
                .lookup_actor::<SchedulerServer>(&node.scheduler_address, LookupPolicy::patient())
                .await
            {
                Ok(Some(server)) => server,
                Ok(None) => {
                    log::debug!(
                        "no scheduler actor for node {} under '{}'",
                        node.node_id,
                        node.scheduler_address
                    );
                    continue;
                }
                Err(e) => {
                    log::debug!("scheduler lookup failed for node {}: {}", node.node_id, e);
                    continue;
                }
            };

            let message = ScheduleRemote { language, request: request.clone() };
            let response =
                tokio::time::timeout(REMOTE_RPC_TIMEOUT, server.ask::<ScheduleRemote>(&message))
                    .await;
            match response {
                Ok(Ok(RemoteSchedule {
                    provider_id,
                    component_id,
                })) => {
                    log::info!(
                        "component {} scheduled on remote node {} (provider {})",
                        component_id,
                        node.node_id,
                        provider_id
                    );
                    return Ok(Some((provider_id, node.node_id, component_id)));
                }
                Ok(Err(e)) => {
                    log::warn!(
                        "remote schedule on node {} failed: {}; trying next candidate",
                        node.node_id,
                        e
                    );
                    continue;
                }
                Err(_) => {
                    log::warn!(
                        "remote schedule on node {} timed out after {:?}; trying next candidate",
                        node.node_id,
                        REMOTE_RPC_TIMEOUT
                    );
                    continue;
                }
            }
        }
        Ok(None)
    }

    /// Tear a component down wherever it runs.
    ///
    /// The `provider_ref` encoding is the single routing input. For remote
    /// components, the local record is removed only after the owning node
    /// confirms; an aborted RPC leaves the record for a retry.
    #[tracing::instrument(
        name = "scheduler.undeploy_component",
        skip(self, cancel),
        fields(component_id = %component_id)
    )]
    pub async fn undeploy_component(
        &self,
        cancel: &CancellationToken,
        component_id: &str,
    ) -> Result<()> {
        let component =
            self.components
                .get(component_id)
                .ok_or_else(|| IarnetError::ComponentNotFound {
                    component_id: component_id.to_string(),
                })?;
        let provider_ref =
            component
                .provider_ref()
                .ok_or_else(|| IarnetError::ComponentNotBound {
                    component_id: component_id.to_string(),
                })?;

        match provider_ref {
            ProviderRef::Local { provider_id } => {
                let provider =
                    self.registry
                        .get(&provider_id)
                        .ok_or_else(|| IarnetError::ProviderNotFound {
                            provider_id: provider_id.clone(),
                        })?;
                provider.undeploy(cancel, component_id).await?;
                self.components.remove(component_id);
                Ok(())
            }
            ProviderRef::Remote {
                provider_id,
                node_id,
            } => {
                let mesh = self.mesh.as_ref().ok_or(IarnetError::MeshNotBootstrapped)?;
                // Prefer the scheduler_address recorded from gossip at
                // deploy time; fall back to the canonical per-peer name.
                let address = self
                    .node_table
                    .scheduler_address_for(&node_id)
                    .unwrap_or_else(|| crate::remote::names::scheduler(&node_id));
                let server = mesh
                    .lookup_actor::<SchedulerServer>(&address, LookupPolicy::patient())
                    .await
                    .map_err(|e| IarnetError::RemoteRpc(e.to_string()))?
                    .ok_or_else(|| IarnetError::RemoteNodeOffline {
                        node_id: node_id.clone(),
                    })?;

                let message = UndeployRemote {
                    component_id: component_id.to_string(),
                    provider_id,
                };
                tokio::time::timeout(REMOTE_RPC_TIMEOUT, server.ask::<UndeployRemote>(&message))
                    .await
                    .map_err(|_| {
                        IarnetError::RemoteRpc(format!(
                            "undeploy on node {} timed out after {:?}",
                            node_id, REMOTE_RPC_TIMEOUT
                        ))
                    })?
                    .map_err(|e| IarnetError::RemoteRpc(e.to_string()))?;

                self.components.remove(component_id);
                Ok(())
            }
        }
    }
}
