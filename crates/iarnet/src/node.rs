//! Node assembly and lifecycle.
//!
//! `IarnetNode::start` wires every subsystem together in dependency order:
//! mesh → runtime context → persistence recovery → node table → messaging
//! fabric → scheduler → RPC/gossip actors → background loops. `stop()`
//! cancels every loop and joins it, closes the fabric, and disconnects
//! adapters, so shutdown is deterministic.

use crate::actors::{Actor, ActorSystem};
use crate::config::IarnetConfig;
use crate::error::{IarnetError, Result};
use crate::messaging::{InboundMessage, MessagingFabric};
use crate::provider::adapter::{AdapterTimeouts, ProviderAdapter};
use crate::provider::fake::FakeProvider;
use crate::provider::persistence::{ProviderRecord, ProviderStore};
use crate::provider::{
    HttpComputeBackend, Provider, ProviderRegistry, ProviderSnapshot,
};
use crate::remote::gossip::{GossipActor, spawn_gossip_loop, spawn_peer_watch};
use crate::remote::mesh::{MeshConfig, MeshHandle, bootstrap_mesh};
use crate::remote::node_table::{NodeInfo, NodeSnapshot, NodeTable};
use crate::remote::server::SchedulerServer;
use crate::remote::{NodeId, names};
use crate::resources::{Capacity, Language, ResourceInfo, ResourceTags};
use crate::runtime::RuntimeContext;
use crate::scheduler::{Component, ComponentRegistry, Scheduler, retry};
use kameo::actor::{ActorRef, Spawn};
use parking_lot::Mutex;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What to bring up. Single-node and test deployments switch parts off.
#[derive(Debug, Clone, Copy)]
pub struct NodeOptions {
    /// Join the cluster mesh (gossip + cross-node scheduling).
    pub mesh: bool,
    /// Durable provider records + crash recovery.
    pub persistence: bool,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            mesh: true,
            persistence: true,
        }
    }
}

/// One running scheduler node.
pub struct IarnetNode {
    ctx: Arc<RuntimeContext>,
    registry: Arc<ProviderRegistry>,
    components: Arc<ComponentRegistry>,
    scheduler: Arc<Scheduler>,
    node_table: Arc<NodeTable>,
    mesh: Option<MeshHandle>,
    fabric: Arc<MessagingFabric>,
    actor_system: Arc<ActorSystem>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
    store: Option<ProviderStore>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    gossip_ref: Option<ActorRef<GossipActor>>,
    server_ref: Option<ActorRef<SchedulerServer>>,
}

impl IarnetNode {
    /// Start with the default options (mesh + persistence).
    ///
    /// The mesh swarm is a process-global: start at most one meshed node
    /// per process.
    pub async fn start(config: IarnetConfig) -> Result<Arc<Self>> {
        Self::start_with(config, NodeOptions::default()).await
    }

    pub async fn start_with(config: IarnetConfig, options: NodeOptions) -> Result<Arc<Self>> {
        let config = Arc::new(config);
        let cancel = CancellationToken::new();

        // ── Mesh ──────────────────────────────────────────────────────────────
        let mesh = if options.mesh {
            let mesh_config = MeshConfig {
                listen: Some(config.transport.rpc.scheduler.bind.clone()),
                mdns: config.gossip.mdns,
                seed_peers: config.gossip.seed_peers.clone(),
            };
            Some(
                bootstrap_mesh(&mesh_config)
                    .await
                    .map_err(|e| IarnetError::Internal(e.to_string()))?,
            )
        } else {
            None
        };
        let node_id = mesh
            .as_ref()
            .map(|m| NodeId::from_peer_id(*m.peer_id()))
            .unwrap_or_else(NodeId::random);

        let ctx = Arc::new(RuntimeContext::new(node_id, Arc::clone(&config)));
        log::info!(
            "starting node {} ({}) in domain {}",
            ctx.node_id,
            ctx.node_name,
            ctx.domain_id
        );

        // ── Providers: registry + crash recovery ──────────────────────────────
        let registry = Arc::new(ProviderRegistry::new());
        let store = if options.persistence {
            let store = ProviderStore::open(config.persistence.path.clone().into()).await?;
            recover_providers(&store, &registry, &config, &cancel).await?;
            Some(store)
        } else {
            None
        };

        // ── Node table ────────────────────────────────────────────────────────
        let node_table = Arc::new(NodeTable::new(
            initial_local_info(&ctx),
            config.gossip.stale_threshold(),
            config.gossip.prune_horizon(),
        ));

        // ── Messaging fabric + actor layer ────────────────────────────────────
        let (fabric, inbound) = MessagingFabric::bind(&config.transport.messaging.bind).await?;
        let actor_system = Arc::new(ActorSystem::new(
            Arc::clone(&fabric),
            config.scheduler.default_actor_concurrency,
        ));

        // ── Scheduler ─────────────────────────────────────────────────────────
        let components = Arc::new(ComponentRegistry::new());
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&ctx),
            Arc::clone(&registry),
            Arc::clone(&components),
            Arc::clone(&node_table),
            mesh.clone(),
        ));

        // ── Mesh-visible actors + background loops ────────────────────────────
        let mut tasks = Vec::new();
        let mut gossip_ref = None;
        let mut server_ref = None;

        if let Some(mesh_handle) = &mesh {
            let peer_id = *mesh_handle.peer_id();

            let gossip_actor = GossipActor::spawn(GossipActor::new(Arc::clone(&node_table)));
            mesh_handle
                .register_actor(gossip_actor.clone(), names::gossip(&peer_id))
                .await;
            gossip_ref = Some(gossip_actor);

            let server_actor =
                SchedulerServer::spawn(SchedulerServer::new(Arc::clone(&scheduler)));
            mesh_handle
                .register_actor(server_actor.clone(), names::scheduler(&peer_id))
                .await;
            server_ref = Some(server_actor);

            tasks.push(spawn_gossip_loop(
                Arc::clone(&ctx),
                mesh_handle.clone(),
                Arc::clone(&node_table),
                Arc::clone(&registry),
                config.gossip.interval(),
                cancel.clone(),
            ));
            tasks.push(spawn_peer_watch(
                mesh_handle.clone(),
                Arc::clone(&node_table),
                cancel.clone(),
            ));
        }

        tasks.push(registry.spawn_health_loop(config.health_check.interval(), cancel.clone()));
        tasks.push(node_table.spawn_sweep_loop(cancel.clone()));

        Ok(Arc::new(Self {
            ctx,
            registry,
            components,
            scheduler,
            node_table,
            mesh,
            fabric,
            actor_system,
            inbound: Mutex::new(Some(inbound)),
            store,
            cancel,
            tasks: Mutex::new(tasks),
            gossip_ref,
            server_ref,
        }))
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.ctx
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn fabric(&self) -> &Arc<MessagingFabric> {
        &self.fabric
    }

    pub fn components(&self) -> &Arc<ComponentRegistry> {
        &self.components
    }

    pub fn mesh(&self) -> Option<&MeshHandle> {
        self.mesh.as_ref()
    }

    pub fn actors(&self) -> &Arc<ActorSystem> {
        &self.actor_system
    }

    /// The inbound component-message stream. First caller takes it.
    pub fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        self.inbound.lock().take()
    }

    // ── Deploy / undeploy surface ─────────────────────────────────────────────

    /// Deploy with the configured caller-side retry policy.
    ///
    /// The returned component is already wrapped in an [`Actor`] wired to
    /// the messaging fabric.
    pub async fn deploy(
        &self,
        cancel: &CancellationToken,
        language: Language,
        request: ResourceInfo,
    ) -> Result<Arc<Component>> {
        let component = retry::deploy_with_retry(
            &self.scheduler,
            cancel,
            language,
            request,
            &self.ctx.config.scheduler.retry,
        )
        .await?;
        self.actor_system.register(Arc::clone(&component));
        Ok(component)
    }

    /// Single scheduling attempt, no retry.
    pub async fn deploy_once(
        &self,
        cancel: &CancellationToken,
        language: Language,
        request: ResourceInfo,
    ) -> Result<Arc<Component>> {
        let component = self
            .scheduler
            .deploy_component(cancel, language, request)
            .await?;
        self.actor_system.register(Arc::clone(&component));
        Ok(component)
    }

    pub async fn undeploy(&self, cancel: &CancellationToken, component_id: &str) -> Result<()> {
        self.scheduler
            .undeploy_component(cancel, component_id)
            .await?;
        self.actor_system.remove(component_id);
        Ok(())
    }

    /// The actor wrapping a deployed component, if any.
    pub fn actor_for(&self, component_id: &str) -> Option<Arc<Actor>> {
        self.actor_system.get(component_id)
    }

    // ── Provider administration ───────────────────────────────────────────────

    /// Register a backend. Non-ephemeral providers are persisted and
    /// recovered after a crash. A failed initial connect leaves the
    /// adapter registered and Disconnected; the health loop keeps trying.
    pub async fn register_provider(
        &self,
        name: &str,
        host: &str,
        port: u16,
        ephemeral: bool,
    ) -> Result<Arc<Provider>> {
        let id = uuid::Uuid::new_v4().to_string();
        let backend = Arc::new(HttpComputeBackend::new(host, port)?);
        let adapter = ProviderAdapter::new(
            id.clone(),
            name,
            host,
            port,
            backend,
            adapter_timeouts(&self.ctx.config),
        );
        let provider = self.registry.register(Provider::Real(adapter))?;

        if let Err(e) = provider.connect(&self.cancel).await {
            log::warn!(
                "provider {} registered but initial connect failed: {}",
                id,
                e
            );
        } else if let Err(e) = provider.health_check(&self.cancel).await {
            log::warn!("initial health check for provider {} failed: {}", id, e);
        }

        if !ephemeral
            && let Some(store) = &self.store
        {
            store
                .upsert(ProviderRecord::new(id.clone(), name, host, port))
                .await?;
        }
        Ok(provider)
    }

    /// Add a placeholder provider. Never persisted, never scheduled.
    pub fn register_fake_provider(
        &self,
        name: &str,
        capacity: Capacity,
        tags: ResourceTags,
    ) -> Result<Arc<Provider>> {
        let id = format!("fake-{}", uuid::Uuid::new_v4());
        self.registry
            .register(Provider::Fake(FakeProvider::new(id, name, capacity, tags)))
    }

    /// Remove a provider from memory and, for non-fake providers, from
    /// the durable store.
    pub async fn unregister_provider(&self, provider_id: &str) -> Result<()> {
        let provider =
            self.registry
                .remove(provider_id)
                .ok_or_else(|| IarnetError::ProviderNotFound {
                    provider_id: provider_id.to_string(),
                })?;
        if let Err(e) = provider.disconnect(&self.cancel).await {
            log::debug!("disconnect during unregister of {} failed: {}", provider_id, e);
        }
        if !provider.is_fake()
            && let Some(store) = &self.store
        {
            store.delete(provider_id).await?;
        }
        Ok(())
    }

    /// Probe a backend without registering it ("test connection").
    pub async fn test_connection(&self, host: &str, port: u16) -> Result<Capacity> {
        let backend = Arc::new(HttpComputeBackend::new(host, port)?);
        let adapter = ProviderAdapter::new(
            "connection-probe",
            "connection-probe",
            host,
            port,
            backend,
            adapter_timeouts(&self.ctx.config),
        );
        adapter.get_capacity(&self.cancel, true).await
    }

    /// Administrative listing with aggregates. Placeholders included on
    /// request; they count toward capacity, never toward scheduling.
    pub fn list_providers(
        &self,
        include_fake: bool,
    ) -> (Vec<ProviderSnapshot>, Capacity, ResourceTags) {
        let snapshots = self.registry.snapshots(include_fake);
        let (capacity, tags) = self.registry.aggregate_capacity(include_fake);
        (snapshots, capacity, tags)
    }

    // ── Cluster queries ───────────────────────────────────────────────────────

    pub fn local_node(&self) -> NodeSnapshot {
        self.node_table.local_node()
    }

    pub fn known_nodes(&self) -> Vec<NodeSnapshot> {
        self.node_table.known_nodes()
    }

    pub fn online_nodes(&self) -> Vec<NodeInfo> {
        self.node_table.online_remote_nodes()
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────

    /// Deterministic shutdown: cancel and join every background loop,
    /// close the fabric, disconnect adapters, stop the RPC actors.
    pub async fn stop(&self) {
        log::info!("stopping node {}", self.ctx.node_id);
        self.cancel.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                log::debug!("background task join error during shutdown: {}", e);
            }
        }

        self.fabric.close().await;

        let disconnect_token = CancellationToken::new();
        for provider in self.registry.list() {
            if let Err(e) = provider.disconnect(&disconnect_token).await {
                log::debug!("disconnect of {} during shutdown failed: {}", provider.id(), e);
            }
        }

        if let Some(gossip) = &self.gossip_ref {
            gossip.kill();
        }
        if let Some(server) = &self.server_ref {
            server.kill();
        }
        log::info!("node {} stopped", self.ctx.node_id);
    }
}

fn adapter_timeouts(config: &IarnetConfig) -> AdapterTimeouts {
    AdapterTimeouts {
        rpc: config.health_check.timeout(),
        deploy: config.health_check.deploy_timeout(),
    }
}

fn initial_local_info(ctx: &RuntimeContext) -> NodeInfo {
    NodeInfo {
        node_id: ctx.node_id.to_string(),
        node_name: ctx.node_name.clone(),
        domain_id: ctx.domain_id.clone(),
        address: String::new(),
        scheduler_address: ctx.scheduler_address.clone(),
        resource_capacity: Capacity::default(),
        resource_tags: ResourceTags::default(),
        timestamp: OffsetDateTime::now_utc().unix_timestamp(),
    }
}

/// Rebuild adapters for every persisted provider, preserving ids.
///
/// Connect failures keep the row and the adapter; the health loop owns
/// reconnection from here.
async fn recover_providers(
    store: &ProviderStore,
    registry: &Arc<ProviderRegistry>,
    config: &IarnetConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let records = store.load_all().await?;
    if records.is_empty() {
        return Ok(());
    }
    log::info!("recovering {} persisted provider(s)", records.len());
    for record in records {
        let backend = Arc::new(HttpComputeBackend::new(&record.host, record.port)?);
        let adapter = ProviderAdapter::new(
            record.id.clone(),
            record.name.clone(),
            record.host.clone(),
            record.port,
            backend,
            adapter_timeouts(config),
        );
        let provider = registry.register(Provider::Real(adapter))?;
        match provider.connect(cancel).await {
            Ok(()) => {
                if let Err(e) = provider.health_check(cancel).await {
                    log::debug!("recovered provider {} health check failed: {}", record.id, e);
                }
            }
            Err(e) => {
                log::warn!(
                    "recovered provider {} is unreachable (left disconnected): {}",
                    record.id,
                    e
                );
            }
        }
    }
    Ok(())
}
