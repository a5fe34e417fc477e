//! Mesh-level tests for the scheduler RPC actor and the gossip actor.
//!
//! A single shared swarm plays both "nodes": actors registered under
//! unique DHT names are looked up and called exactly the way a remote
//! peer would call them.

use crate::config::IarnetConfig;
use crate::provider::adapter::{AdapterTimeouts, ProviderAdapter};
use crate::provider::{Provider, ProviderRegistry};
use crate::remote::gossip::{GossipActor, NodeAnnouncement};
use crate::remote::mesh::LookupPolicy;
use crate::remote::node_id::NodeId;
use crate::remote::node_table::{NodeInfo, NodeTable};
use crate::remote::server::{
    ListProviders, RemoteSchedule, ScheduleRemote, SchedulerServer, UndeployRemote,
};
use crate::remote::test_helpers::fixtures::get_test_mesh;
use crate::resources::{Capacity, Language, ResourceInfo, ResourceTags};
use crate::runtime::RuntimeContext;
use crate::scheduler::{ComponentRegistry, Scheduler};
use crate::test_support::InMemoryBackend;
use kameo::actor::Spawn;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn empty_node_table(ctx: &RuntimeContext) -> Arc<NodeTable> {
    Arc::new(NodeTable::new(
        NodeInfo {
            node_id: ctx.node_id.to_string(),
            node_name: ctx.node_name.clone(),
            domain_id: ctx.domain_id.clone(),
            address: String::new(),
            scheduler_address: ctx.scheduler_address.clone(),
            resource_capacity: Capacity::default(),
            resource_tags: ResourceTags::default(),
            timestamp: 0,
        },
        Duration::from_secs(15),
        Duration::from_secs(300),
    ))
}

/// Scheduler over one in-memory provider, playing the remote node's side.
async fn remote_side_scheduler(backend: Arc<InMemoryBackend>) -> Arc<Scheduler> {
    let cancel = CancellationToken::new();
    let registry = Arc::new(ProviderRegistry::new());
    let provider = registry
        .register(Provider::Real(ProviderAdapter::new(
            "p-remote",
            "p-remote",
            "127.0.0.1",
            8200,
            backend,
            AdapterTimeouts::default(),
        )))
        .unwrap();
    provider.connect(&cancel).await.unwrap();
    provider.health_check(&cancel).await.unwrap();

    let ctx = Arc::new(RuntimeContext::new(
        NodeId::random(),
        Arc::new(IarnetConfig::default()),
    ));
    let table = empty_node_table(&ctx);
    Arc::new(Scheduler::new(
        ctx,
        registry,
        Arc::new(ComponentRegistry::new()),
        table,
        None,
    ))
}

#[tokio::test]
async fn schedule_remote_deploys_and_returns_ids() {
    let mesh = get_test_mesh().await.clone();
    let backend = Arc::new(
        InMemoryBackend::new(ResourceInfo::new(8000, 1 << 30, 0))
            .with_languages(vec![Language::Python]),
    );
    let scheduler = remote_side_scheduler(backend.clone()).await;

    let server = SchedulerServer::spawn(SchedulerServer::new(scheduler));
    let name = format!("scheduler::test::{}", uuid::Uuid::new_v4());
    mesh.register_actor(server.clone(), name.clone()).await;

    let remote = mesh
        .lookup_actor::<SchedulerServer>(&name, LookupPolicy::patient())
        .await
        .unwrap()
        .expect("server should be resolvable");

    let response: RemoteSchedule = remote
        .ask::<ScheduleRemote>(&ScheduleRemote {
            language: Language::Python,
            request: ResourceInfo::new(500, 1 << 20, 0),
        })
        .await
        .expect("remote schedule should succeed");

    assert_eq!(response.provider_id, "p-remote");
    assert!(response.component_id.starts_with("comp."));
    assert_eq!(backend.deployed_ids(), vec![response.component_id.clone()]);

    // Round trip: the caller later routes an undeploy back here.
    remote
        .ask::<UndeployRemote>(&UndeployRemote {
            component_id: response.component_id,
            provider_id: response.provider_id,
        })
        .await
        .expect("remote undeploy should succeed");
    assert!(backend.deployed_ids().is_empty());

    server.kill();
}

#[tokio::test]
async fn schedule_remote_reports_no_provider_when_saturated() {
    let mesh = get_test_mesh().await.clone();
    let backend = Arc::new(
        InMemoryBackend::new(ResourceInfo::new(100, 1 << 20, 0))
            .with_languages(vec![Language::Python]),
    );
    let scheduler = remote_side_scheduler(backend).await;

    let server = SchedulerServer::spawn(SchedulerServer::new(scheduler));
    let name = format!("scheduler::test::{}", uuid::Uuid::new_v4());
    mesh.register_actor(server.clone(), name.clone()).await;

    let remote = mesh
        .lookup_actor::<SchedulerServer>(&name, LookupPolicy::patient())
        .await
        .unwrap()
        .unwrap();

    let result = remote
        .ask::<ScheduleRemote>(&ScheduleRemote {
            language: Language::Python,
            request: ResourceInfo::new(50_000, 1 << 40, 4),
        })
        .await;
    assert!(result.is_err(), "oversized request must not schedule");

    server.kill();
}

#[tokio::test]
async fn list_providers_returns_snapshots_and_aggregates() {
    let mesh = get_test_mesh().await.clone();
    let backend = Arc::new(InMemoryBackend::new(ResourceInfo::new(4000, 1 << 30, 0)));
    let scheduler = remote_side_scheduler(backend).await;

    let server = SchedulerServer::spawn(SchedulerServer::new(scheduler));
    let name = format!("scheduler::test::{}", uuid::Uuid::new_v4());
    mesh.register_actor(server.clone(), name.clone()).await;

    let remote = mesh
        .lookup_actor::<SchedulerServer>(&name, LookupPolicy::patient())
        .await
        .unwrap()
        .unwrap();

    let listing = remote
        .ask::<ListProviders>(&ListProviders { include_fake: true })
        .await
        .expect("listing should succeed");
    assert_eq!(listing.providers.len(), 1);
    assert_eq!(listing.providers[0].id, "p-remote");
    assert_eq!(listing.total_capacity.total.cpu_millicores, 4000);

    server.kill();
}

/// A `NodeInfo` advertising a peer whose scheduler actor is registered
/// under `scheduler_address`.
fn advertised_peer(node_id: &str, scheduler_address: &str, cpu_available: i64) -> NodeInfo {
    NodeInfo {
        node_id: node_id.to_string(),
        node_name: node_id.to_string(),
        domain_id: "default".to_string(),
        address: "/ip4/127.0.0.1/tcp/0".to_string(),
        scheduler_address: scheduler_address.to_string(),
        resource_capacity: Capacity::from_total_used(
            ResourceInfo::new(cpu_available, 1 << 32, 0),
            ResourceInfo::zero(),
        ),
        resource_tags: ResourceTags {
            cpu: true,
            memory: true,
            ..Default::default()
        },
        timestamp: 1,
    }
}

/// Scheduler "node A" with one small local provider and a mesh handle,
/// so cross-node fallback is reachable.
async fn fallback_side_scheduler(
    local_cpu: i64,
    mesh: crate::remote::mesh::MeshHandle,
) -> Arc<Scheduler> {
    let cancel = CancellationToken::new();
    let registry = Arc::new(ProviderRegistry::new());
    let backend = Arc::new(
        InMemoryBackend::new(ResourceInfo::new(local_cpu, 1 << 30, 0))
            .with_languages(vec![Language::Python]),
    );
    let provider = registry
        .register(Provider::Real(ProviderAdapter::new(
            "p-local",
            "p-local",
            "127.0.0.1",
            8200,
            backend,
            AdapterTimeouts::default(),
        )))
        .unwrap();
    provider.connect(&cancel).await.unwrap();
    provider.health_check(&cancel).await.unwrap();

    let ctx = Arc::new(RuntimeContext::new(
        NodeId::random(),
        Arc::new(IarnetConfig::default()),
    ));
    let table = empty_node_table(&ctx);
    Arc::new(Scheduler::new(
        ctx,
        registry,
        Arc::new(ComponentRegistry::new()),
        table,
        Some(mesh),
    ))
}

#[tokio::test]
async fn cross_node_fallback_schedules_on_an_advertised_peer() {
    let mesh = get_test_mesh().await.clone();

    // "Node B": plenty of capacity behind a SchedulerServer.
    let b_backend = Arc::new(
        InMemoryBackend::new(ResourceInfo::new(2000, 1 << 30, 0))
            .with_languages(vec![Language::Python]),
    );
    let b_scheduler = remote_side_scheduler(b_backend.clone()).await;
    let b_server = SchedulerServer::spawn(SchedulerServer::new(b_scheduler));
    let b_address = format!("scheduler::test::{}", uuid::Uuid::new_v4());
    mesh.register_actor(b_server.clone(), b_address.clone()).await;
    let b_node_id = NodeId::random().to_string();

    // "Node A": local capacity of 100 cannot hold the request.
    let a_scheduler = fallback_side_scheduler(100, mesh.clone()).await;
    a_scheduler
        .node_table()
        .observe(advertised_peer(&b_node_id, &b_address, 2000));

    let cancel = CancellationToken::new();
    let component = a_scheduler
        .deploy_component(&cancel, Language::Python, ResourceInfo::new(500, 1 << 20, 0))
        .await
        .expect("fallback should land on node B");

    match component.provider_ref().unwrap() {
        crate::scheduler::ProviderRef::Remote {
            provider_id,
            node_id,
        } => {
            assert_eq!(provider_id, "p-remote");
            assert_eq!(node_id, b_node_id);
        }
        other => panic!("expected a remote binding, got {:?}", other),
    }
    // The record is keyed by the instance id node B generated.
    assert_eq!(b_backend.deployed_ids(), vec![component.id.clone()]);

    // Undeploy routes back through the recorded scheduler_address and
    // removes the record only after node B confirms.
    a_scheduler
        .undeploy_component(&cancel, &component.id)
        .await
        .expect("remote undeploy should succeed");
    assert!(b_backend.deployed_ids().is_empty());
    assert!(a_scheduler.components().is_empty());

    b_server.kill();
}

#[tokio::test]
async fn remote_candidates_without_the_tags_are_filtered_before_any_rpc() {
    let mesh = get_test_mesh().await.clone();
    let a_scheduler = fallback_side_scheduler(100, mesh).await;

    // Advertised peer has cpu+memory only; the request needs a gpu. The
    // scheduler_address is deliberately unresolvable; reaching the RPC
    // would hang the test on lookups.
    a_scheduler.node_table().observe(advertised_peer(
        &NodeId::random().to_string(),
        "scheduler::test::never-registered",
        100_000,
    ));

    let cancel = CancellationToken::new();
    let err = a_scheduler
        .deploy_component(
            &cancel,
            Language::Python,
            ResourceInfo::new(500, 1 << 20, 1).with_tag("gpu"),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        crate::error::IarnetError::NoAvailableProvider
    ));
    assert!(a_scheduler.components().is_empty());
}

#[tokio::test]
async fn failed_remote_undeploy_keeps_the_component_record() {
    let mesh = get_test_mesh().await.clone();

    let b_backend = Arc::new(
        InMemoryBackend::new(ResourceInfo::new(2000, 1 << 30, 0))
            .with_languages(vec![Language::Python]),
    );
    let b_scheduler = remote_side_scheduler(b_backend).await;
    let b_server = SchedulerServer::spawn(SchedulerServer::new(b_scheduler));
    let b_address = format!("scheduler::test::{}", uuid::Uuid::new_v4());
    mesh.register_actor(b_server.clone(), b_address.clone()).await;
    let b_node_id = NodeId::random().to_string();

    let a_scheduler = fallback_side_scheduler(100, mesh.clone()).await;
    a_scheduler
        .node_table()
        .observe(advertised_peer(&b_node_id, &b_address, 2000));

    let cancel = CancellationToken::new();
    let component = a_scheduler
        .deploy_component(&cancel, Language::Python, ResourceInfo::new(500, 1 << 20, 0))
        .await
        .unwrap();

    // Node B goes down before the undeploy.
    b_server.kill();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let result = a_scheduler.undeploy_component(&cancel, &component.id).await;
    assert!(result.is_err(), "undeploy against a dead node must fail");
    assert!(
        a_scheduler.components().get(&component.id).is_some(),
        "record must survive until the owner confirms"
    );
}

#[tokio::test]
async fn gossip_actor_folds_announcements_into_the_table() {
    let mesh = get_test_mesh().await.clone();
    let ctx = Arc::new(RuntimeContext::new(
        NodeId::random(),
        Arc::new(IarnetConfig::default()),
    ));
    let table = empty_node_table(&ctx);

    let gossip = GossipActor::spawn(GossipActor::new(Arc::clone(&table)));
    let name = format!("gossip::test::{}", uuid::Uuid::new_v4());
    mesh.register_actor(gossip.clone(), name.clone()).await;

    let remote = mesh
        .lookup_actor::<GossipActor>(&name, LookupPolicy::patient())
        .await
        .unwrap()
        .expect("gossip actor should be resolvable");

    let announced = NodeInfo {
        node_id: NodeId::random().to_string(),
        node_name: "peer-node".to_string(),
        domain_id: "default".to_string(),
        address: "/ip4/10.0.0.2/tcp/9600".to_string(),
        scheduler_address: "scheduler::peer::peer-node".to_string(),
        resource_capacity: Capacity::from_total_used(
            ResourceInfo::new(2000, 1 << 30, 0),
            ResourceInfo::zero(),
        ),
        resource_tags: ResourceTags {
            cpu: true,
            ..Default::default()
        },
        timestamp: 1,
    };
    remote
        .ask::<NodeAnnouncement>(&NodeAnnouncement {
            info: announced.clone(),
        })
        .await
        .expect("announcement should be accepted");

    let online = table.online_remote_nodes();
    assert_eq!(online.len(), 1);
    assert_eq!(online[0], announced);

    gossip.kill();
}
