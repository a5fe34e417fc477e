//! Gossip exchange: periodic broadcast of this node's `NodeInfo` to every
//! live peer, and the receiving actor that folds announcements into the
//! node table.
//!
//! Each node registers one `GossipActor` in the DHT under
//! `gossip::peer::{peer_id}`. The broadcast loop rebuilds the local
//! announcement from the provider registry every tick (non-fake aggregate)
//! and tells it to each peer's gossip actor. Delivery is best-effort:
//! a missed tick is repaired by the next one, and TTL sweeping handles
//! peers that stay silent.

use crate::provider::ProviderRegistry;
use crate::remote::mesh::{LookupPolicy, MeshHandle};
use crate::remote::names;
use crate::remote::node_table::{NodeInfo, NodeTable};
use crate::runtime::RuntimeContext;
use kameo::Actor;
use kameo::message::{Context, Message};
use kameo::remote::_internal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ── Wire types ────────────────────────────────────────────────────────────────

/// One gossip message: the sender's current self-description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAnnouncement {
    pub info: NodeInfo,
}

// ── Receiving actor ───────────────────────────────────────────────────────────

/// Per-node actor that receives announcements from peers.
///
/// Registered in the DHT as `gossip::peer::{peer_id}`.
#[derive(Actor)]
pub struct GossipActor {
    table: Arc<NodeTable>,
}

impl GossipActor {
    pub fn new(table: Arc<NodeTable>) -> Self {
        Self { table }
    }
}

impl Message<NodeAnnouncement> for GossipActor {
    type Reply = ();

    #[tracing::instrument(
        name = "gossip.receive",
        skip(self, _ctx),
        fields(node_id = %msg.info.node_id)
    )]
    async fn handle(
        &mut self,
        msg: NodeAnnouncement,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.table.observe(msg.info);
    }
}

// ── Broadcast loop ────────────────────────────────────────────────────────────

/// Build this node's announcement from live registry state.
pub fn build_local_announcement(
    ctx: &RuntimeContext,
    mesh: &MeshHandle,
    registry: &ProviderRegistry,
) -> NodeInfo {
    let (capacity, tags) = registry.aggregate_capacity(false);
    NodeInfo {
        node_id: ctx.node_id.to_string(),
        node_name: ctx.node_name.clone(),
        domain_id: ctx.domain_id.clone(),
        address: mesh.listen_addrs().into_iter().next().unwrap_or_default(),
        scheduler_address: ctx.scheduler_address.clone(),
        resource_capacity: capacity,
        resource_tags: tags,
        timestamp: OffsetDateTime::now_utc().unix_timestamp(),
    }
}

/// Start the periodic broadcast.
///
/// Every `interval`: refresh the local table entry, then announce to each
/// peer the mesh currently believes alive. A peer whose gossip actor
/// cannot be resolved this tick is skipped with a debug log; no retries,
/// the next tick covers it.
pub fn spawn_gossip_loop(
    ctx: Arc<RuntimeContext>,
    mesh: MeshHandle,
    table: Arc<NodeTable>,
    registry: Arc<ProviderRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("gossip loop stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let info = build_local_announcement(&ctx, &mesh, &registry);
            table.set_local(info.clone());
            let announcement = NodeAnnouncement { info };

            for peer_id in mesh.known_peer_ids() {
                let name = names::gossip(&peer_id);
                let peer_actor = match mesh.lookup_actor::<GossipActor>(&name, LookupPolicy::Single).await {
                    Ok(Some(actor)) => actor,
                    Ok(None) => {
                        log::debug!("gossip: no actor under '{}' yet", name);
                        continue;
                    }
                    Err(e) => {
                        log::debug!("gossip: lookup failed for '{}': {}", name, e);
                        continue;
                    }
                };
                if let Err(e) = peer_actor.tell(&announcement).send() {
                    log::debug!("gossip: announce to {} failed: {}", peer_id, e);
                }
            }
        }
    })
}

/// Watch mesh peer-expiry events and downgrade the corresponding table
/// entries immediately instead of waiting out the TTL.
pub fn spawn_peer_watch(
    mesh: MeshHandle,
    table: Arc<NodeTable>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    use crate::remote::mesh::PeerEvent;
    let mut events = mesh.subscribe_peer_events();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return,
                event = events.recv() => event,
            };
            match event {
                Ok(PeerEvent::Expired(peer_id)) => {
                    table.mark_offline(&peer_id.to_string());
                }
                Ok(PeerEvent::Discovered(_)) => {
                    // The next gossip tick introduces the newcomer.
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("peer-event watcher lagged by {} events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}

// ── kameo remote wiring ───────────────────────────────────────────────────────

impl kameo::remote::RemoteActor for GossipActor {
    const REMOTE_ID: &'static str = "iarnet::GossipActor";
}

#[_internal::linkme::distributed_slice(_internal::REMOTE_ACTORS)]
#[linkme(crate = _internal::linkme)]
static GOSSIP_ACTOR_REG: (&'static str, _internal::RemoteActorFns) = (
    <GossipActor as kameo::remote::RemoteActor>::REMOTE_ID,
    _internal::RemoteActorFns {
        link: (|actor_id, sibling_id, sibling_remote_id| {
            Box::pin(_internal::link::<GossipActor>(
                actor_id,
                sibling_id,
                sibling_remote_id,
            ))
        }) as _internal::RemoteLinkFn,
        unlink: (|actor_id, sibling_id| {
            Box::pin(_internal::unlink::<GossipActor>(actor_id, sibling_id))
        }) as _internal::RemoteUnlinkFn,
        signal_link_died: (|dead_actor_id, notified_actor_id, stop_reason| {
            Box::pin(_internal::signal_link_died::<GossipActor>(
                dead_actor_id,
                notified_actor_id,
                stop_reason,
            ))
        }) as _internal::RemoteSignalLinkDiedFn,
    },
);

macro_rules! remote_gossip_msg_impl {
    ($msg_ty:ty, $remote_id:expr, $static_name:ident) => {
        impl kameo::remote::RemoteMessage<$msg_ty> for GossipActor {
            const REMOTE_ID: &'static str = $remote_id;
        }

        #[_internal::linkme::distributed_slice(_internal::REMOTE_MESSAGES)]
        #[linkme(crate = _internal::linkme)]
        static $static_name: (
            _internal::RemoteMessageRegistrationID<'static>,
            _internal::RemoteMessageFns,
        ) = (
            _internal::RemoteMessageRegistrationID {
                actor_remote_id: <GossipActor as kameo::remote::RemoteActor>::REMOTE_ID,
                message_remote_id:
                    <GossipActor as kameo::remote::RemoteMessage<$msg_ty>>::REMOTE_ID,
            },
            _internal::RemoteMessageFns {
                ask: (|actor_id, msg, mailbox_timeout, reply_timeout| {
                    Box::pin(_internal::ask::<GossipActor, $msg_ty>(
                        actor_id,
                        msg,
                        mailbox_timeout,
                        reply_timeout,
                    ))
                }) as _internal::RemoteAskFn,
                try_ask: (|actor_id, msg, reply_timeout| {
                    Box::pin(_internal::try_ask::<GossipActor, $msg_ty>(
                        actor_id,
                        msg,
                        reply_timeout,
                    ))
                }) as _internal::RemoteTryAskFn,
                tell: (|actor_id, msg, mailbox_timeout| {
                    Box::pin(_internal::tell::<GossipActor, $msg_ty>(
                        actor_id,
                        msg,
                        mailbox_timeout,
                    ))
                }) as _internal::RemoteTellFn,
                try_tell: (|actor_id, msg| {
                    Box::pin(_internal::try_tell::<GossipActor, $msg_ty>(actor_id, msg))
                }) as _internal::RemoteTryTellFn,
            },
        );
    };
}

remote_gossip_msg_impl!(
    NodeAnnouncement,
    "iarnet::Gossip::NodeAnnouncement",
    REG_NODE_ANNOUNCEMENT
);
