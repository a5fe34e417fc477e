//! Node-to-node RPC surface.
//!
//! Every node runs one `SchedulerServer` actor, registered in the DHT as
//! `scheduler::peer::{peer_id}`. Remote peers send it `ScheduleRemote`
//! (strictly-local scheduling, no recursive fallback, which is what keeps
//! the cluster loop-free), `UndeployRemote` (adapter lookup by provider
//! id), and `ListProviders` (administrative listing with aggregates).

use crate::error::IarnetError;
use crate::provider::ProviderSnapshot;
use crate::resources::{Capacity, Language, ResourceInfo, ResourceTags};
use crate::scheduler::Scheduler;
use kameo::Actor;
use kameo::message::{Context, Message};
use kameo::remote::_internal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// ── Messages ──────────────────────────────────────────────────────────────────

/// Schedule on the receiving node only. No further remote fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRemote {
    pub language: Language,
    pub request: ResourceInfo,
}

/// Response from `ScheduleRemote`: the chosen provider and the backend
/// instance id the receiving node generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSchedule {
    pub provider_id: String,
    pub component_id: String,
}

/// Remove a component from one of the receiving node's providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndeployRemote {
    pub component_id: String,
    pub provider_id: String,
}

/// Snapshot of the receiving node's providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListProviders {
    pub include_fake: bool,
}

/// Response from `ListProviders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderListing {
    pub providers: Vec<ProviderSnapshot>,
    pub total_capacity: Capacity,
    pub resource_tags: ResourceTags,
}

// ── Actor ─────────────────────────────────────────────────────────────────────

/// Per-node RPC actor serving the cluster.
#[derive(Actor)]
pub struct SchedulerServer {
    scheduler: Arc<Scheduler>,
}

impl SchedulerServer {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

// ── Message handlers ──────────────────────────────────────────────────────────

impl Message<ScheduleRemote> for SchedulerServer {
    type Reply = Result<RemoteSchedule, IarnetError>;

    #[tracing::instrument(
        name = "rpc.schedule_remote",
        skip(self, msg, _ctx),
        fields(
            language = %msg.language,
            provider_id = tracing::field::Empty,
            component_id = tracing::field::Empty,
        )
    )]
    async fn handle(
        &mut self,
        msg: ScheduleRemote,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let cancel = CancellationToken::new();
        let (provider_id, component_id) = self
            .scheduler
            .schedule_local(&cancel, msg.language, msg.request)
            .await?;
        tracing::Span::current()
            .record("provider_id", provider_id.as_str())
            .record("component_id", component_id.as_str());
        Ok(RemoteSchedule {
            provider_id,
            component_id,
        })
    }
}

impl Message<UndeployRemote> for SchedulerServer {
    type Reply = Result<(), IarnetError>;

    #[tracing::instrument(
        name = "rpc.undeploy_remote",
        skip(self, _ctx),
        fields(component_id = %msg.component_id, provider_id = %msg.provider_id)
    )]
    async fn handle(
        &mut self,
        msg: UndeployRemote,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let provider = self
            .scheduler
            .registry()
            .get(&msg.provider_id)
            .ok_or_else(|| IarnetError::ProviderNotFound {
                provider_id: msg.provider_id.clone(),
            })?;
        let cancel = CancellationToken::new();
        provider.undeploy(&cancel, &msg.component_id).await
    }
}

impl Message<ListProviders> for SchedulerServer {
    type Reply = Result<ProviderListing, IarnetError>;

    #[tracing::instrument(
        name = "rpc.list_providers",
        skip(self, _ctx),
        fields(include_fake = msg.include_fake, count = tracing::field::Empty)
    )]
    async fn handle(
        &mut self,
        msg: ListProviders,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let registry = self.scheduler.registry();
        let providers = registry.snapshots(msg.include_fake);
        let (total_capacity, resource_tags) = registry.aggregate_capacity(msg.include_fake);
        tracing::Span::current().record("count", providers.len());
        Ok(ProviderListing {
            providers,
            total_capacity,
            resource_tags,
        })
    }
}

// ── kameo remote wiring ───────────────────────────────────────────────────────

impl kameo::remote::RemoteActor for SchedulerServer {
    const REMOTE_ID: &'static str = "iarnet::SchedulerServer";
}

#[_internal::linkme::distributed_slice(_internal::REMOTE_ACTORS)]
#[linkme(crate = _internal::linkme)]
static SCHEDULER_SERVER_REG: (&'static str, _internal::RemoteActorFns) = (
    <SchedulerServer as kameo::remote::RemoteActor>::REMOTE_ID,
    _internal::RemoteActorFns {
        link: (|actor_id, sibling_id, sibling_remote_id| {
            Box::pin(_internal::link::<SchedulerServer>(
                actor_id,
                sibling_id,
                sibling_remote_id,
            ))
        }) as _internal::RemoteLinkFn,
        unlink: (|actor_id, sibling_id| {
            Box::pin(_internal::unlink::<SchedulerServer>(actor_id, sibling_id))
        }) as _internal::RemoteUnlinkFn,
        signal_link_died: (|dead_actor_id, notified_actor_id, stop_reason| {
            Box::pin(_internal::signal_link_died::<SchedulerServer>(
                dead_actor_id,
                notified_actor_id,
                stop_reason,
            ))
        }) as _internal::RemoteSignalLinkDiedFn,
    },
);

macro_rules! remote_scheduler_msg_impl {
    ($msg_ty:ty, $remote_id:expr, $static_name:ident) => {
        impl kameo::remote::RemoteMessage<$msg_ty> for SchedulerServer {
            const REMOTE_ID: &'static str = $remote_id;
        }

        #[_internal::linkme::distributed_slice(_internal::REMOTE_MESSAGES)]
        #[linkme(crate = _internal::linkme)]
        static $static_name: (
            _internal::RemoteMessageRegistrationID<'static>,
            _internal::RemoteMessageFns,
        ) = (
            _internal::RemoteMessageRegistrationID {
                actor_remote_id: <SchedulerServer as kameo::remote::RemoteActor>::REMOTE_ID,
                message_remote_id:
                    <SchedulerServer as kameo::remote::RemoteMessage<$msg_ty>>::REMOTE_ID,
            },
            _internal::RemoteMessageFns {
                ask: (|actor_id, msg, mailbox_timeout, reply_timeout| {
                    Box::pin(_internal::ask::<SchedulerServer, $msg_ty>(
                        actor_id,
                        msg,
                        mailbox_timeout,
                        reply_timeout,
                    ))
                }) as _internal::RemoteAskFn,
                try_ask: (|actor_id, msg, reply_timeout| {
                    Box::pin(_internal::try_ask::<SchedulerServer, $msg_ty>(
                        actor_id,
                        msg,
                        reply_timeout,
                    ))
                }) as _internal::RemoteTryAskFn,
                tell: (|actor_id, msg, mailbox_timeout| {
                    Box::pin(_internal::tell::<SchedulerServer, $msg_ty>(
                        actor_id,
                        msg,
                        mailbox_timeout,
                    ))
                }) as _internal::RemoteTellFn,
                try_tell: (|actor_id, msg| {
                    Box::pin(_internal::try_tell::<SchedulerServer, $msg_ty>(
                        actor_id, msg,
                    ))
                }) as _internal::RemoteTryTellFn,
            },
        );
    };
}

remote_scheduler_msg_impl!(
    ScheduleRemote,
    "iarnet::Scheduler::ScheduleRemote",
    REG_SCHEDULE_REMOTE
);
remote_scheduler_msg_impl!(
    UndeployRemote,
    "iarnet::Scheduler::UndeployRemote",
    REG_UNDEPLOY_REMOTE
);
remote_scheduler_msg_impl!(
    ListProviders,
    "iarnet::Scheduler::ListProviders",
    REG_LIST_PROVIDERS
);
