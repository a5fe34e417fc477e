//! Actor bookkeeping for deployed components.
//!
//! `ActorSystem` owns one [`Actor`] per component, wires each component's
//! delivery callback to the messaging fabric at registration time, and
//! keeps every actor in a shared [`ActorGroup`] for round-robin dispatch.
//! The execution layer drives completion through
//! [`ActorSystem::on_task_done`].

use crate::actors::{Actor, ActorGroup, SendOutcome};
use crate::error::{IarnetError, Result};
use crate::messaging::{Envelope, MessagingFabric};
use crate::scheduler::component::Component;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub struct ActorSystem {
    actors: RwLock<HashMap<String, Arc<Actor>>>,
    group: Arc<ActorGroup>,
    fabric: Arc<MessagingFabric>,
    default_concurrency: usize,
}

impl ActorSystem {
    pub fn new(fabric: Arc<MessagingFabric>, default_concurrency: usize) -> Self {
        Self {
            actors: RwLock::new(HashMap::new()),
            group: ActorGroup::new(),
            fabric,
            default_concurrency: default_concurrency.max(1),
        }
    }

    pub fn group(&self) -> &Arc<ActorGroup> {
        &self.group
    }

    pub fn len(&self) -> usize {
        self.actors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.read().is_empty()
    }

    pub fn get(&self, component_id: &str) -> Option<Arc<Actor>> {
        self.actors.read().get(component_id).cloned()
    }

    /// Wrap a component in an actor with the default concurrency bound.
    pub fn register(&self, component: Arc<Component>) -> Arc<Actor> {
        self.register_with_concurrency(component, self.default_concurrency)
    }

    /// Wrap a component in an actor.
    ///
    /// Installs the fabric-backed delivery callback on the component (the
    /// first registration wins; re-registering is a no-op returning the
    /// existing actor) and adds the actor to the group.
    pub fn register_with_concurrency(
        &self,
        component: Arc<Component>,
        max_concurrency: usize,
    ) -> Arc<Actor> {
        if let Some(existing) = self.get(&component.id) {
            return existing;
        }
        component.set_sender(self.fabric.component_sender(&component.id));
        let actor = Actor::new(Arc::clone(&component), max_concurrency);
        self.actors
            .write()
            .insert(component.id.clone(), Arc::clone(&actor));
        self.group.push(Arc::clone(&actor));
        actor
    }

    /// Drop the actor for an undeployed component. Queued messages for it
    /// are discarded with the actor.
    pub fn remove(&self, component_id: &str) -> Option<Arc<Actor>> {
        self.actors.write().remove(component_id)
    }

    /// Send through a component's actor (bounded, FIFO).
    pub async fn send_to(&self, component_id: &str, envelope: Envelope) -> Result<SendOutcome> {
        let actor = self
            .get(component_id)
            .ok_or_else(|| IarnetError::ComponentNotFound {
                component_id: component_id.to_string(),
            })?;
        actor.send(envelope).await
    }

    /// Completion signal from the execution layer: frees one slot on the
    /// component's actor and pumps its queue.
    pub fn on_task_done(&self, component_id: &str) {
        if let Some(actor) = self.get(component_id) {
            actor.on_task_done();
        } else {
            log::debug!(
                "task-done for unknown component {} (already undeployed?)",
                component_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceInfo;
    use bytes::Bytes;
    use std::time::Duration;

    async fn system() -> (Arc<ActorSystem>, Arc<MessagingFabric>) {
        let (fabric, _inbound) = MessagingFabric::bind("127.0.0.1:0").await.unwrap();
        (
            Arc::new(ActorSystem::new(Arc::clone(&fabric), 2)),
            fabric,
        )
    }

    #[tokio::test]
    async fn register_installs_the_fabric_sender() {
        let (system, fabric) = system().await;
        let component = Arc::new(Component::new("comp.a", ResourceInfo::zero()));
        system.register(Arc::clone(&component));

        // Delivery lands in the fabric's pending queue (nothing dialed in).
        system
            .send_to("comp.a", Envelope::payload(Bytes::from_static(b"m")))
            .await
            .unwrap();
        assert_eq!(fabric.pending_len("comp.a"), 1);
        fabric.close().await;
    }

    #[tokio::test]
    async fn registration_is_idempotent() {
        let (system, fabric) = system().await;
        let component = Arc::new(Component::new("comp.a", ResourceInfo::zero()));
        let first = system.register(Arc::clone(&component));
        let second = system.register(component);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(system.len(), 1);
        assert_eq!(system.group().len(), 1);
        fabric.close().await;
    }

    #[tokio::test]
    async fn bound_applies_and_task_done_drains() {
        let (system, fabric) = system().await;
        let component = Arc::new(Component::new("comp.a", ResourceInfo::zero()));
        let actor = system.register(component);

        let mut outcomes = Vec::new();
        for n in 0..5u8 {
            outcomes.push(
                system
                    .send_to("comp.a", Envelope::payload(Bytes::from(vec![n])))
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| **o == SendOutcome::Delivered)
                .count(),
            2
        );
        assert_eq!(actor.pending_len(), 3);

        for _ in 0..5 {
            system.on_task_done("comp.a");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(actor.pending_len(), 0);
        assert_eq!(actor.active_count(), 0);
        // everything ended up queued for the (never-connected) component
        assert_eq!(fabric.pending_len("comp.a"), 5);
        fabric.close().await;
    }

    #[tokio::test]
    async fn send_to_unknown_component_is_a_typed_error() {
        let (system, fabric) = system().await;
        let err = system
            .send_to("comp.ghost", Envelope::payload(Bytes::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, IarnetError::ComponentNotFound { .. }));
        fabric.close().await;
    }

    #[tokio::test]
    async fn removed_actor_stops_accepting() {
        let (system, fabric) = system().await;
        let component = Arc::new(Component::new("comp.a", ResourceInfo::zero()));
        system.register(component);
        assert!(system.remove("comp.a").is_some());
        assert!(
            system
                .send_to("comp.a", Envelope::payload(Bytes::new()))
                .await
                .is_err()
        );
        fabric.close().await;
    }
}
