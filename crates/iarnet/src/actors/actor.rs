//! Bounded-concurrency wrapper around one component.
//!
//! Accounting invariant: every accepted message is either actively being
//! delivered (counted in `active`), waiting in `pending`, or already
//! delivered/failed, never in two places. A delivery slot acquired by a
//! successful send is held until the execution layer reports completion
//! via [`Actor::on_task_done`].

use crate::error::Result;
use crate::messaging::Envelope;
use crate::scheduler::component::Component;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

/// What `send` did with the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered immediately; a concurrency slot is now held.
    Delivered,
    /// Capacity exhausted; queued FIFO for a future slot.
    Queued,
}

struct ActorInner {
    active: usize,
    pending: VecDeque<Envelope>,
}

pub struct Actor {
    id: String,
    component: Arc<Component>,
    max_concurrency: usize,
    inner: Mutex<ActorInner>,
    /// Group signal, installed by `ActorGroup::push`. Notified whenever a
    /// slot frees so blocked `select()` callers can retry.
    freed: Mutex<Option<Arc<Notify>>>,
}

impl Actor {
    pub fn new(component: Arc<Component>, max_concurrency: usize) -> Arc<Self> {
        Arc::new(Self {
            id: component.id.clone(),
            component,
            max_concurrency: max_concurrency.max(1),
            inner: Mutex::new(ActorInner {
                active: 0,
                pending: VecDeque::new(),
            }),
            freed: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn component(&self) -> &Arc<Component> {
        &self.component
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Whether a send right now would deliver rather than queue.
    pub fn has_capacity(&self) -> bool {
        let inner = self.inner.lock();
        inner.active < self.max_concurrency && inner.pending.is_empty()
    }

    pub(crate) fn set_freed_notify(&self, notify: Arc<Notify>) {
        *self.freed.lock() = Some(notify);
    }

    fn signal_freed(&self) {
        if let Some(notify) = self.freed.lock().clone() {
            notify.notify_waiters();
        }
    }

    /// Submit a message.
    ///
    /// Messages queue whenever the cap is reached *or* older messages are
    /// still queued; delivering around the queue would break FIFO order.
    /// The queue is unbounded; upstream admission control bounds it.
    pub async fn send(self: &Arc<Self>, envelope: Envelope) -> Result<SendOutcome> {
        {
            let mut inner = self.inner.lock();
            if inner.active >= self.max_concurrency || !inner.pending.is_empty() {
                inner.pending.push_back(envelope);
                return Ok(SendOutcome::Queued);
            }
            inner.active += 1;
        }

        match self.component.send(envelope).await {
            Ok(()) => Ok(SendOutcome::Delivered),
            Err(e) => {
                {
                    let mut inner = self.inner.lock();
                    inner.active = inner.active.saturating_sub(1);
                }
                self.signal_freed();
                Err(e)
            }
        }
    }

    /// Called by the execution layer when an in-flight task finishes.
    /// Frees the slot and hands it to the queue head, asynchronously.
    pub fn on_task_done(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            inner.active = inner.active.saturating_sub(1);
        }
        self.signal_freed();
        self.pump();
    }

    /// Move one queued message into the freed slot. On delivery failure
    /// the slot is released again and the next queued message is tried,
    /// so a poisoned head cannot wedge the queue.
    fn pump(self: &Arc<Self>) {
        let actor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let envelope = {
                    let mut inner = actor.inner.lock();
                    if inner.active >= actor.max_concurrency {
                        return;
                    }
                    match inner.pending.pop_front() {
                        Some(envelope) => {
                            inner.active += 1;
                            envelope
                        }
                        None => return,
                    }
                };
                match actor.component.send(envelope).await {
                    Ok(()) => return,
                    Err(e) => {
                        log::warn!(
                            "actor {}: queued delivery failed, trying next: {}",
                            actor.id,
                            e
                        );
                        {
                            let mut inner = actor.inner.lock();
                            inner.active = inner.active.saturating_sub(1);
                        }
                        actor.signal_freed();
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IarnetError;
    use crate::resources::ResourceInfo;
    use crate::scheduler::component::ComponentSender;
    use std::time::Duration;

    /// Component whose sender records delivery order and can fail on
    /// selected bodies.
    fn recording_component(
        delivered: Arc<parking_lot::Mutex<Vec<u8>>>,
        fail_on: Option<u8>,
    ) -> Arc<Component> {
        let component = Arc::new(Component::new("comp.t", ResourceInfo::zero()));
        let sender: ComponentSender = Arc::new(move |envelope: Envelope| {
            let delivered = Arc::clone(&delivered);
            Box::pin(async move {
                let byte = envelope.body.first().copied().unwrap_or(0);
                if Some(byte) == fail_on {
                    return Err(IarnetError::Internal("poisoned delivery".into()));
                }
                delivered.lock().push(byte);
                Ok(())
            })
        });
        component.set_sender(sender);
        component
    }

    fn env(n: u8) -> Envelope {
        Envelope::payload(bytes::Bytes::from(vec![n]))
    }

    #[tokio::test]
    async fn concurrency_is_bounded_and_order_preserved() {
        let delivered = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let actor = Actor::new(recording_component(delivered.clone(), None), 2);

        let mut outcomes = Vec::new();
        for n in 0..10u8 {
            outcomes.push(actor.send(env(n)).await.unwrap());
        }

        // Two slots held, eight queued; nothing exceeded the bound.
        assert_eq!(outcomes[0], SendOutcome::Delivered);
        assert_eq!(outcomes[1], SendOutcome::Delivered);
        assert!(outcomes[2..].iter().all(|o| *o == SendOutcome::Queued));
        assert_eq!(actor.active_count(), 2);
        assert_eq!(actor.pending_len(), 8);

        for _ in 0..10 {
            actor.on_task_done();
            // give the pump task a chance to run
            tokio::time::sleep(Duration::from_millis(5)).await;
            assert!(actor.active_count() <= 2);
        }

        assert_eq!(actor.pending_len(), 0);
        assert_eq!(actor.active_count(), 0);
        assert_eq!(*delivered.lock(), (0..10u8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn failed_direct_delivery_releases_the_slot() {
        let delivered = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let actor = Actor::new(recording_component(delivered.clone(), Some(7)), 1);

        assert!(actor.send(env(7)).await.is_err());
        assert_eq!(actor.active_count(), 0);

        // The slot is usable again immediately.
        assert_eq!(actor.send(env(1)).await.unwrap(), SendOutcome::Delivered);
        assert_eq!(*delivered.lock(), vec![1]);
    }

    #[tokio::test]
    async fn failed_queued_delivery_skips_to_the_next_item() {
        let delivered = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let actor = Actor::new(recording_component(delivered.clone(), Some(9)), 1);

        assert_eq!(actor.send(env(1)).await.unwrap(), SendOutcome::Delivered);
        actor.send(env(9)).await.unwrap(); // queued, will fail
        actor.send(env(2)).await.unwrap(); // queued behind the poison

        actor.on_task_done();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // 9 failed, 2 took the slot.
        assert_eq!(*delivered.lock(), vec![1, 2]);
        assert_eq!(actor.active_count(), 1);
        assert_eq!(actor.pending_len(), 0);
    }

    #[tokio::test]
    async fn no_message_is_lost_across_the_lifecycle() {
        let delivered = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let actor = Actor::new(recording_component(delivered.clone(), None), 3);
        let submitted = 25u8;

        for n in 0..submitted {
            actor.send(env(n)).await.unwrap();
        }
        for _ in 0..submitted {
            actor.on_task_done();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let delivered_count = delivered.lock().len();
        let in_flight = actor.active_count();
        let queued = actor.pending_len();
        assert_eq!(delivered_count, submitted as usize);
        assert_eq!(in_flight + queued, 0);
    }
}
