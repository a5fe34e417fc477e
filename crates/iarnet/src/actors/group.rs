//! Round-robin actor selection with blocking on saturation.

use crate::actors::Actor;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

struct GroupInner {
    actors: Vec<Arc<Actor>>,
    /// Monotonic round-robin cursor into `actors`.
    cursor: usize,
}

/// Ordered set of actors sharing a selection policy.
///
/// `select()` hands out the next actor with free capacity, starting from
/// the round-robin cursor. When every member is saturated the caller
/// parks on a notify that fires on `push` and on every freed slot.
pub struct ActorGroup {
    inner: Mutex<GroupInner>,
    notify: Arc<Notify>,
}

impl ActorGroup {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(GroupInner {
                actors: Vec::new(),
                cursor: 0,
            }),
            notify: Arc::new(Notify::new()),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().actors.is_empty()
    }

    /// Add an actor and wake any blocked selector.
    pub fn push(&self, actor: Arc<Actor>) {
        actor.set_freed_notify(Arc::clone(&self.notify));
        self.inner.lock().actors.push(actor);
        self.notify.notify_waiters();
    }

    /// One non-blocking selection attempt.
    pub fn try_select(&self) -> Option<Arc<Actor>> {
        let mut inner = self.inner.lock();
        let n = inner.actors.len();
        if n == 0 {
            return None;
        }
        for step in 0..n {
            let idx = (inner.cursor + step) % n;
            if inner.actors[idx].has_capacity() {
                inner.cursor = (idx + 1) % n;
                return Some(Arc::clone(&inner.actors[idx]));
            }
        }
        None
    }

    /// Next actor with free capacity, waiting for a slot if all are
    /// saturated.
    pub async fn select(&self) -> Arc<Actor> {
        loop {
            // Arm the waiter before checking, so a slot freed between the
            // check and the await still wakes us.
            let notified = self.notify.notified();
            if let Some(actor) = self.try_select() {
                return actor;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::messaging::Envelope;
    use crate::resources::ResourceInfo;
    use crate::scheduler::component::{Component, ComponentSender};
    use std::time::Duration;

    fn actor(id: &str, max_concurrency: usize) -> Arc<Actor> {
        let component = Arc::new(Component::new(id, ResourceInfo::zero()));
        let sender: ComponentSender =
            Arc::new(|_| Box::pin(async { Result::Ok(()) }));
        component.set_sender(sender);
        Actor::new(component, max_concurrency)
    }

    fn env() -> Envelope {
        Envelope::payload(bytes::Bytes::from_static(b"m"))
    }

    #[tokio::test]
    async fn selection_round_robins_over_members() {
        let group = ActorGroup::new();
        for id in ["a", "b", "c"] {
            group.push(actor(id, 8));
        }

        let picked: Vec<String> = [
            group.select().await,
            group.select().await,
            group.select().await,
            group.select().await,
        ]
        .iter()
        .map(|a| a.id().to_string())
        .collect();
        assert_eq!(picked, vec!["a", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn saturated_members_are_skipped() {
        let group = ActorGroup::new();
        let a = actor("a", 1);
        let b = actor("b", 1);
        group.push(a.clone());
        group.push(b.clone());

        a.send(env()).await.unwrap(); // a saturated
        assert_eq!(group.select().await.id(), "b");
    }

    #[tokio::test]
    async fn select_blocks_until_a_slot_frees() {
        let group = ActorGroup::new();
        let a = actor("a", 1);
        group.push(a.clone());
        a.send(env()).await.unwrap();

        let group_for_task = Arc::clone(&group);
        let waiter = tokio::spawn(async move { group_for_task.select().await.id().to_string() });

        // Not selectable yet.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        a.on_task_done();
        let picked = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("select should unblock")
            .unwrap();
        assert_eq!(picked, "a");
    }

    #[tokio::test]
    async fn push_wakes_blocked_selectors() {
        let group = ActorGroup::new();
        let group_for_task = Arc::clone(&group);
        let waiter = tokio::spawn(async move { group_for_task.select().await.id().to_string() });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        group.push(actor("late", 1));
        let picked = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked, "late");
    }
}
