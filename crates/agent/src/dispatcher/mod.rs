//! Dispatcher — the per-entity-ordered event bus that drives every
//! state-machine transition.
//!
//! Each target entity gets its own FIFO mailbox. `post` pushes onto the
//! mailbox and returns without waiting for handler work; at most one drain
//! task per mailbox runs at a time, so events for the same entity are
//! delivered in post order while unrelated entities drain concurrently on
//! the runtime's worker pool.

pub mod event;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{error, trace};

pub use event::{ApplicationEvent, ContainerEvent, CoordinatorEvent, EntityId, EntityKind, Event, ResourceEvent};

/// A handler for one class of entity (Application, Container, Resource, or
/// the Coordinator singleton). Implementations look the target entity up
/// in [`crate::context::Context`] (or the coordinator) and run its FSM
/// transition.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, dispatcher: &Arc<Dispatcher>, event: Event);
}

struct Mailbox {
    queue: Mutex<VecDeque<Event>>,
    draining: AtomicBool,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        }
    }
}

pub struct Dispatcher {
    handlers: DashMap<EntityKind, Arc<dyn EventHandler>>,
    mailboxes: DashMap<EntityId, Arc<Mailbox>>,
}

impl Dispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: DashMap::new(),
            mailboxes: DashMap::new(),
        })
    }

    /// Register the handler responsible for one entity kind. Intended to
    /// be called once per kind during boot, before any `post`.
    pub fn register(&self, kind: EntityKind, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Enqueue an event for its target entity. Never waits for handler
    /// work — only for the short-lived mailbox lock.
    pub async fn post(self: &Arc<Self>, event: Event) {
        let entity = event.entity_id();
        let mailbox = self
            .mailboxes
            .entry(entity.clone())
            .or_insert_with(|| Arc::new(Mailbox::new()))
            .clone();

        {
            let mut queue = mailbox.queue.lock().await;
            queue.push_back(event);
        }

        if mailbox
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let dispatcher = Arc::clone(self);
            tokio::spawn(async move {
                Self::drain(dispatcher, entity, mailbox).await;
            });
        }
    }

    /// Drain a single mailbox to empty, one event at a time, in FIFO order.
    /// Exactly one drain task is ever active per mailbox (guarded by the
    /// `draining` flag), so this is the sole writer processing this
    /// entity's events.
    async fn drain(dispatcher: Arc<Self>, entity: EntityId, mailbox: Arc<Mailbox>) {
        loop {
            let next = {
                let mut queue = mailbox.queue.lock().await;
                queue.pop_front()
            };

            let event = match next {
                Some(event) => event,
                None => {
                    mailbox.draining.store(false, Ordering::Release);
                    // Close the race where a post() landed between our
                    // pop returning None and the flag being cleared.
                    let still_empty = mailbox.queue.lock().await.is_empty();
                    if still_empty {
                        return;
                    }
                    if mailbox
                        .draining
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        return; // another task already took over draining
                    }
                    continue;
                }
            };

            let kind = event.kind();
            match dispatcher.handlers.get(&kind) {
                Some(handler) => {
                    trace!(?entity, ?kind, "dispatching event");
                    handler.handle(&dispatcher, event).await;
                }
                None => {
                    error!(?entity, ?kind, "no handler registered for entity kind; event dropped");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ApplicationId, ContainerId};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct RecordingHandler {
        seen: Arc<Mutex<Vec<String>>>,
        count: Arc<AtomicUsize>,
        notify: Arc<Notify>,
        expected: usize,
    }

    #[async_trait::async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, _dispatcher: &Arc<Dispatcher>, event: Event) {
            if let Event::Container(id, ContainerEvent::DiagnosticUpdate { text }) = event {
                self.seen.lock().await.push(format!("{}:{}", id.sequence, text));
            }
            if self.count.fetch_add(1, Ordering::SeqCst) + 1 == self.expected {
                self.notify.notify_one();
            }
        }
    }

    #[tokio::test]
    async fn events_for_same_entity_are_delivered_in_post_order() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));
        let notify = Arc::new(Notify::new());

        dispatcher.register(
            EntityKind::Container,
            Arc::new(RecordingHandler {
                seen: seen.clone(),
                count: count.clone(),
                notify: notify.clone(),
                expected: 5,
            }),
        );

        let app = ApplicationId { cluster_timestamp: 1, id: 1 };
        let container = ContainerId { app, sequence: 0 };

        for i in 0..5 {
            dispatcher
                .post(Event::Container(
                    container,
                    ContainerEvent::DiagnosticUpdate { text: i.to_string() },
                ))
                .await;
        }

        notify.notified().await;

        let seen = seen.lock().await;
        let order: Vec<String> = seen.clone();
        assert_eq!(order, vec!["0:0", "0:1", "0:2", "0:3", "0:4"]);
    }

    #[tokio::test]
    async fn unregistered_kind_does_not_panic() {
        let dispatcher = Dispatcher::new();
        let app = ApplicationId { cluster_timestamp: 1, id: 1 };
        dispatcher
            .post(Event::Application(app, ApplicationEvent::ApplicationInited))
            .await;
        // Give the spawned drain task a chance to run; absence of a panic
        // is the assertion.
        tokio::task::yield_now().await;
    }
}
