//! Controller command channel — the inbound half of the link to the
//! central controller. The heartbeat transport that would feed this
//! channel is out of scope; only the receive-and-dispatch side lives here.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::dispatcher::{ApplicationEvent, ContainerEvent, Dispatcher, Event};
use crate::ids::{ApplicationId, ContainerId};

#[derive(Debug, Clone)]
pub enum ControllerCommand {
    FinishApps(Vec<ApplicationId>),
    FinishContainers(Vec<ContainerId>),
}

pub fn channel() -> (mpsc::Sender<ControllerCommand>, mpsc::Receiver<ControllerCommand>) {
    mpsc::channel(64)
}

/// Drains controller commands until the sender is dropped, translating
/// each into the dispatcher events it implies.
pub async fn run(dispatcher: Arc<Dispatcher>, mut commands: mpsc::Receiver<ControllerCommand>) {
    while let Some(command) = commands.recv().await {
        match command {
            ControllerCommand::FinishApps(app_ids) => {
                for app_id in app_ids {
                    info!(%app_id, "controller requested FINISH_APP");
                    dispatcher.post(Event::Application(app_id, ApplicationEvent::FinishApplication)).await;
                }
            }
            ControllerCommand::FinishContainers(container_ids) => {
                for container_id in container_ids {
                    info!(%container_id, "controller requested FINISH_CONTAINER");
                    dispatcher
                        .post(Event::Container(
                            container_id,
                            ContainerEvent::DiagnosticUpdate { text: "Killed by controller".to_string() },
                        ))
                        .await;
                    dispatcher.post(Event::Container(container_id, ContainerEvent::Kill)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{EntityKind, EventHandler};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
        notify: Arc<Notify>,
    }

    #[async_trait::async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _dispatcher: &Arc<Dispatcher>, _event: Event) {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.notify.notify_one();
        }
    }

    #[tokio::test]
    async fn finish_containers_posts_diagnostic_then_kill() {
        let dispatcher = Dispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let notify = Arc::new(Notify::new());
        dispatcher.register(EntityKind::Container, Arc::new(CountingHandler { count: count.clone(), notify: notify.clone() }));

        let (tx, rx) = channel();
        let d = dispatcher.clone();
        tokio::spawn(run(d, rx));

        let container = ContainerId { app: ApplicationId { cluster_timestamp: 1, id: 1 }, sequence: 0 };
        tx.send(ControllerCommand::FinishContainers(vec![container])).await.unwrap();

        notify.notified().await;
        notify.notified().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
