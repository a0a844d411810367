//! Application FSM (C5) — groups the containers of one submitted job and
//! gates both initial bootstrap and final cleanup.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::context::Context;
use crate::dispatcher::{ApplicationEvent, ContainerEvent, CoordinatorEvent, Dispatcher, Event};
use crate::ids::{ApplicationId, ContainerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationState {
    New,
    Initing,
    Running,
    FinishingContainers,
    FinishingApp,
    Done,
}

pub struct ApplicationEntity {
    pub id: ApplicationId,
    pub user: String,
    pub state: ApplicationState,
    pub containers: HashSet<ContainerId>,
    pub finished: HashSet<ContainerId>,
    pub finish_requested: bool,
    pending_inits: Vec<ContainerId>,
}

impl ApplicationEntity {
    pub fn new(id: ApplicationId, user: String) -> Self {
        Self {
            id,
            user,
            state: ApplicationState::New,
            containers: HashSet::new(),
            finished: HashSet::new(),
            finish_requested: false,
            pending_inits: Vec::new(),
        }
    }

    fn all_containers_finished(&self) -> bool {
        !self.containers.is_empty() && self.containers.iter().all(|c| self.finished.contains(c))
    }
}

pub struct ApplicationFsmHandler {
    pub context: Arc<Context>,
}

#[async_trait::async_trait]
impl crate::dispatcher::EventHandler for ApplicationFsmHandler {
    async fn handle(&self, dispatcher: &Arc<Dispatcher>, event: Event) {
        if let Event::Application(id, app_event) = event {
            self.apply(dispatcher, id, app_event).await;
        }
    }
}

impl ApplicationFsmHandler {
    async fn apply(&self, dispatcher: &Arc<Dispatcher>, id: ApplicationId, event: ApplicationEvent) {
        match event {
            ApplicationEvent::InitApplication { container, user } => {
                let (entity, created) = self.context.get_or_create_application(id, &user);
                let mut app = entity.lock().await;
                app.containers.insert(container);

                if created {
                    app.state = ApplicationState::Initing;
                    drop(app);
                    dispatcher.post(Event::Container(container, ContainerEvent::Init)).await;
                    dispatcher.post(Event::Application(id, ApplicationEvent::ApplicationInited)).await;
                } else {
                    match app.state {
                        ApplicationState::Running => {
                            drop(app);
                            dispatcher.post(Event::Container(container, ContainerEvent::Init)).await;
                        }
                        _ => {
                            app.pending_inits.push(container);
                        }
                    }
                }
            }
            ApplicationEvent::ApplicationInited => {
                if let Some(entity) = self.context.get_application(&id) {
                    let mut app = entity.lock().await;
                    if app.state == ApplicationState::Initing || app.state == ApplicationState::New {
                        app.state = ApplicationState::Running;
                        let queued = std::mem::take(&mut app.pending_inits);
                        drop(app);
                        for container in queued {
                            dispatcher.post(Event::Container(container, ContainerEvent::Init)).await;
                        }
                    }
                }
            }
            ApplicationEvent::ContainerFinished { container } => {
                let entity = match self.context.get_application(&id) {
                    Some(e) => e,
                    None => {
                        warn!(%container, ?id, "ContainerFinished for unknown application");
                        return;
                    }
                };
                let should_progress = {
                    let mut app = entity.lock().await;
                    app.finished.insert(container);
                    app.finish_requested && app.all_containers_finished()
                };
                if should_progress {
                    self.begin_finishing(dispatcher, id, &entity).await;
                }
            }
            ApplicationEvent::FinishApplication => {
                let entity = match self.context.get_application(&id) {
                    Some(e) => e,
                    None => {
                        warn!(?id, "FinishApplication for unknown application");
                        return;
                    }
                };
                let should_progress = {
                    let mut app = entity.lock().await;
                    app.finish_requested = true;
                    app.all_containers_finished()
                };
                if should_progress {
                    self.begin_finishing(dispatcher, id, &entity).await;
                } else {
                    let mut app = entity.lock().await;
                    let unfinished: Vec<ContainerId> =
                        app.containers.difference(&app.finished).cloned().collect();
                    app.state = ApplicationState::FinishingContainers;
                    drop(app);
                    for container in unfinished {
                        dispatcher.post(Event::Container(container, ContainerEvent::Kill)).await;
                    }
                }
            }
            ApplicationEvent::ApplicationResourcesCleaned => {
                if let Some(entity) = self.context.get_application(&id) {
                    let mut app = entity.lock().await;
                    app.state = ApplicationState::Done;
                    info!(?id, "application done");
                }
                self.context.remove_application(&id);
            }
        }
    }

    async fn begin_finishing(&self, dispatcher: &Arc<Dispatcher>, id: ApplicationId, entity: &Arc<tokio::sync::Mutex<ApplicationEntity>>) {
        {
            let mut app = entity.lock().await;
            app.state = ApplicationState::FinishingApp;
        }
        // Per-container releases already ran as each container reached its
        // own terminal state; this asks C3 to drop the application-scoped
        // (visibility APPLICATION) entries too. The coordinator posts
        // ApplicationResourcesCleaned back once that sweep is done.
        dispatcher.post(Event::Coordinator(CoordinatorEvent::ReleaseApplication { app: id })).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_application_starts_in_new_state() {
        let entity = ApplicationEntity::new(ApplicationId { cluster_timestamp: 1, id: 1 }, "alice".to_string());
        assert_eq!(entity.state, ApplicationState::New);
        assert!(entity.containers.is_empty());
    }

    #[test]
    fn all_containers_finished_is_false_when_empty() {
        let entity = ApplicationEntity::new(ApplicationId { cluster_timestamp: 1, id: 1 }, "alice".to_string());
        assert!(!entity.all_containers_finished());
    }
}
