//! Container FSM (C4) — drives one container through
//! init → localizing → running → cleanup → done.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::collaborators::{ContainerKiller, ContainerLauncher, ControllerNotifier};
use crate::context::Context;
use crate::dispatcher::{ApplicationEvent, ContainerEvent, CoordinatorEvent, Dispatcher, Event};
use crate::error::AgentError;
use crate::ids::{ContainerId, LaunchContext, ResourceKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    New,
    Localizing,
    Localized,
    Running,
    ExitedWithSuccess,
    ExitedWithFailure,
    Killing,
    Done,
}

pub struct ContainerEntity {
    pub id: ContainerId,
    pub launch_ctx: LaunchContext,
    pub state: ContainerState,
    pub pending: HashSet<ResourceKey>,
    pub localized: HashMap<ResourceKey, PathBuf>,
    pub resource_keys: Vec<ResourceKey>,
    pub diagnostics: Vec<String>,
    pub exit_status: Option<i32>,
}

impl ContainerEntity {
    pub fn new(id: ContainerId, launch_ctx: LaunchContext) -> Self {
        Self {
            id,
            launch_ctx,
            state: ContainerState::New,
            pending: HashSet::new(),
            localized: HashMap::new(),
            resource_keys: Vec::new(),
            diagnostics: Vec::new(),
            exit_status: None,
        }
    }
}

pub struct ContainerFsmHandler {
    pub context: Arc<Context>,
    pub launcher: Arc<dyn ContainerLauncher>,
    pub killer: Arc<dyn ContainerKiller>,
    pub controller: Arc<dyn ControllerNotifier>,
    pub kill_grace: Duration,
    pub kill_force: Duration,
}

#[async_trait::async_trait]
impl crate::dispatcher::EventHandler for ContainerFsmHandler {
    async fn handle(&self, dispatcher: &Arc<Dispatcher>, event: Event) {
        if let Event::Container(id, container_event) = event {
            self.apply(dispatcher, id, container_event).await;
        }
    }
}

impl ContainerFsmHandler {
    async fn apply(&self, dispatcher: &Arc<Dispatcher>, id: ContainerId, event: ContainerEvent) {
        let entity = match self.context.get_container(&id) {
            Some(e) => e,
            None => {
                warn!(%id, "event for unknown container; dropped");
                return;
            }
        };

        match event {
            ContainerEvent::Init => self.on_init(dispatcher, id, &entity).await,
            ContainerEvent::ResourceLocalized { key, path } => {
                self.on_resource_localized(dispatcher, id, &entity, key, path).await
            }
            ContainerEvent::ResourceFailed { key, cause } => {
                self.on_resource_failed(dispatcher, id, &entity, key, cause).await
            }
            ContainerEvent::Launched => self.on_launched(id, &entity).await,
            ContainerEvent::Exited { code } => self.on_exited(dispatcher, id, &entity, code).await,
            ContainerEvent::Kill => self.on_kill(dispatcher, id, &entity).await,
            ContainerEvent::CleanupDone => self.on_cleanup_done(dispatcher, id, &entity).await,
            ContainerEvent::DiagnosticUpdate { text } => {
                let mut c = entity.lock().await;
                if c.state != ContainerState::Done {
                    c.diagnostics.push(text);
                }
            }
        }
    }

    async fn on_init(&self, dispatcher: &Arc<Dispatcher>, id: ContainerId, entity: &Arc<tokio::sync::Mutex<ContainerEntity>>) {
        let user = match self.context.get_application(&id.app) {
            Some(app) => app.lock().await.user.clone(),
            None => {
                warn!(%id, "Init for container whose application is not registered");
                String::new()
            }
        };

        let mut c = entity.lock().await;
        if c.state != ContainerState::New {
            return;
        }
        c.state = ContainerState::Localizing;
        let requests = c.launch_ctx.resources.clone();
        if requests.is_empty() {
            c.state = ContainerState::Localized;
            drop(c);
            self.spawn_launch(dispatcher.clone(), id, entity.clone());
            return;
        }

        let mut to_request = Vec::with_capacity(requests.len());
        for request in requests {
            let key = ResourceKey::new(&request, &user, id.app);
            c.pending.insert(key.clone());
            c.resource_keys.push(key.clone());
            to_request.push((request, key));
        }
        drop(c);

        for (request, key) in to_request {
            dispatcher
                .post(Event::Coordinator(CoordinatorEvent::FetchRequest { request, key, container: id }))
                .await;
        }
    }

    async fn on_resource_localized(
        &self,
        dispatcher: &Arc<Dispatcher>,
        id: ContainerId,
        entity: &Arc<tokio::sync::Mutex<ContainerEntity>>,
        key: ResourceKey,
        path: PathBuf,
    ) {
        let became_localized = {
            let mut c = entity.lock().await;
            if c.state != ContainerState::Localizing {
                let err = AgentError::InternalInvariantViolation(format!(
                    "ResourceLocalized for {id} in illegal state {:?}",
                    c.state
                ));
                error!(%err, "event dropped");
                return;
            }
            c.pending.remove(&key);
            c.localized.insert(key, path);
            if c.pending.is_empty() {
                c.state = ContainerState::Localized;
                true
            } else {
                false
            }
        };
        if became_localized {
            self.spawn_launch(dispatcher.clone(), id, entity.clone());
        }
    }

    async fn on_resource_failed(
        &self,
        dispatcher: &Arc<Dispatcher>,
        id: ContainerId,
        entity: &Arc<tokio::sync::Mutex<ContainerEntity>>,
        key: ResourceKey,
        cause: String,
    ) {
        let keys = {
            let mut c = entity.lock().await;
            if c.state != ContainerState::Localizing {
                let err = AgentError::InternalInvariantViolation(format!(
                    "ResourceFailed for {id} in illegal state {:?}",
                    c.state
                ));
                error!(%err, "event dropped");
                return;
            }
            c.state = ContainerState::Killing;
            c.diagnostics.push(format!("resource {:?} failed: {cause}", key));
            c.resource_keys.clone()
        };
        dispatcher
            .post(Event::Coordinator(CoordinatorEvent::ReleaseForContainer { container: id, keys }))
            .await;
        dispatcher.post(Event::Container(id, ContainerEvent::CleanupDone)).await;
    }

    async fn on_launched(&self, id: ContainerId, entity: &Arc<tokio::sync::Mutex<ContainerEntity>>) {
        let mut c = entity.lock().await;
        if c.state == ContainerState::Localized {
            c.state = ContainerState::Running;
        } else {
            let err = AgentError::InternalInvariantViolation(format!(
                "Launched for {id} in illegal state {:?}",
                c.state
            ));
            error!(%err, "event dropped");
        }
    }

    async fn on_exited(&self, dispatcher: &Arc<Dispatcher>, id: ContainerId, entity: &Arc<tokio::sync::Mutex<ContainerEntity>>, code: i32) {
        let keys = {
            let mut c = entity.lock().await;
            if c.state == ContainerState::Done {
                return;
            }
            c.exit_status = Some(code);
            c.state = if code == 0 { ContainerState::ExitedWithSuccess } else { ContainerState::ExitedWithFailure };
            c.resource_keys.clone()
        };
        self.controller.container_finished(id, Some(code)).await;
        dispatcher
            .post(Event::Coordinator(CoordinatorEvent::ReleaseForContainer { container: id, keys }))
            .await;
        dispatcher.post(Event::Container(id, ContainerEvent::CleanupDone)).await;
    }

    async fn on_kill(&self, dispatcher: &Arc<Dispatcher>, id: ContainerId, entity: &Arc<tokio::sync::Mutex<ContainerEntity>>) {
        let already_terminal = {
            let mut c = entity.lock().await;
            match c.state {
                ContainerState::Killing
                | ContainerState::Done
                | ContainerState::ExitedWithSuccess
                | ContainerState::ExitedWithFailure => true,
                _ => {
                    c.state = ContainerState::Killing;
                    false
                }
            }
        };
        if already_terminal {
            return;
        }
        let killer = self.killer.clone();
        let dispatcher = dispatcher.clone();
        let grace = self.kill_grace;
        let force = self.kill_force;
        tokio::spawn(async move {
            let _ = killer.kill(id, grace, force).await;
            dispatcher.post(Event::Container(id, ContainerEvent::CleanupDone)).await;
        });
    }

    async fn on_cleanup_done(&self, dispatcher: &Arc<Dispatcher>, id: ContainerId, entity: &Arc<tokio::sync::Mutex<ContainerEntity>>) {
        {
            let mut c = entity.lock().await;
            if c.state == ContainerState::Done {
                return;
            }
            if c.state == ContainerState::Killing && c.exit_status.is_none() {
                c.diagnostics.push("killed".to_string());
                c.state = ContainerState::ExitedWithFailure;
            }
            c.state = ContainerState::Done;
            info!(%id, "container done");
        }
        self.context.remove_container(&id);
        dispatcher
            .post(Event::Application(id.app, ApplicationEvent::ContainerFinished { container: id }))
            .await;
    }

    fn spawn_launch(&self, dispatcher: Arc<Dispatcher>, id: ContainerId, entity: Arc<tokio::sync::Mutex<ContainerEntity>>) {
        let launcher = self.launcher.clone();
        tokio::spawn(async move {
            let (ctx, localized) = {
                let c = entity.lock().await;
                let localized: HashMap<String, PathBuf> = c
                    .localized
                    .iter()
                    .map(|(k, v)| (format!("{k:?}"), v.clone()))
                    .collect();
                (c.launch_ctx.clone(), localized)
            };
            match launcher.launch(id, &ctx, &localized).await {
                Ok(()) => {
                    dispatcher.post(Event::Container(id, ContainerEvent::Launched)).await;
                }
                Err(err) => {
                    dispatcher
                        .post(Event::Container(id, ContainerEvent::DiagnosticUpdate { text: err.to_string() }))
                        .await;
                    dispatcher.post(Event::Container(id, ContainerEvent::Exited { code: -1 })).await;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ApplicationId, LaunchContext};

    #[test]
    fn new_container_starts_in_new_state() {
        let id = ContainerId { app: ApplicationId { cluster_timestamp: 1, id: 1 }, sequence: 0 };
        let entity = ContainerEntity::new(id, LaunchContext::default());
        assert_eq!(entity.state, ContainerState::New);
    }
}
