//! Localization coordinator (C3) — owns the set of LocalizedResources and
//! brokers fetch slots.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::collaborators::ResourceFetcher;
use crate::dispatcher::{ApplicationEvent, ContainerEvent, CoordinatorEvent, Dispatcher, Event, ResourceEvent};
use crate::ids::{ApplicationId, ResourceKey};

use super::{LocalizedResource, ResourceState};

pub struct LocalizationCoordinator {
    resources: DashMap<ResourceKey, Arc<Mutex<LocalizedResource>>>,
    fetcher: Arc<dyn ResourceFetcher>,
}

impl LocalizationCoordinator {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>) -> Arc<Self> {
        Arc::new(Self { resources: DashMap::new(), fetcher })
    }

    /// Entry point for [`crate::dispatcher::EntityKind::Coordinator`]
    /// events — requests, completions, failures, releases, and eviction.
    pub async fn apply_coordinator_event(self: &Arc<Self>, dispatcher: &Arc<Dispatcher>, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::FetchRequest { request, key, container } => {
                self.resources
                    .entry(key.clone())
                    .or_insert_with(|| LocalizedResource::new(request.clone()));
                dispatcher
                    .post(Event::Resource(key, ResourceEvent::Request { container, visibility: request.visibility }))
                    .await;
            }
            CoordinatorEvent::FetchComplete { key, path, size } => {
                dispatcher.post(Event::Resource(key, ResourceEvent::Localized { path, size })).await;
            }
            CoordinatorEvent::FetchFailed { key, cause } => {
                self.handle_fetch_failed(dispatcher, key, cause).await;
            }
            CoordinatorEvent::ReleaseForContainer { container, keys } => {
                for key in keys {
                    dispatcher.post(Event::Resource(key, ResourceEvent::Release { container })).await;
                }
            }
            CoordinatorEvent::ReleaseApplication { app } => {
                self.release_application(app).await;
                dispatcher
                    .post(Event::Application(app, ApplicationEvent::ApplicationResourcesCleaned))
                    .await;
            }
            CoordinatorEvent::Evict { target_bytes } => {
                self.evict(target_bytes).await;
            }
        }
    }

    /// Entry point for [`crate::dispatcher::EntityKind::Resource`] events —
    /// runs the per-resource FSM transition and follows up with any
    /// downstream posts (fetch dispatch, waiter notification).
    pub async fn apply_resource_event(self: &Arc<Self>, dispatcher: &Arc<Dispatcher>, key: ResourceKey, event: ResourceEvent) {
        let resource = match self.resources.get(&key) {
            Some(entry) => entry.clone(),
            None => {
                warn!(?key, "resource event for unknown resource; dropped");
                return;
            }
        };

        match event {
            ResourceEvent::Request { container, .. } => {
                let state_before;
                let state_after;
                let notify_path;
                {
                    let mut r = resource.lock().await;
                    state_before = r.state;
                    state_after = r.on_request(container);
                    notify_path = r.local_path.clone();
                }

                match (state_before, state_after) {
                    (_, ResourceState::Downloading) => {
                        let acquired = resource.lock().await.fetch_permit.try_acquire();
                        if acquired {
                            self.spawn_fetch(Arc::clone(dispatcher), key.clone(), Arc::clone(&resource));
                        }
                    }
                    (_, ResourceState::Localized) => {
                        if let Some(path) = notify_path {
                            dispatcher
                                .post(Event::Container(container, ContainerEvent::ResourceLocalized { key: key.clone(), path }))
                                .await;
                        }
                    }
                    _ => {}
                }
            }
            ResourceEvent::Localized { path, size } => {
                let waiters = {
                    let mut r = resource.lock().await;
                    r.on_localized(path.clone(), size)
                };
                for container in waiters {
                    dispatcher
                        .post(Event::Container(container, ContainerEvent::ResourceLocalized { key: key.clone(), path: path.clone() }))
                        .await;
                }
            }
            ResourceEvent::Release { container } => {
                let mut r = resource.lock().await;
                r.on_release(container);
            }
        }
    }

    /// Launch the external fetch off the dispatcher workers, on a spawned
    /// task, and feed the result back in as a coordinator event.
    fn spawn_fetch(self: &Arc<Self>, dispatcher: Arc<Dispatcher>, key: ResourceKey, resource: Arc<Mutex<LocalizedResource>>) {
        let fetcher = Arc::clone(&self.fetcher);
        tokio::spawn(async move {
            let request = resource.lock().await.key.clone();
            match fetcher.fetch(&request).await {
                Ok(fetched) => {
                    dispatcher
                        .post(Event::Coordinator(CoordinatorEvent::FetchComplete {
                            key,
                            path: fetched.path,
                            size: fetched.size,
                        }))
                        .await;
                }
                Err(err) => {
                    dispatcher
                        .post(Event::Coordinator(CoordinatorEvent::FetchFailed { key, cause: err.to_string() }))
                        .await;
                }
            }
            resource.lock().await.fetch_permit.release();
        });
    }

    async fn handle_fetch_failed(&self, dispatcher: &Arc<Dispatcher>, key: ResourceKey, cause: String) {
        let resource = match self.resources.get(&key) {
            Some(entry) => entry.clone(),
            None => return,
        };
        let (waiters, refs_empty) = {
            let r = resource.lock().await;
            (r.refs.clone(), r.refs.is_empty())
        };
        warn!(?key, %cause, "resource fetch failed, aborting waiters");
        for container in waiters {
            dispatcher
                .post(Event::Container(container, ContainerEvent::ResourceFailed { key: key.clone(), cause: cause.clone() }))
                .await;
        }
        if refs_empty {
            self.resources.remove(&key);
        }
    }

    pub async fn release_for_container(self: &Arc<Self>, dispatcher: &Arc<Dispatcher>, container: crate::ids::ContainerId, keys: Vec<ResourceKey>) {
        self.apply_coordinator_event(dispatcher, CoordinatorEvent::ReleaseForContainer { container, keys }).await;
    }

    /// Drop every `ResourceKey::Application` entry scoped to `app`. Called
    /// once the application's last container has reached DONE, so no
    /// remaining ref can legitimately point at these entries.
    async fn release_application(&self, app: ApplicationId) {
        let keys: Vec<ResourceKey> = self
            .resources
            .iter()
            .filter_map(|entry| match entry.key() {
                ResourceKey::Application { app: key_app, .. } if *key_app == app => Some(entry.key().clone()),
                _ => None,
            })
            .collect();
        for key in keys {
            self.resources.remove(&key);
            info!(?key, %app, "released application-scoped resource");
        }
    }

    /// Advisory LRU-by-`last_touch` eviction over LOCALIZED entries with no
    /// remaining refs. Never touches an entry still referenced.
    async fn evict(&self, target_bytes: u64) {
        let mut candidates = Vec::new();
        for entry in self.resources.iter() {
            let r = entry.value().lock().await;
            if r.state == ResourceState::Localized && r.refs.is_empty() {
                candidates.push((entry.key().clone(), r.last_touch, r.size as u64));
            }
        }
        candidates.sort_by_key(|(_, last_touch, _)| *last_touch);

        let mut reclaimed = 0u64;
        for (key, _, size) in candidates {
            if reclaimed >= target_bytes {
                break;
            }
            self.resources.remove(&key);
            reclaimed += size;
            info!(?key, size, "evicted cached resource");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fake::FakeFetcher;
    use crate::dispatcher::{EntityKind, EventHandler};
    use crate::ids::{ApplicationId, ContainerId, LocalResourceRequest, Visibility};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct ContainerProbe {
        localized: Mutex<Vec<(ContainerId, ResourceKey)>>,
        failed: Mutex<Vec<(ContainerId, ResourceKey)>>,
        notify: Arc<Notify>,
        expected: Arc<AtomicUsize>,
        target: usize,
    }

    #[async_trait::async_trait]
    impl EventHandler for ContainerProbe {
        async fn handle(&self, _dispatcher: &Arc<Dispatcher>, event: Event) {
            match event {
                Event::Container(id, ContainerEvent::ResourceLocalized { key, .. }) => {
                    self.localized.lock().await.push((id, key));
                }
                Event::Container(id, ContainerEvent::ResourceFailed { key, .. }) => {
                    self.failed.lock().await.push((id, key));
                }
                _ => {}
            }
            if self.expected.fetch_add(1, Ordering::SeqCst) + 1 == self.target {
                self.notify.notify_one();
            }
        }
    }

    fn container(seq: u32) -> ContainerId {
        ContainerId { app: ApplicationId { cluster_timestamp: 1, id: 1 }, sequence: seq }
    }

    #[tokio::test]
    async fn two_containers_sharing_a_resource_both_get_notified() {
        let dispatcher = Dispatcher::new();
        let fetcher = Arc::new(FakeFetcher::new());
        fetcher.seed_success("s3://x/a", "/local/a", 10).await;
        let coordinator = LocalizationCoordinator::new(fetcher);

        let notify = Arc::new(Notify::new());
        let expected = Arc::new(AtomicUsize::new(0));
        let probe = Arc::new(ContainerProbe {
            localized: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
            notify: notify.clone(),
            expected: expected.clone(),
            target: 2,
        });
        dispatcher.register(EntityKind::Container, probe.clone());
        dispatcher.register(EntityKind::Coordinator, {
            struct CoordHandler(Arc<LocalizationCoordinator>);
            #[async_trait::async_trait]
            impl EventHandler for CoordHandler {
                async fn handle(&self, dispatcher: &Arc<Dispatcher>, event: Event) {
                    if let Event::Coordinator(e) = event {
                        self.0.apply_coordinator_event(dispatcher, e).await;
                    }
                }
            }
            Arc::new(CoordHandler(coordinator.clone()))
        });
        dispatcher.register(EntityKind::Resource, Arc::new(crate::resource::ResourceFsmHandler { coordinator: coordinator.clone() }));

        let request = LocalResourceRequest { uri: "s3://x/a".to_string(), size: 10, timestamp: 0, visibility: Visibility::Public };
        let key = ResourceKey::new(&request, "alice", container(0).app);

        dispatcher
            .post(Event::Coordinator(CoordinatorEvent::FetchRequest { request: request.clone(), key: key.clone(), container: container(0) }))
            .await;
        dispatcher
            .post(Event::Coordinator(CoordinatorEvent::FetchRequest { request, key: key.clone(), container: container(1) }))
            .await;

        notify.notified().await;

        let localized = probe.localized.lock().await;
        assert_eq!(localized.len(), 2);
    }

    struct ApplicationProbe {
        cleaned: Mutex<Vec<ApplicationId>>,
        notify: Arc<Notify>,
    }

    #[async_trait::async_trait]
    impl EventHandler for ApplicationProbe {
        async fn handle(&self, _dispatcher: &Arc<Dispatcher>, event: Event) {
            if let Event::Application(id, crate::dispatcher::ApplicationEvent::ApplicationResourcesCleaned) = event {
                self.cleaned.lock().await.push(id);
                self.notify.notify_one();
            }
        }
    }

    #[tokio::test]
    async fn release_application_drops_application_scoped_entries_and_acknowledges() {
        let dispatcher = Dispatcher::new();
        let fetcher = Arc::new(FakeFetcher::new());
        let app = ApplicationId { cluster_timestamp: 1, id: 1 };
        let request = LocalResourceRequest { uri: "s3://x/a".to_string(), size: 10, timestamp: 0, visibility: Visibility::Application };
        fetcher.seed_success(&request.uri, "/local/a", 10).await;
        let coordinator = LocalizationCoordinator::new(fetcher);
        let key = ResourceKey::new(&request, "alice", app);

        let notify = Arc::new(Notify::new());
        dispatcher.register(EntityKind::Application, Arc::new(ApplicationProbe { cleaned: Mutex::new(Vec::new()), notify: notify.clone() }));
        dispatcher.register(EntityKind::Coordinator, {
            struct CoordHandler(Arc<LocalizationCoordinator>);
            #[async_trait::async_trait]
            impl EventHandler for CoordHandler {
                async fn handle(&self, dispatcher: &Arc<Dispatcher>, event: Event) {
                    if let Event::Coordinator(e) = event {
                        self.0.apply_coordinator_event(dispatcher, e).await;
                    }
                }
            }
            Arc::new(CoordHandler(coordinator.clone()))
        });
        dispatcher.register(EntityKind::Resource, Arc::new(crate::resource::ResourceFsmHandler { coordinator: coordinator.clone() }));

        coordinator.resources.insert(key.clone(), crate::resource::LocalizedResource::new(request));
        assert!(coordinator.resources.contains_key(&key));

        dispatcher.post(Event::Coordinator(CoordinatorEvent::ReleaseApplication { app })).await;
        notify.notified().await;

        assert!(!coordinator.resources.contains_key(&key));
    }
}
