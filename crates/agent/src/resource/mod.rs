//! LocalizedResource FSM (C2) — tracks one cacheable resource through
//! fetch, share, and release.

pub mod coordinator;
pub mod permit;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::warn;

use crate::ids::{ContainerId, LocalResourceRequest, ResourceKey};
use self::permit::FetchPermit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Init,
    Downloading,
    Localized,
}

/// One cached, reference-counted local materialization of a unique remote
/// resource. Mutated only by the handler draining this resource's mailbox,
/// so the `Mutex` here guards against the coordinator's own concurrent
/// bookkeeping (e.g. `evict`) rather than FSM re-entrancy.
pub struct LocalizedResource {
    pub key: LocalResourceRequest,
    pub state: ResourceState,
    /// Duplicates permitted: the same container may request twice before
    /// releasing once, and both requests must be released independently.
    pub refs: Vec<ContainerId>,
    pub local_path: Option<PathBuf>,
    pub size: i64,
    pub last_touch: Instant,
    pub fetch_permit: FetchPermit,
}

impl LocalizedResource {
    pub fn new(key: LocalResourceRequest) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            key,
            state: ResourceState::Init,
            refs: Vec::new(),
            local_path: None,
            size: 0,
            last_touch: Instant::now(),
            fetch_permit: FetchPermit::new(),
        }))
    }

    fn touch(&mut self) {
        self.last_touch = Instant::now();
    }

    /// Apply REQUEST(container). Returns `true` if this is the container's
    /// first ref (used by the coordinator to decide whether a
    /// ContainerResourceLocalized notification fires immediately).
    pub fn on_request(&mut self, container: ContainerId) -> ResourceState {
        match self.state {
            ResourceState::Init => {
                self.refs.push(container);
                self.state = ResourceState::Downloading;
                self.touch();
                ResourceState::Downloading
            }
            ResourceState::Downloading => {
                self.refs.push(container);
                self.touch();
                ResourceState::Downloading
            }
            ResourceState::Localized => {
                self.refs.push(container);
                self.touch();
                ResourceState::Localized
            }
        }
    }

    /// Apply LOCALIZED(path, size). Returns the list of waiting containers
    /// to notify, or an empty list if this was a no-waiter / duplicate
    /// completion.
    pub fn on_localized(&mut self, path: PathBuf, size: i64) -> Vec<ContainerId> {
        match self.state {
            ResourceState::Init => {
                warn!(uri = %self.key.uri, "LOCALIZED event with no waiters");
                self.local_path = Some(path);
                self.size = size;
                self.state = ResourceState::Localized;
                self.touch();
                Vec::new()
            }
            ResourceState::Downloading => {
                self.local_path = Some(path);
                self.size = size;
                self.state = ResourceState::Localized;
                self.touch();
                self.refs.clone()
            }
            ResourceState::Localized => {
                // duplicate completion: idempotent no-op
                Vec::new()
            }
        }
    }

    /// Apply RELEASE(container). A container absent from `refs` logs a
    /// warning and is otherwise a no-op — never a crash.
    pub fn on_release(&mut self, container: ContainerId) {
        if let Some(pos) = self.refs.iter().position(|c| *c == container) {
            self.refs.remove(pos);
            self.touch();
            if self.refs.is_empty() && self.state == ResourceState::Downloading {
                self.state = ResourceState::Init;
            }
        } else {
            warn!(%container, uri = %self.key.uri, "RELEASE from container not present in refs");
        }
    }
}

/// The handler registered for [`crate::dispatcher::EntityKind::Resource`].
/// Looks the target resource up in the coordinator and applies the event,
/// then asks the coordinator to post any resulting notifications.
pub struct ResourceFsmHandler {
    pub coordinator: Arc<coordinator::LocalizationCoordinator>,
}

#[async_trait::async_trait]
impl crate::dispatcher::EventHandler for ResourceFsmHandler {
    async fn handle(&self, dispatcher: &Arc<crate::dispatcher::Dispatcher>, event: crate::dispatcher::Event) {
        if let crate::dispatcher::Event::Resource(key, resource_event) = event {
            self.coordinator.apply_resource_event(dispatcher, key, resource_event).await;
        }
    }
}
