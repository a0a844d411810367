//! Collaborator traits — the narrow boundaries the engine calls through to
//! reach the systems intentionally out of scope here: the real downloader,
//! the OS-level launcher/killer, and the heartbeat channel to the central
//! controller. Production wiring for these lives outside this crate;
//! `Fake*` deterministic doubles below are what the test suite uses.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::AgentError;
use crate::ids::{ContainerId, FetchedResource, LaunchContext, LocalResourceRequest};

#[async_trait::async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, request: &LocalResourceRequest) -> Result<FetchedResource, AgentError>;
}

#[async_trait::async_trait]
pub trait ContainerLauncher: Send + Sync {
    async fn launch(
        &self,
        container: ContainerId,
        ctx: &LaunchContext,
        localized: &HashMap<String, std::path::PathBuf>,
    ) -> Result<(), AgentError>;
}

#[async_trait::async_trait]
pub trait ContainerKiller: Send + Sync {
    async fn kill(&self, container: ContainerId, grace: Duration, force: Duration) -> Result<(), AgentError>;
}

/// The node's outbound link to the central controller. Only the
/// notification direction is modeled; the inbound FINISH_APPS /
/// FINISH_CONTAINERS commands arrive through [`crate::controller`] instead.
#[async_trait::async_trait]
pub trait ControllerNotifier: Send + Sync {
    async fn container_finished(&self, container: ContainerId, exit_code: Option<i32>);
}

// ── Deterministic test doubles ──────────────────────────────────

pub mod fake {
    use super::*;
    use tokio::sync::Mutex;

    /// A downloader whose outcome for each URI is pre-seeded. Unseeded URIs
    /// succeed with a synthetic path built from the URI, matching the
    /// "happy path" default most tests want.
    #[derive(Default)]
    pub struct FakeFetcher {
        outcomes: Mutex<HashMap<String, Result<FetchedResource, String>>>,
    }

    impl FakeFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn seed_success(&self, uri: &str, path: &str, size: i64) {
            self.outcomes.lock().await.insert(
                uri.to_string(),
                Ok(FetchedResource { path: std::path::PathBuf::from(path), size }),
            );
        }

        pub async fn seed_failure(&self, uri: &str, cause: &str) {
            self.outcomes.lock().await.insert(uri.to_string(), Err(cause.to_string()));
        }
    }

    #[async_trait::async_trait]
    impl ResourceFetcher for FakeFetcher {
        async fn fetch(&self, request: &LocalResourceRequest) -> Result<FetchedResource, AgentError> {
            let outcomes = self.outcomes.lock().await;
            match outcomes.get(&request.uri) {
                Some(Ok(resource)) => Ok(resource.clone()),
                Some(Err(cause)) => Err(AgentError::DownloadFailure(cause.clone())),
                None => Ok(FetchedResource {
                    path: std::path::PathBuf::from(format!("/local/{}", request.uri.replace(['/', ':'], "_"))),
                    size: request.size,
                }),
            }
        }
    }

    /// A launcher that always succeeds unless the container id is seeded to
    /// fail.
    #[derive(Default)]
    pub struct FakeLauncher {
        should_fail: Mutex<std::collections::HashSet<ContainerId>>,
    }

    impl FakeLauncher {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn seed_failure(&self, container: ContainerId) {
            self.should_fail.lock().await.insert(container);
        }
    }

    #[async_trait::async_trait]
    impl ContainerLauncher for FakeLauncher {
        async fn launch(
            &self,
            container: ContainerId,
            _ctx: &LaunchContext,
            _localized: &HashMap<String, std::path::PathBuf>,
        ) -> Result<(), AgentError> {
            if self.should_fail.lock().await.contains(&container) {
                Err(AgentError::LaunchFailure(format!("launcher refused {container}")))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    pub struct FakeKiller {
        pub killed: Mutex<Vec<ContainerId>>,
    }

    impl FakeKiller {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait::async_trait]
    impl ContainerKiller for FakeKiller {
        async fn kill(&self, container: ContainerId, _grace: Duration, _force: Duration) -> Result<(), AgentError> {
            self.killed.lock().await.push(container);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeController {
        pub finished: Mutex<Vec<(ContainerId, Option<i32>)>>,
    }

    impl FakeController {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait::async_trait]
    impl ControllerNotifier for FakeController {
        async fn container_finished(&self, container: ContainerId, exit_code: Option<i32>) {
            self.finished.lock().await.push((container, exit_code));
        }
    }
}
