//! Event payloads — a sum type per target-entity kind, matched exhaustively
//! in each FSM's transition function. An event that reaches a transition
//! illegal for the entity's current state is an `InternalInvariantViolation`,
//! never a panic.

use std::path::PathBuf;

use crate::ids::{ApplicationId, ContainerId, LocalResourceRequest, ResourceKey, Visibility};

#[derive(Debug, Clone)]
pub enum ApplicationEvent {
    InitApplication { container: ContainerId, user: String },
    ApplicationInited,
    ContainerFinished { container: ContainerId },
    FinishApplication,
    ApplicationResourcesCleaned,
}

#[derive(Debug, Clone)]
pub enum ContainerEvent {
    Init,
    ResourceLocalized { key: ResourceKey, path: PathBuf },
    ResourceFailed { key: ResourceKey, cause: String },
    Launched,
    Exited { code: i32 },
    Kill,
    CleanupDone,
    DiagnosticUpdate { text: String },
}

#[derive(Debug, Clone)]
pub enum ResourceEvent {
    Request { container: ContainerId, visibility: Visibility },
    Localized { path: PathBuf, size: i64 },
    Release { container: ContainerId },
}

/// Events targeting the Localization coordinator (C3) itself, rather than
/// one specific LocalizedResource.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    FetchRequest { request: LocalResourceRequest, key: ResourceKey, container: ContainerId },
    FetchComplete { key: ResourceKey, path: PathBuf, size: i64 },
    FetchFailed { key: ResourceKey, cause: String },
    ReleaseForContainer { container: ContainerId, keys: Vec<ResourceKey> },
    /// All of an application's containers have reached DONE; drop every
    /// `ResourceKey::Application` entry scoped to it and acknowledge.
    ReleaseApplication { app: ApplicationId },
    Evict { target_bytes: u64 },
}

#[derive(Debug, Clone)]
pub enum Event {
    Application(ApplicationId, ApplicationEvent),
    Container(ContainerId, ContainerEvent),
    Resource(ResourceKey, ResourceEvent),
    Coordinator(CoordinatorEvent),
}

/// The entity a mailbox is keyed by — distinct from [`EntityKind`], which
/// only says *which handler* should process the event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityId {
    Application(ApplicationId),
    Container(ContainerId),
    Resource(ResourceKey),
    Coordinator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Application,
    Container,
    Resource,
    Coordinator,
}

impl Event {
    pub fn entity_id(&self) -> EntityId {
        match self {
            Event::Application(id, _) => EntityId::Application(*id),
            Event::Container(id, _) => EntityId::Container(*id),
            Event::Resource(key, _) => EntityId::Resource(key.clone()),
            Event::Coordinator(_) => EntityId::Coordinator,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Event::Application(..) => EntityKind::Application,
            Event::Container(..) => EntityKind::Container,
            Event::Resource(..) => EntityKind::Resource,
            Event::Coordinator(..) => EntityKind::Coordinator,
        }
    }
}
