//! Entity identifiers and value types shared across the engine.

use std::path::PathBuf;

/// Immutable identifier for an Application, scoped by the controller's
/// cluster timestamp so ids never collide across controller restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApplicationId {
    pub cluster_timestamp: u64,
    pub id: u32,
}

impl std::fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "application_{}_{:04}", self.cluster_timestamp, self.id)
    }
}

/// Immutable identifier for a Container, scoped to its owning application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId {
    pub app: ApplicationId,
    pub sequence: u32,
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "container_{}_{:04}_{:06}", self.app.cluster_timestamp, self.app.id, self.sequence)
    }
}

/// Sharing scope of a localized resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    Private,
    Application,
}

/// Value-typed resource request; equality (including visibility scope, see
/// [`ResourceKey`]) defines the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalResourceRequest {
    pub uri: String,
    pub size: i64,
    pub timestamp: i64,
    pub visibility: Visibility,
}

/// The actual cache key a [`LocalResourceRequest`] is stored under.
///
/// PUBLIC resources are shared across all applications and are keyed by
/// `uri` alone. PRIVATE resources are additionally scoped to the
/// requesting user; APPLICATION resources to the owning application — two
/// requests for the same URI under different scopes are different cache
/// entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Public { uri: String },
    Private { user: String, uri: String },
    Application { app: ApplicationId, uri: String },
}

impl ResourceKey {
    pub fn new(req: &LocalResourceRequest, user: &str, app: ApplicationId) -> Self {
        match req.visibility {
            Visibility::Public => ResourceKey::Public { uri: req.uri.clone() },
            Visibility::Private => ResourceKey::Private { user: user.to_string(), uri: req.uri.clone() },
            Visibility::Application => ResourceKey::Application { app, uri: req.uri.clone() },
        }
    }
}

/// Per-container launch description. Command/environment are opaque to the
/// engine and passed through to the launcher collaborator unexamined.
#[derive(Debug, Clone, Default)]
pub struct LaunchContext {
    pub command: Vec<String>,
    pub environment: std::collections::HashMap<String, String>,
    pub resources: Vec<LocalResourceRequest>,
}

/// A materialized local path for a resource, returned by the downloader.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub path: PathBuf,
    pub size: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_id_equality_is_by_value() {
        let a = ApplicationId { cluster_timestamp: 100, id: 1 };
        let b = ApplicationId { cluster_timestamp: 100, id: 1 };
        assert_eq!(a, b);
    }

    #[test]
    fn resource_key_partitions_by_visibility() {
        let app = ApplicationId { cluster_timestamp: 100, id: 1 };
        let req = LocalResourceRequest {
            uri: "s3://x/a".to_string(),
            size: 10,
            timestamp: 0,
            visibility: Visibility::Public,
        };
        let pub_key = ResourceKey::new(&req, "alice", app);
        let mut priv_req = req.clone();
        priv_req.visibility = Visibility::Private;
        let priv_key = ResourceKey::new(&priv_req, "alice", app);
        assert_ne!(pub_key, priv_key);
    }
}
