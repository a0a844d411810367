//! Context (C6) — the shared registries: applications and containers.
//! Both are mutated only through the dispatcher thread owning that entity,
//! or through the insert-if-absent primitives below.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::application::ApplicationEntity;
use crate::container::ContainerEntity;
use crate::ids::{ApplicationId, ContainerId};

pub struct Context {
    pub applications: DashMap<ApplicationId, Arc<Mutex<ApplicationEntity>>>,
    pub containers: DashMap<ContainerId, Arc<Mutex<ContainerEntity>>>,
}

impl Context {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { applications: DashMap::new(), containers: DashMap::new() })
    }

    /// Insert-if-absent: the first creator wins, later calls return the
    /// existing entry untouched.
    pub fn get_or_create_application(&self, id: ApplicationId, user: &str) -> (Arc<Mutex<ApplicationEntity>>, bool) {
        let mut created = false;
        let entry = self
            .applications
            .entry(id)
            .or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(ApplicationEntity::new(id, user.to_string())))
            })
            .clone();
        (entry, created)
    }

    /// Insert-if-absent for containers. Returns `false` without
    /// overwriting if the id already exists.
    pub fn insert_container_if_absent(&self, id: ContainerId, entity: ContainerEntity) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.containers.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(entity)));
                true
            }
        }
    }

    pub fn get_container(&self, id: &ContainerId) -> Option<Arc<Mutex<ContainerEntity>>> {
        self.containers.get(id).map(|e| e.clone())
    }

    pub fn get_application(&self, id: &ApplicationId) -> Option<Arc<Mutex<ApplicationEntity>>> {
        self.applications.get(id).map(|e| e.clone())
    }

    /// Removed only by the owning FSM on reaching its terminal state.
    pub fn remove_container(&self, id: &ContainerId) {
        self.containers.remove(id);
    }

    pub fn remove_application(&self, id: &ApplicationId) {
        self.applications.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_application_second_call_does_not_overwrite() {
        let ctx = Context::new();
        let id = ApplicationId { cluster_timestamp: 1, id: 1 };
        let (_first, created_first) = ctx.get_or_create_application(id, "alice");
        let (_second, created_second) = ctx.get_or_create_application(id, "bob");
        assert!(created_first);
        assert!(!created_second);
    }
}
