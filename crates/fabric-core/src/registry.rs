use crate::concurrency::{LockHandle, LockManager};
use crate::{poisoned, CoreError};
use fabric_provision::ResourceHandle;
use fabric_schema::{
    Attributes, Container, ContainerIdentity, LifecycleState, ProfileIdentity, ResourceIdentity,
    ServiceEndpoint, Version,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CONTAINER_SCOPE: &str = "container";

/// A resource installed on a container, tracked in installation order.
#[derive(Debug, Clone)]
pub struct InstalledResource {
    pub identity: ResourceIdentity,
    pub handle: Arc<dyn ResourceHandle>,
    pub shared: bool,
}

/// Mutable state of one container. Only mutated under the container's write
/// lock; the surrounding mutex is held just long enough to read or write it.
#[derive(Debug)]
pub struct ContainerState {
    pub identity: ContainerIdentity,
    pub parent: Option<ContainerIdentity>,
    pub children: BTreeSet<ContainerIdentity>,
    pub state: LifecycleState,
    pub profile_version: Option<Version>,
    pub profiles: Vec<ProfileIdentity>,
    pub endpoints: BTreeSet<ServiceEndpoint>,
    pub attributes: Attributes,
    pub installed: Vec<InstalledResource>,
    pub created_at: String,
}

impl ContainerState {
    pub fn new(identity: ContainerIdentity, parent: Option<ContainerIdentity>) -> Self {
        Self {
            identity,
            parent,
            children: BTreeSet::new(),
            state: LifecycleState::Created,
            profile_version: None,
            profiles: Vec::new(),
            endpoints: BTreeSet::new(),
            attributes: Attributes::new(),
            installed: Vec::new(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Add profiles not yet assigned, keeping assignment order.
    pub fn add_profiles(&mut self, profiles: &[ProfileIdentity]) {
        for profile in profiles {
            if !self.profiles.contains(profile) {
                self.profiles.push(profile.clone());
            }
        }
    }

    pub fn snapshot(&self) -> Container {
        Container {
            identity: self.identity.clone(),
            parent: self.parent.clone(),
            children: self.children.clone(),
            state: self.state,
            profile_version: self.profile_version.clone(),
            profiles: self.profiles.clone(),
            endpoints: self.endpoints.clone(),
            attributes: self.attributes.clone(),
            installed: self.installed.iter().map(|r| r.identity.clone()).collect(),
            created_at: self.created_at.clone(),
        }
    }
}

pub type SharedState = Arc<Mutex<ContainerState>>;

/// In-memory registry of live containers with per-container locks.
///
/// Destroyed identities are remembered until re-created so that operations
/// on them can be told apart from operations on unknown containers.
#[derive(Debug)]
pub struct ContainerRegistry {
    containers: Mutex<HashMap<ContainerIdentity, SharedState>>,
    destroyed: Mutex<HashSet<ContainerIdentity>>,
    locks: LockManager<ContainerIdentity>,
}

impl ContainerRegistry {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            destroyed: Mutex::new(HashSet::new()),
            locks: LockManager::new(CONTAINER_SCOPE, lock_timeout),
        }
    }

    pub fn locks(&self) -> &LockManager<ContainerIdentity> {
        &self.locks
    }

    pub fn acquire_write_lock(&self, identity: &ContainerIdentity) -> Result<LockHandle, CoreError> {
        self.locks.acquire_write_lock(identity)
    }

    pub fn acquire_read_lock(&self, identity: &ContainerIdentity) -> Result<LockHandle, CoreError> {
        self.locks.acquire_read_lock(identity)
    }

    pub fn register(&self, state: ContainerState) -> Result<SharedState, CoreError> {
        let identity = state.identity.clone();
        let mut containers = self.containers.lock().map_err(|e| poisoned(&e))?;
        if containers.contains_key(&identity) {
            return Err(CoreError::AlreadyExists(format!("container '{identity}'")));
        }
        let shared = Arc::new(Mutex::new(state));
        containers.insert(identity.clone(), Arc::clone(&shared));
        drop(containers);
        self.destroyed
            .lock()
            .map_err(|e| poisoned(&e))?
            .remove(&identity);
        Ok(shared)
    }

    /// Drop a container and remember it as destroyed.
    pub fn remove(&self, identity: &ContainerIdentity) -> Result<Option<SharedState>, CoreError> {
        let removed = self
            .containers
            .lock()
            .map_err(|e| poisoned(&e))?
            .remove(identity);
        if removed.is_some() {
            self.destroyed
                .lock()
                .map_err(|e| poisoned(&e))?
                .insert(identity.clone());
        }
        Ok(removed)
    }

    pub fn contains(&self, identity: &ContainerIdentity) -> Result<bool, CoreError> {
        let containers = self.containers.lock().map_err(|e| poisoned(&e))?;
        Ok(containers.contains_key(identity))
    }

    pub fn is_destroyed(&self, identity: &ContainerIdentity) -> bool {
        self.destroyed
            .lock()
            .map(|d| d.contains(identity))
            .unwrap_or(false)
    }

    pub fn get(&self, identity: &ContainerIdentity) -> Result<SharedState, CoreError> {
        let containers = self.containers.lock().map_err(|e| poisoned(&e))?;
        containers
            .get(identity)
            .cloned()
            .ok_or_else(|| CoreError::ContainerNotFound(identity.to_string()))
    }

    pub fn snapshot(&self, identity: &ContainerIdentity) -> Result<Container, CoreError> {
        let shared = self.get(identity)?;
        let state = shared.lock().map_err(|e| poisoned(&e))?;
        Ok(state.snapshot())
    }

    /// Snapshots of all live containers, ordered by identity. Takes no
    /// container locks.
    pub fn snapshots(&self) -> Result<Vec<Container>, CoreError> {
        let all: Vec<SharedState> = self
            .containers
            .lock()
            .map_err(|e| poisoned(&e))?
            .values()
            .cloned()
            .collect();
        let mut snapshots = Vec::with_capacity(all.len());
        for shared in all {
            snapshots.push(shared.lock().map_err(|e| poisoned(&e))?.snapshot());
        }
        snapshots.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(snapshots)
    }

    pub fn len(&self) -> usize {
        self.containers.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
