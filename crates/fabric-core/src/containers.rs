use crate::concurrency::{LockHandle, LockMode};
use crate::events::{EventDispatcher, ProvisionEvent, ProvisionListener};
use crate::lifecycle::{validate_transition, ComponentState};
use crate::profiles::ProfileService;
use crate::provision::{Provisioning, SharedResources};
use crate::registry::{ContainerRegistry, ContainerState, SharedState};
use crate::{poisoned, CoreError};
use fabric_provision::{ConfigurationManager, Provisioner};
use fabric_schema::{
    Container, ContainerIdentity, CreateOptions, LifecycleState, Profile, ProfileIdentity,
    ResourceIdentity, RuntimeType, ServiceEndpoint, Version,
};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Collaborators a [`ContainerService`] is wired with.
pub struct ContainerServiceDeps {
    pub registry: Arc<ContainerRegistry>,
    pub profiles: Arc<ProfileService>,
    pub provisioner: Arc<dyn Provisioner>,
    pub configuration: Arc<dyn ConfigurationManager>,
    pub dispatcher: Arc<EventDispatcher>,
    pub runtime: RuntimeType,
    pub default_version: Version,
    pub default_profile: ProfileIdentity,
}

/// Container lifecycle, profile assignment and provisioning.
///
/// Mutating operations hold the container's write lock for their whole
/// duration. When a parent is involved its lock is taken first, and the
/// profile version lock is always taken after any container lock.
pub struct ContainerService {
    registry: Arc<ContainerRegistry>,
    profiles: Arc<ProfileService>,
    provisioning: Provisioning,
    default_version: Version,
    default_profile: ProfileIdentity,
    current: RwLock<Option<ContainerIdentity>>,
    component: ComponentState,
}

impl ContainerService {
    pub fn new(deps: ContainerServiceDeps) -> Self {
        Self {
            registry: deps.registry,
            profiles: deps.profiles,
            provisioning: Provisioning {
                provisioner: deps.provisioner,
                configuration: deps.configuration,
                dispatcher: deps.dispatcher,
                shared: SharedResources::default(),
                runtime: deps.runtime,
            },
            default_version: deps.default_version,
            default_profile: deps.default_profile,
            current: RwLock::new(None),
            component: ComponentState::new("container-service"),
        }
    }

    pub fn activate(&self) {
        self.component.activate();
    }

    pub fn deactivate(&self) {
        self.component.deactivate();
    }

    pub fn is_active(&self) -> bool {
        self.component.is_active()
    }

    pub fn default_version(&self) -> &Version {
        &self.default_version
    }

    pub fn default_profile(&self) -> &ProfileIdentity {
        &self.default_profile
    }

    pub(crate) fn set_current_container(&self, identity: ContainerIdentity) -> Result<(), CoreError> {
        let mut current = self.current.write().map_err(|e| poisoned(&e))?;
        *current = Some(identity);
        Ok(())
    }

    pub fn current_container_identity(&self) -> Option<ContainerIdentity> {
        self.current.read().ok().and_then(|c| c.clone())
    }

    pub fn current_container(&self) -> Result<Option<Container>, CoreError> {
        match self.current_container_identity() {
            Some(identity) => self.get_container(&identity).map(Some),
            None => Ok(None),
        }
    }

    /// Number of containers currently holding a shared resource.
    pub fn shared_references(&self, identity: &ResourceIdentity) -> usize {
        self.provisioning.shared.references(identity)
    }

    pub fn acquire_container_lock(
        &self,
        identity: &ContainerIdentity,
        write: bool,
    ) -> Result<LockHandle, CoreError> {
        self.component.check()?;
        self.registry.locks().acquire_lock(identity, write)
    }

    fn guard_current(&self, identity: &ContainerIdentity, operation: &str) -> Result<(), CoreError> {
        if self.current_container_identity().as_ref() == Some(identity) {
            return Err(CoreError::IllegalState(format!(
                "cannot {operation} the current container '{identity}'"
            )));
        }
        Ok(())
    }

    /// The live state of `identity`; a destroyed container reports an
    /// invalid transition to `target`.
    fn live_state(&self, identity: &ContainerIdentity, target: &str) -> Result<SharedState, CoreError> {
        if self.registry.is_destroyed(identity) && !self.registry.contains(identity)? {
            return Err(CoreError::InvalidTransition {
                identity: identity.to_string(),
                from: LifecycleState::Destroyed.to_string(),
                to: target.to_owned(),
            });
        }
        self.registry.get(identity)
    }

    pub fn create_container(&self, options: CreateOptions) -> Result<Container, CoreError> {
        self.component.check()?;
        if options.identity.trim().is_empty() {
            return Err(CoreError::IllegalState("container identity must not be empty".to_owned()));
        }
        if options.parent.as_ref() == Some(&options.identity) {
            return Err(CoreError::IllegalState(format!(
                "container '{}' cannot be its own parent",
                options.identity
            )));
        }

        let parent = match &options.parent {
            Some(parent_id) => {
                let lock = self.registry.acquire_write_lock(parent_id)?;
                let state = self.live_state(parent_id, "link-child")?;
                Some((lock, state))
            }
            None => None,
        };
        let _lock = self.registry.acquire_write_lock(&options.identity)?;
        if self.registry.contains(&options.identity)? {
            return Err(CoreError::AlreadyExists(format!(
                "container '{}'",
                options.identity
            )));
        }

        let mut state = ContainerState::new(options.identity.clone(), options.parent.clone());
        state.attributes = options.attributes;
        let version = match (options.profile_version, options.profiles.is_empty()) {
            (Some(version), _) => Some(version),
            (None, false) => Some(self.default_version.clone()),
            (None, true) => None,
        };
        // Hold the version lock until the container is registered, so the
        // version cannot be removed in between.
        let _version_lock = match &version {
            Some(version) => {
                let lock = self.profiles.acquire_profile_version_lock(version, false)?;
                self.profiles
                    .check_assignment(&lock, version, &options.profiles)?;
                Some(lock)
            }
            None => None,
        };
        state.profile_version = version;
        state.add_profiles(&options.profiles);

        let snapshot = state.snapshot();
        self.registry.register(state)?;
        if let Some((_, parent_state)) = &parent {
            parent_state
                .lock()
                .map_err(|e| poisoned(&e))?
                .children
                .insert(options.identity.clone());
        }
        info!("created container {}", snapshot.identity);
        Ok(snapshot)
    }

    pub fn start_container(
        &self,
        identity: &ContainerIdentity,
        listener: Option<&dyn ProvisionListener>,
    ) -> Result<Container, CoreError> {
        self.component.check()?;
        let lock = self.registry.acquire_write_lock(identity)?;
        let shared = self.live_state(identity, "started")?;

        let (version, profiles) = {
            let state = shared.lock().map_err(|e| poisoned(&e))?;
            validate_transition(identity, state.state, LifecycleState::Started)?;
            let version = state
                .profile_version
                .clone()
                .unwrap_or_else(|| self.default_version.clone());
            let mut profiles = state.profiles.clone();
            if profiles.is_empty() {
                profiles.push(self.default_profile.clone());
            }
            (version, profiles)
        };

        let version_lock = self.profiles.acquire_profile_version_lock(&version, false)?;
        self.profiles
            .check_assignment(&version_lock, &version, &profiles)?;
        {
            let mut state = shared.lock().map_err(|e| poisoned(&e))?;
            state.profile_version = Some(version);
            state.profiles = profiles;
            state.state = LifecycleState::Started;
        }
        info!("started container {identity}");

        self.provision_internal(&lock, &shared, listener)?;
        drop(version_lock);
        self.snapshot_of(&shared)
    }

    pub fn stop_container(&self, identity: &ContainerIdentity) -> Result<Container, CoreError> {
        self.component.check()?;
        self.guard_current(identity, "stop")?;
        let _lock = self.registry.acquire_write_lock(identity)?;
        let shared = self.live_state(identity, "stopped")?;
        let mut state = shared.lock().map_err(|e| poisoned(&e))?;
        validate_transition(identity, state.state, LifecycleState::Stopped)?;
        state.state = LifecycleState::Stopped;
        info!("stopped container {identity}");
        Ok(state.snapshot())
    }

    pub fn destroy_container(
        &self,
        identity: &ContainerIdentity,
        listener: Option<&dyn ProvisionListener>,
    ) -> Result<Container, CoreError> {
        self.component.check()?;
        self.guard_current(identity, "destroy")?;

        let parent_id = self.live_state(identity, "destroyed")?
            .lock()
            .map_err(|e| poisoned(&e))?
            .parent
            .clone();
        let _parent_lock = match &parent_id {
            Some(parent) => Some(self.registry.acquire_write_lock(parent)?),
            None => None,
        };
        let lock = self.registry.acquire_write_lock(identity)?;
        let shared = self.live_state(identity, "destroyed")?;

        let mut installed = {
            let mut state = shared.lock().map_err(|e| poisoned(&e))?;
            validate_transition(identity, state.state, LifecycleState::Destroyed)?;
            if !state.children.is_empty() {
                let children: Vec<&str> = state.children.iter().map(|c| c.as_str()).collect();
                return Err(CoreError::IllegalState(format!(
                    "container '{identity}' still has children: {}",
                    children.join(", ")
                )));
            }
            if state.state == LifecycleState::Started {
                state.state = LifecycleState::Stopped;
                debug!("stopped container {identity} before destroy");
            }
            state.installed.clone()
        };

        let removed = self
            .provisioning
            .remove_all(&lock, identity, &mut installed, listener);
        let mut state = shared.lock().map_err(|e| poisoned(&e))?;
        state.installed = installed;
        removed?;

        state.state = LifecycleState::Destroyed;
        let snapshot = state.snapshot();
        drop(state);

        self.registry.remove(identity)?;
        if let Some(parent) = &parent_id {
            if let Ok(parent_state) = self.registry.get(parent) {
                parent_state
                    .lock()
                    .map_err(|e| poisoned(&e))?
                    .children
                    .remove(identity);
            }
        }
        info!("destroyed container {identity}");
        Ok(snapshot)
    }

    pub fn set_profile_version(
        &self,
        identity: &ContainerIdentity,
        version: &Version,
        listener: Option<&dyn ProvisionListener>,
    ) -> Result<Container, CoreError> {
        self.component.check()?;
        let lock = self.registry.acquire_write_lock(identity)?;
        let shared = self.live_state(identity, "set-version")?;
        let profiles = shared.lock().map_err(|e| poisoned(&e))?.profiles.clone();

        let version_lock = self.profiles.acquire_profile_version_lock(version, false)?;
        self.profiles
            .check_assignment(&version_lock, version, &profiles)?;
        shared.lock().map_err(|e| poisoned(&e))?.profile_version = Some(version.clone());
        info!("container {identity} switched to version {version}");

        self.provision_internal(&lock, &shared, listener)?;
        drop(version_lock);
        self.snapshot_of(&shared)
    }

    pub fn add_profiles(
        &self,
        identity: &ContainerIdentity,
        profiles: &[ProfileIdentity],
        listener: Option<&dyn ProvisionListener>,
    ) -> Result<Container, CoreError> {
        self.component.check()?;
        let lock = self.registry.acquire_write_lock(identity)?;
        let shared = self.live_state(identity, "add-profiles")?;
        let version = shared
            .lock()
            .map_err(|e| poisoned(&e))?
            .profile_version
            .clone()
            .unwrap_or_else(|| self.default_version.clone());

        let version_lock = self.profiles.acquire_profile_version_lock(&version, false)?;
        self.profiles
            .check_assignment(&version_lock, &version, profiles)?;
        {
            let mut state = shared.lock().map_err(|e| poisoned(&e))?;
            state.profile_version = Some(version);
            state.add_profiles(profiles);
        }
        info!("added profiles {profiles:?} to container {identity}");

        self.provision_internal(&lock, &shared, listener)?;
        drop(version_lock);
        self.snapshot_of(&shared)
    }

    /// Remove profiles from a container. Ids that are not assigned are
    /// ignored. Removing the last profile falls back to the default profile,
    /// as starting a container does.
    pub fn remove_profiles(
        &self,
        identity: &ContainerIdentity,
        profiles: &[ProfileIdentity],
        listener: Option<&dyn ProvisionListener>,
    ) -> Result<Container, CoreError> {
        self.component.check()?;
        let lock = self.registry.acquire_write_lock(identity)?;
        let shared = self.live_state(identity, "remove-profiles")?;
        let (version, mut remaining) = {
            let state = shared.lock().map_err(|e| poisoned(&e))?;
            let remaining: Vec<ProfileIdentity> = state
                .profiles
                .iter()
                .filter(|p| !profiles.contains(p))
                .cloned()
                .collect();
            if remaining.len() == state.profiles.len() {
                debug!("container {identity} had none of {profiles:?}");
                return Ok(state.snapshot());
            }
            (state.profile_version.clone(), remaining)
        };

        let version_lock = match &version {
            Some(version) => {
                let version_lock = self.profiles.acquire_profile_version_lock(version, false)?;
                if remaining.is_empty() {
                    remaining.push(self.default_profile.clone());
                    self.profiles
                        .check_assignment(&version_lock, version, &remaining)?;
                }
                Some(version_lock)
            }
            None => None,
        };
        shared.lock().map_err(|e| poisoned(&e))?.profiles = remaining;
        info!("removed profiles {profiles:?} from container {identity}");

        self.provision_internal(&lock, &shared, listener)?;
        drop(version_lock);
        self.snapshot_of(&shared)
    }

    /// Replace a profile and re-provision every container on its version
    /// whose profiles inherit from it. A failing container is logged and
    /// skipped.
    pub fn update_profile(
        &self,
        profile: Profile,
        listener: Option<&dyn ProvisionListener>,
    ) -> Result<Profile, CoreError> {
        self.component.check()?;
        let updated = self.profiles.update_profile(profile, None)?;
        let version = updated.version.clone();

        let affected: Vec<ContainerIdentity> = self
            .registry
            .snapshots()?
            .into_iter()
            .filter(|c| c.profile_version.as_ref() == Some(&version))
            .map(|c| c.identity)
            .collect();

        for identity in affected {
            if let Err(e) = self.reprovision_if_affected(&identity, &updated, listener) {
                warn!(
                    "re-provisioning {identity} after update of {} failed: {e}",
                    updated.identity
                );
            }
        }
        Ok(updated)
    }

    fn reprovision_if_affected(
        &self,
        identity: &ContainerIdentity,
        updated: &Profile,
        listener: Option<&dyn ProvisionListener>,
    ) -> Result<(), CoreError> {
        let lock = self.registry.acquire_write_lock(identity)?;
        let shared = self.registry.get(identity)?;
        let (version, profiles) = {
            let state = shared.lock().map_err(|e| poisoned(&e))?;
            match &state.profile_version {
                Some(version) if *version == updated.version => {
                    (version.clone(), state.profiles.clone())
                }
                _ => return Ok(()),
            }
        };
        let _version_lock = self.profiles.acquire_profile_version_lock(&version, false)?;
        let lineage = self.profiles.lineage(&version, &profiles)?;
        if !lineage.contains(&updated.identity) {
            return Ok(());
        }
        debug!("container {identity} inherits {}, re-provisioning", updated.identity);
        self.provision_internal(&lock, &shared, listener)
    }

    /// Reconcile the container behind `lock` with its current assignment.
    /// Does nothing unless the container is started.
    fn provision_internal(
        &self,
        lock: &LockHandle,
        shared: &SharedState,
        listener: Option<&dyn ProvisionListener>,
    ) -> Result<(), CoreError> {
        let (identity, version, profiles) = {
            let state = shared.lock().map_err(|e| poisoned(&e))?;
            if state.state != LifecycleState::Started {
                debug!("container {} not started, provisioning deferred", state.identity);
                return Ok(());
            }
            let Some(version) = state.profile_version.clone() else {
                return Ok(());
            };
            (state.identity.clone(), version, state.profiles.clone())
        };
        self.registry
            .locks()
            .check_handle(lock, &identity, LockMode::Write)?;

        let effective = match self.profiles.get_effective_profile_for(&version, &profiles) {
            Ok(effective) => effective,
            Err(e) => {
                self.provisioning
                    .dispatch(&ProvisionEvent::error(&identity, None, &e), listener);
                return Err(e);
            }
        };

        // Snapshots keep showing the previous resources until the pass ends.
        let mut installed = shared.lock().map_err(|e| poisoned(&e))?.installed.clone();
        let result = self
            .provisioning
            .reconcile(lock, &identity, &effective, &mut installed, listener);
        shared.lock().map_err(|e| poisoned(&e))?.installed = installed;
        result
    }

    pub fn get_container(&self, identity: &ContainerIdentity) -> Result<Container, CoreError> {
        self.component.check()?;
        let _lock = self.registry.acquire_read_lock(identity)?;
        self.registry.snapshot(identity)
    }

    pub fn get_containers(&self) -> Result<Vec<Container>, CoreError> {
        self.component.check()?;
        self.registry.snapshots()
    }

    /// Effective profile of a container's current assignment.
    pub fn get_effective_profile(&self, identity: &ContainerIdentity) -> Result<Profile, CoreError> {
        self.component.check()?;
        let _lock = self.registry.acquire_read_lock(identity)?;
        let container = self.registry.snapshot(identity)?;
        let version = container
            .profile_version
            .unwrap_or_else(|| self.default_version.clone());
        let profiles = if container.profiles.is_empty() {
            vec![self.default_profile.clone()]
        } else {
            container.profiles
        };
        self.profiles.get_effective_profile_for(&version, &profiles)
    }

    pub fn add_service_endpoint(
        &self,
        identity: &ContainerIdentity,
        endpoint: ServiceEndpoint,
    ) -> Result<Container, CoreError> {
        self.component.check()?;
        let _lock = self.registry.acquire_write_lock(identity)?;
        let shared = self.live_state(identity, "add-endpoint")?;
        let mut state = shared.lock().map_err(|e| poisoned(&e))?;
        state.endpoints.insert(endpoint);
        Ok(state.snapshot())
    }

    pub fn set_attribute(
        &self,
        identity: &ContainerIdentity,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Container, CoreError> {
        self.component.check()?;
        let _lock = self.registry.acquire_write_lock(identity)?;
        let shared = self.live_state(identity, "set-attribute")?;
        let mut state = shared.lock().map_err(|e| poisoned(&e))?;
        state.attributes.insert(key.into(), value.into());
        Ok(state.snapshot())
    }

    fn snapshot_of(&self, shared: &SharedState) -> Result<Container, CoreError> {
        Ok(shared.lock().map_err(|e| poisoned(&e))?.snapshot())
    }
}

impl std::fmt::Debug for ContainerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerService")
            .field("registry", &self.registry)
            .field("default_version", &self.default_version)
            .field("default_profile", &self.default_profile)
            .field("active", &self.component.is_active())
            .finish_non_exhaustive()
    }
}
