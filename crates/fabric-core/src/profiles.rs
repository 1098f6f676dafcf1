use crate::concurrency::{LockHandle, LockManager, LockMode};
use crate::effective::{self, effective_identity, effective_identity_for, LinkedProfile};
use crate::events::{EventDispatcher, ProfileEvent, ProfileEventType, ProfileListener};
use crate::lifecycle::ComponentState;
use crate::registry::ContainerRegistry;
use crate::CoreError;
use fabric_schema::{LifecycleState, Profile, ProfileIdentity, ProfileVersion, Version};
use fabric_store::{ProfileRegistry, StoreError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const VERSION_SCOPE: &str = "version";

/// Working copy of a profile version, loaded under the version lock and used
/// to validate cross references before anything is written.
#[derive(Debug, Clone)]
pub struct ProfileVersionState {
    pub version: ProfileVersion,
    pub profiles: BTreeMap<ProfileIdentity, Profile>,
}

impl ProfileVersionState {
    fn load(registry: &dyn ProfileRegistry, version: &Version) -> Result<Self, CoreError> {
        let pv = registry
            .profile_version(version)?
            .ok_or_else(|| CoreError::VersionNotFound(version.to_string()))?;
        let profiles = registry
            .profiles(version)?
            .into_iter()
            .map(|p| (p.identity.clone(), p))
            .collect();
        Ok(Self {
            version: pv,
            profiles,
        })
    }

    fn from_profiles(version: ProfileVersion, profiles: &[Profile]) -> Self {
        Self {
            version,
            profiles: profiles
                .iter()
                .map(|p| (p.identity.clone(), p.clone()))
                .collect(),
        }
    }

    fn version(&self) -> &Version {
        &self.version.version
    }

    fn require(&self, identity: &ProfileIdentity) -> Result<&Profile, CoreError> {
        self.profiles
            .get(identity)
            .ok_or_else(|| CoreError::ProfileNotFound {
                version: self.version().to_string(),
                profile: identity.to_string(),
            })
    }

    /// Check that `profile` fits this version: matching version, parents
    /// present, and no inheritance cycle through it.
    fn validate(&self, profile: &Profile) -> Result<(), CoreError> {
        profile.validate()?;
        if profile.is_effective() {
            return Err(CoreError::IllegalState(format!(
                "effective profile '{}' cannot be stored",
                profile.identity
            )));
        }
        if profile.version != *self.version() {
            return Err(CoreError::IllegalState(format!(
                "profile '{}' has version {}, expected {}",
                profile.identity,
                profile.version,
                self.version()
            )));
        }
        for parent in &profile.parents {
            if !self.profiles.contains_key(parent) {
                return Err(CoreError::IllegalState(format!(
                    "parent '{parent}' of profile '{}' does not exist in version {}",
                    profile.identity,
                    self.version()
                )));
            }
        }
        effective::linearize(&self.profiles, self.version(), &[profile.identity.clone()])?;
        Ok(())
    }

    /// Profiles listing `identity` as a direct parent.
    fn children_of(&self, identity: &ProfileIdentity) -> Vec<&ProfileIdentity> {
        self.profiles
            .values()
            .filter(|p| p.parents.contains(identity))
            .map(|p| &p.identity)
            .collect()
    }

    fn snapshot(&self) -> ProfileVersion {
        ProfileVersion {
            version: self.version.version.clone(),
            profiles: self.profiles.keys().cloned().collect(),
            attributes: self.version.attributes.clone(),
        }
    }
}

/// Owns profile versions and profiles and computes effective profiles.
///
/// Every operation takes the lock of the version it touches: reads share it,
/// writes hold it exclusively while validating and storing.
pub struct ProfileService {
    registry: Arc<dyn ProfileRegistry>,
    containers: Arc<ContainerRegistry>,
    dispatcher: Arc<EventDispatcher>,
    locks: LockManager<Version>,
    component: ComponentState,
}

impl ProfileService {
    pub fn new(
        registry: Arc<dyn ProfileRegistry>,
        containers: Arc<ContainerRegistry>,
        dispatcher: Arc<EventDispatcher>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            containers,
            dispatcher,
            locks: LockManager::new(VERSION_SCOPE, lock_timeout),
            component: ComponentState::new("profile-service"),
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

    pub fn locks(&self) -> &LockManager<Version> {
        &self.locks
    }

    pub fn acquire_profile_version_lock(
        &self,
        version: &Version,
        write: bool,
    ) -> Result<LockHandle, CoreError> {
        self.component.check()?;
        self.locks.acquire_lock(version, write)
    }

    pub fn add_profile_version(
        &self,
        version: ProfileVersion,
        profiles: Vec<Profile>,
    ) -> Result<ProfileVersion, CoreError> {
        self.component.check()?;
        let _lock = self.locks.acquire_write_lock(&version.version)?;
        if self.registry.profile_version(&version.version)?.is_some() {
            return Err(CoreError::AlreadyExists(format!(
                "profile version {}",
                version.version
            )));
        }

        let state = ProfileVersionState::from_profiles(version.clone(), &profiles);
        if state.profiles.len() != profiles.len() {
            return Err(CoreError::IllegalState(format!(
                "duplicate profile identity in version {}",
                version.version
            )));
        }
        for profile in &profiles {
            state.validate(profile)?;
        }

        self.registry.add_profile_version(&version)?;
        for profile in &profiles {
            self.registry.add_profile(profile)?;
        }
        info!(
            "added profile version {} with {} profiles",
            version.version,
            profiles.len()
        );
        Ok(state.snapshot())
    }

    pub fn remove_profile_version(&self, version: &Version) -> Result<ProfileVersion, CoreError> {
        self.component.check()?;
        let _lock = self.locks.acquire_write_lock(version)?;
        let state = ProfileVersionState::load(self.registry.as_ref(), version)?;

        let users: Vec<String> = self
            .containers
            .snapshots()?
            .into_iter()
            .filter(|c| c.state != LifecycleState::Destroyed)
            .filter(|c| c.profile_version.as_ref() == Some(version))
            .map(|c| c.identity.into_inner())
            .collect();
        if !users.is_empty() {
            return Err(CoreError::IllegalState(format!(
                "profile version {version} is in use by containers: {}",
                users.join(", ")
            )));
        }

        self.registry.remove_profile_version(version)?;
        info!("removed profile version {version}");
        Ok(state.snapshot())
    }

    pub fn get_versions(&self) -> Result<Vec<Version>, CoreError> {
        self.component.check()?;
        Ok(self.registry.versions()?)
    }

    pub fn get_profile_version(&self, version: &Version) -> Result<ProfileVersion, CoreError> {
        self.component.check()?;
        let _lock = self.locks.acquire_read_lock(version)?;
        self.registry
            .profile_version(version)?
            .ok_or_else(|| CoreError::VersionNotFound(version.to_string()))
    }

    pub fn add_profile(&self, profile: Profile) -> Result<Profile, CoreError> {
        self.component.check()?;
        let _lock = self.locks.acquire_write_lock(&profile.version)?;
        let state = ProfileVersionState::load(self.registry.as_ref(), &profile.version)?;
        if state.profiles.contains_key(&profile.identity) {
            return Err(CoreError::AlreadyExists(format!(
                "profile '{}' in version {}",
                profile.identity, profile.version
            )));
        }
        let mut candidate = state;
        candidate
            .profiles
            .insert(profile.identity.clone(), profile.clone());
        candidate.validate(&profile)?;

        self.registry.add_profile(&profile)?;
        info!("added profile {} to version {}", profile.identity, profile.version);
        Ok(profile)
    }

    /// Replace a profile wholesale. Dispatches [`ProfileEventType::Updated`].
    pub fn update_profile(
        &self,
        profile: Profile,
        listener: Option<&dyn ProfileListener>,
    ) -> Result<Profile, CoreError> {
        self.component.check()?;
        let _lock = self.locks.acquire_write_lock(&profile.version)?;
        let mut state = ProfileVersionState::load(self.registry.as_ref(), &profile.version)?;
        state.require(&profile.identity)?;
        state
            .profiles
            .insert(profile.identity.clone(), profile.clone());
        state.validate(&profile)?;

        if let Err(e) = self.registry.update_profile(&profile) {
            self.dispatch(&profile, ProfileEventType::Error, Some(e.to_string()), listener);
            return Err(e.into());
        }
        info!("updated profile {} in version {}", profile.identity, profile.version);
        self.dispatch(&profile, ProfileEventType::Updated, None, listener);
        Ok(profile)
    }

    pub fn remove_profile(
        &self,
        version: &Version,
        identity: &ProfileIdentity,
    ) -> Result<Profile, CoreError> {
        self.component.check()?;
        let _lock = self.locks.acquire_write_lock(version)?;
        let state = ProfileVersionState::load(self.registry.as_ref(), version)?;
        let profile = state.require(identity)?.clone();

        let children = state.children_of(identity);
        if !children.is_empty() {
            let names: Vec<&str> = children.iter().map(|c| c.as_str()).collect();
            return Err(CoreError::IllegalState(format!(
                "profile '{identity}' is a parent of: {}",
                names.join(", ")
            )));
        }

        let users: Vec<String> = self
            .containers
            .snapshots()?
            .into_iter()
            .filter(|c| c.profile_version.as_ref() == Some(version) && c.has_profile(identity))
            .map(|c| c.identity.into_inner())
            .collect();
        if !users.is_empty() {
            return Err(CoreError::IllegalState(format!(
                "profile '{identity}' is in use by containers: {}",
                users.join(", ")
            )));
        }

        self.registry.remove_profile(version, identity)?;
        info!("removed profile {identity} from version {version}");
        Ok(profile)
    }

    pub fn get_profile(
        &self,
        version: &Version,
        identity: &ProfileIdentity,
    ) -> Result<Profile, CoreError> {
        self.component.check()?;
        let _lock = self.locks.acquire_read_lock(version)?;
        match self.registry.profile(version, identity) {
            Ok(Some(profile)) => Ok(profile),
            Ok(None) => Err(CoreError::ProfileNotFound {
                version: version.to_string(),
                profile: identity.to_string(),
            }),
            Err(StoreError::VersionNotFound(_)) => {
                Err(CoreError::VersionNotFound(version.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_profiles(&self, version: &Version) -> Result<Vec<Profile>, CoreError> {
        self.component.check()?;
        let _lock = self.locks.acquire_read_lock(version)?;
        let state = ProfileVersionState::load(self.registry.as_ref(), version)?;
        Ok(state.profiles.into_values().collect())
    }

    pub fn get_linked_profile(
        &self,
        version: &Version,
        identity: &ProfileIdentity,
    ) -> Result<Arc<LinkedProfile>, CoreError> {
        self.component.check()?;
        let _lock = self.locks.acquire_read_lock(version)?;
        let state = ProfileVersionState::load(self.registry.as_ref(), version)?;
        let order = effective::linearize(&state.profiles, version, std::slice::from_ref(identity))?;
        LinkedProfile::link(&order, identity).ok_or_else(|| CoreError::ProfileNotFound {
            version: version.to_string(),
            profile: identity.to_string(),
        })
    }

    /// The transitive effective view of one profile, `effective#<id>`.
    pub fn get_effective_profile(
        &self,
        version: &Version,
        identity: &ProfileIdentity,
    ) -> Result<Profile, CoreError> {
        self.component.check()?;
        let _lock = self.locks.acquire_read_lock(version)?;
        let state = ProfileVersionState::load(self.registry.as_ref(), version)?;
        let order = effective::linearize(&state.profiles, version, std::slice::from_ref(identity))?;
        Ok(effective::merge(effective_identity(identity), version, &order))
    }

    /// The effective profile of a container's profile list,
    /// `effective#<version>[<ids>]`.
    pub fn get_effective_profile_for(
        &self,
        version: &Version,
        identities: &[ProfileIdentity],
    ) -> Result<Profile, CoreError> {
        self.component.check()?;
        let _lock = self.locks.acquire_read_lock(version)?;
        let state = ProfileVersionState::load(self.registry.as_ref(), version)?;
        let order = effective::linearize(&state.profiles, version, identities)?;
        debug!(
            "effective profile for {identities:?} in {version} merges {} profiles",
            order.len()
        );
        Ok(effective::merge(
            effective_identity_for(version, identities),
            version,
            &order,
        ))
    }

    /// Identities of `identities` and all their ancestors, parents first.
    pub fn lineage(
        &self,
        version: &Version,
        identities: &[ProfileIdentity],
    ) -> Result<Vec<ProfileIdentity>, CoreError> {
        self.component.check()?;
        let _lock = self.locks.acquire_read_lock(version)?;
        let state = ProfileVersionState::load(self.registry.as_ref(), version)?;
        let order = effective::linearize(&state.profiles, version, identities)?;
        Ok(order.into_iter().map(|p| p.identity.clone()).collect())
    }

    /// Check that `version` exists and holds every profile in `identities`.
    /// The caller must hold the version lock.
    pub fn check_assignment(
        &self,
        proof: &LockHandle,
        version: &Version,
        identities: &[ProfileIdentity],
    ) -> Result<(), CoreError> {
        self.locks.check_handle(proof, version, LockMode::Read)?;
        let pv = self
            .registry
            .profile_version(version)?
            .ok_or_else(|| CoreError::VersionNotFound(version.to_string()))?;
        for identity in identities {
            if !pv.profiles.contains(identity) {
                return Err(CoreError::ProfileNotFound {
                    version: version.to_string(),
                    profile: identity.to_string(),
                });
            }
        }
        Ok(())
    }

    fn dispatch(
        &self,
        profile: &Profile,
        event_type: ProfileEventType,
        error: Option<String>,
        listener: Option<&dyn ProfileListener>,
    ) {
        let event = ProfileEvent {
            version: profile.version.clone(),
            profile: profile.identity.clone(),
            event_type,
            error,
        };
        self.dispatcher.dispatch_profile_event(&event, listener);
    }
}

impl std::fmt::Debug for ProfileService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileService")
            .field("locks", &self.locks)
            .field("active", &self.component.is_active())
            .finish_non_exhaustive()
    }
}
