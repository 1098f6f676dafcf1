use crate::StoreError;
use fabric_schema::{Attributes, Profile, ProfileIdentity, ProfileVersion, Version};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Persistent store of profile versions and their profiles.
///
/// Implementations keep their own storage consistent; callers coordinate
/// concurrent logical updates with their own locks. The `profiles` set of a
/// returned [`ProfileVersion`] always reflects the profiles currently stored
/// under it; the set passed to `add_profile_version` is ignored.
pub trait ProfileRegistry: Send + Sync {
    fn versions(&self) -> Result<Vec<Version>, StoreError>;

    fn profile_version(&self, version: &Version) -> Result<Option<ProfileVersion>, StoreError>;

    fn add_profile_version(&self, version: &ProfileVersion) -> Result<(), StoreError>;

    fn remove_profile_version(&self, version: &Version) -> Result<(), StoreError>;

    fn profile(
        &self,
        version: &Version,
        identity: &ProfileIdentity,
    ) -> Result<Option<Profile>, StoreError>;

    fn add_profile(&self, profile: &Profile) -> Result<(), StoreError>;

    fn update_profile(&self, profile: &Profile) -> Result<(), StoreError>;

    fn remove_profile(&self, version: &Version, identity: &ProfileIdentity)
        -> Result<(), StoreError>;

    /// All profiles of a version, ordered by identity.
    fn profiles(&self, version: &Version) -> Result<Vec<Profile>, StoreError> {
        let pv = self
            .profile_version(version)?
            .ok_or_else(|| StoreError::VersionNotFound(version.to_string()))?;
        let mut profiles = Vec::with_capacity(pv.profiles.len());
        for identity in &pv.profiles {
            if let Some(profile) = self.profile(version, identity)? {
                profiles.push(profile);
            }
        }
        Ok(profiles)
    }
}

#[derive(Debug, Default)]
struct VersionEntry {
    attributes: Attributes,
    profiles: BTreeMap<ProfileIdentity, Profile>,
}

/// Registry held entirely in memory. Used by tests and embedded runtimes.
#[derive(Debug, Default)]
pub struct MemoryProfileRegistry {
    versions: RwLock<BTreeMap<Version, VersionEntry>>,
}

impl MemoryProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(e: &std::sync::PoisonError<T>) -> StoreError {
    StoreError::Poisoned(e.to_string())
}

impl ProfileRegistry for MemoryProfileRegistry {
    fn versions(&self) -> Result<Vec<Version>, StoreError> {
        let versions = self.versions.read().map_err(|e| poisoned(&e))?;
        Ok(versions.keys().cloned().collect())
    }

    fn profile_version(&self, version: &Version) -> Result<Option<ProfileVersion>, StoreError> {
        let versions = self.versions.read().map_err(|e| poisoned(&e))?;
        Ok(versions.get(version).map(|entry| ProfileVersion {
            version: version.clone(),
            profiles: entry.profiles.keys().cloned().collect(),
            attributes: entry.attributes.clone(),
        }))
    }

    fn add_profile_version(&self, version: &ProfileVersion) -> Result<(), StoreError> {
        let mut versions = self.versions.write().map_err(|e| poisoned(&e))?;
        if versions.contains_key(&version.version) {
            return Err(StoreError::VersionExists(version.version.to_string()));
        }
        versions.insert(
            version.version.clone(),
            VersionEntry {
                attributes: version.attributes.clone(),
                profiles: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn remove_profile_version(&self, version: &Version) -> Result<(), StoreError> {
        let mut versions = self.versions.write().map_err(|e| poisoned(&e))?;
        versions
            .remove(version)
            .map(|_| ())
            .ok_or_else(|| StoreError::VersionNotFound(version.to_string()))
    }

    fn profile(
        &self,
        version: &Version,
        identity: &ProfileIdentity,
    ) -> Result<Option<Profile>, StoreError> {
        let versions = self.versions.read().map_err(|e| poisoned(&e))?;
        let entry = versions
            .get(version)
            .ok_or_else(|| StoreError::VersionNotFound(version.to_string()))?;
        Ok(entry.profiles.get(identity).cloned())
    }

    fn add_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        let mut versions = self.versions.write().map_err(|e| poisoned(&e))?;
        let entry = versions
            .get_mut(&profile.version)
            .ok_or_else(|| StoreError::VersionNotFound(profile.version.to_string()))?;
        if entry.profiles.contains_key(&profile.identity) {
            return Err(StoreError::ProfileExists {
                version: profile.version.to_string(),
                profile: profile.identity.to_string(),
            });
        }
        entry
            .profiles
            .insert(profile.identity.clone(), profile.clone());
        Ok(())
    }

    fn update_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        let mut versions = self.versions.write().map_err(|e| poisoned(&e))?;
        let entry = versions
            .get_mut(&profile.version)
            .ok_or_else(|| StoreError::VersionNotFound(profile.version.to_string()))?;
        match entry.profiles.get_mut(&profile.identity) {
            Some(slot) => {
                *slot = profile.clone();
                Ok(())
            }
            None => Err(StoreError::ProfileNotFound {
                version: profile.version.to_string(),
                profile: profile.identity.to_string(),
            }),
        }
    }

    fn remove_profile(
        &self,
        version: &Version,
        identity: &ProfileIdentity,
    ) -> Result<(), StoreError> {
        let mut versions = self.versions.write().map_err(|e| poisoned(&e))?;
        let entry = versions
            .get_mut(version)
            .ok_or_else(|| StoreError::VersionNotFound(version.to_string()))?;
        entry
            .profiles
            .remove(identity)
            .map(|_| ())
            .ok_or_else(|| StoreError::ProfileNotFound {
                version: version.to_string(),
                profile: identity.to_string(),
            })
    }
}
