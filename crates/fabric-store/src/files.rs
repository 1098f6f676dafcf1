use crate::layout::{write_atomic, StoreLayout};
use crate::lock::RegistryLock;
use crate::registry::ProfileRegistry;
use crate::StoreError;
use fabric_schema::{Attributes, Profile, ProfileIdentity, ProfileVersion, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionDocument {
    version: Version,
    #[serde(default)]
    attributes: Attributes,
    created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfileDocument {
    profile: Profile,
    updated_at: String,
    /// blake3 checksum over the document with this field unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

impl ProfileDocument {
    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

/// Profile names end up as file names, so they must stay inside the store.
fn validate_profile_name(identity: &str) -> Result<(), StoreError> {
    if identity.is_empty() || identity.len() > 128 {
        return Err(StoreError::InvalidName(format!(
            "'{identity}': profile name must be 1-128 characters"
        )));
    }
    if identity.starts_with('.') || identity.contains(['/', '\\']) {
        return Err(StoreError::InvalidName(format!(
            "'{identity}': profile name must not start with '.' or contain path separators"
        )));
    }
    Ok(())
}

/// Registry keeping one JSON document per profile under a [`StoreLayout`].
///
/// Every document is written through a temp file and renamed into place, so
/// readers never observe a partial write. Writers serialize on the store-level
/// [`RegistryLock`].
pub struct FileProfileRegistry {
    layout: StoreLayout,
}

impl FileProfileRegistry {
    /// Open (and initialize if needed) the registry rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let layout = StoreLayout::new(root.as_ref());
        layout.initialize()?;
        Ok(Self { layout })
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    fn lock(&self) -> Result<RegistryLock, StoreError> {
        RegistryLock::acquire(&self.layout.lock_file())
    }

    fn read_version(&self, version: &str) -> Result<Option<VersionDocument>, StoreError> {
        let path = self.layout.version_document(version);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn read_profile(&self, path: &Path) -> Result<Profile, StoreError> {
        let content = fs::read_to_string(path)?;
        let doc: ProfileDocument = serde_json::from_str(&content)?;

        if let Some(ref expected) = doc.checksum {
            let actual = doc.compute_checksum()?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    path: path.display().to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(doc.profile)
    }

    fn write_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        let version = profile.version.to_string();
        let dir = self.layout.profiles_dir(&version);
        fs::create_dir_all(&dir)?;

        let mut doc = ProfileDocument {
            profile: profile.clone(),
            updated_at: chrono::Utc::now().to_rfc3339(),
            checksum: None,
        };
        doc.checksum = Some(doc.compute_checksum()?);
        let content = serde_json::to_string_pretty(&doc)?;
        write_atomic(
            &dir,
            &self.layout.profile_path(&version, &profile.identity),
            content.as_bytes(),
        )
    }

    fn profile_identities(&self, version: &str) -> Result<BTreeSet<ProfileIdentity>, StoreError> {
        let dir = self.layout.profiles_dir(version);
        let mut identities = BTreeSet::new();
        if !dir.exists() {
            return Ok(identities);
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name_str = name.to_str().unwrap_or("");
            if let Some(identity) = name_str.strip_suffix(".json") {
                if !identity.starts_with('.') {
                    identities.insert(ProfileIdentity::new(identity));
                }
            }
        }
        Ok(identities)
    }

    fn require_version(&self, version: &str) -> Result<(), StoreError> {
        if self.layout.version_document(version).exists() {
            Ok(())
        } else {
            Err(StoreError::VersionNotFound(version.to_owned()))
        }
    }
}

impl ProfileRegistry for FileProfileRegistry {
    fn versions(&self) -> Result<Vec<Version>, StoreError> {
        let dir = self.layout.versions_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name_str = name.to_str().unwrap_or("");
            match self.read_version(name_str) {
                Ok(Some(doc)) => versions.push(doc.version),
                Ok(None) => debug!("skipping version directory without document: {name_str}"),
                Err(e) => warn!("skipping corrupted version entry '{name_str}': {e}"),
            }
        }
        versions.sort();
        Ok(versions)
    }

    fn profile_version(&self, version: &Version) -> Result<Option<ProfileVersion>, StoreError> {
        let key = version.to_string();
        let Some(doc) = self.read_version(&key)? else {
            return Ok(None);
        };
        Ok(Some(ProfileVersion {
            version: doc.version,
            profiles: self.profile_identities(&key)?,
            attributes: doc.attributes,
        }))
    }

    fn add_profile_version(&self, version: &ProfileVersion) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        let key = version.version.to_string();
        if self.layout.version_document(&key).exists() {
            return Err(StoreError::VersionExists(key));
        }
        let dir = self.layout.version_dir(&key);
        fs::create_dir_all(self.layout.profiles_dir(&key))?;
        let doc = VersionDocument {
            version: version.version.clone(),
            attributes: version.attributes.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let content = serde_json::to_string_pretty(&doc)?;
        write_atomic(&dir, &self.layout.version_document(&key), content.as_bytes())?;
        debug!("stored profile version {key}");
        Ok(())
    }

    fn remove_profile_version(&self, version: &Version) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        let key = version.to_string();
        self.require_version(&key)?;
        fs::remove_dir_all(self.layout.version_dir(&key))?;
        crate::fsync_dir(&self.layout.versions_dir())?;
        debug!("removed profile version {key}");
        Ok(())
    }

    fn profile(
        &self,
        version: &Version,
        identity: &ProfileIdentity,
    ) -> Result<Option<Profile>, StoreError> {
        let key = version.to_string();
        self.require_version(&key)?;
        validate_profile_name(identity)?;
        let path = self.layout.profile_path(&key, identity);
        if !path.exists() {
            return Ok(None);
        }
        self.read_profile(&path).map(Some)
    }

    fn add_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        validate_profile_name(&profile.identity)?;
        let _lock = self.lock()?;
        let key = profile.version.to_string();
        self.require_version(&key)?;
        if self.layout.profile_path(&key, &profile.identity).exists() {
            return Err(StoreError::ProfileExists {
                version: key,
                profile: profile.identity.to_string(),
            });
        }
        self.write_profile(profile)
    }

    fn update_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        validate_profile_name(&profile.identity)?;
        let _lock = self.lock()?;
        let key = profile.version.to_string();
        self.require_version(&key)?;
        if !self.layout.profile_path(&key, &profile.identity).exists() {
            return Err(StoreError::ProfileNotFound {
                version: key,
                profile: profile.identity.to_string(),
            });
        }
        self.write_profile(profile)
    }

    fn remove_profile(
        &self,
        version: &Version,
        identity: &ProfileIdentity,
    ) -> Result<(), StoreError> {
        validate_profile_name(identity)?;
        let _lock = self.lock()?;
        let key = version.to_string();
        self.require_version(&key)?;
        let path = self.layout.profile_path(&key, identity);
        if !path.exists() {
            return Err(StoreError::ProfileNotFound {
                version: key,
                profile: identity.to_string(),
            });
        }
        fs::remove_file(&path)?;
        crate::fsync_dir(&self.layout.profiles_dir(&key))?;
        Ok(())
    }
}
