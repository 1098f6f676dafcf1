use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current store format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";
const VERSION_DOCUMENT: &str = "version.json";

/// Directory layout for the file-backed profile registry.
///
/// ```text
/// <root>/store/version                         format marker
/// <root>/store/.lock                           registry write lock
/// <root>/store/versions/<v>/version.json       profile version document
/// <root>/store/versions/<v>/profiles/<id>.json profile documents
/// ```
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    #[inline]
    pub fn versions_dir(&self) -> PathBuf {
        self.store_dir().join("versions")
    }

    #[inline]
    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.versions_dir().join(version)
    }

    #[inline]
    pub fn version_document(&self, version: &str) -> PathBuf {
        self.version_dir(version).join(VERSION_DOCUMENT)
    }

    #[inline]
    pub fn profiles_dir(&self, version: &str) -> PathBuf {
        self.version_dir(version).join("profiles")
    }

    #[inline]
    pub fn profile_path(&self, version: &str, profile: &str) -> PathBuf {
        self.profiles_dir(version).join(format!("{profile}.json"))
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.store_dir().join(".lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.versions_dir())?;

        let version_path = self.store_dir().join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            write_atomic(&self.store_dir(), &version_path, content.as_bytes())?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.store_dir().join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: StoreVersion = serde_json::from_str(&content)?;

        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}

/// Write `content` to `dest` through a temp file in `dir`, then fsync the directory.
pub(crate) fn write_atomic(dir: &Path, dest: &Path, content: &[u8]) -> Result<(), StoreError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    crate::fsync_dir(dir)?;
    Ok(())
}
