//! Profile registry persistence for Fabric.
//!
//! This crate provides the storage layer behind profile versions and profiles:
//! the `ProfileRegistry` CRUD contract, an in-memory `MemoryProfileRegistry`,
//! and a file-backed `FileProfileRegistry` that keeps one checksummed JSON
//! document per profile under a versioned `StoreLayout`, writes atomically and
//! serializes writers across processes with a `RegistryLock`.

pub mod files;
pub mod layout;
pub mod lock;
pub mod registry;

pub use files::FileProfileRegistry;
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use lock::RegistryLock;
pub use registry::{MemoryProfileRegistry, ProfileRegistry};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// POSIX does not guarantee a rename is durable until the parent directory
/// itself has been synced.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("integrity check failed for '{path}': expected {expected}, got {actual}")]
    IntegrityFailure {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("profile version not found: {0}")]
    VersionNotFound(String),
    #[error("profile version already exists: {0}")]
    VersionExists(String),
    #[error("profile '{profile}' not found in version {version}")]
    ProfileNotFound { version: String, profile: String },
    #[error("profile '{profile}' already exists in version {version}")]
    ProfileExists { version: String, profile: String },
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid profile name: {0}")]
    InvalidName(String),
    #[error("registry state poisoned: {0}")]
    Poisoned(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::VersionNotFound(_) | StoreError::ProfileNotFound { .. }
        )
    }
}
