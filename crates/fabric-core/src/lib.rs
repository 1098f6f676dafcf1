//! Container and profile orchestration core for Fabric.
//!
//! This crate ties the schema, registry and provisioning layers together:
//! the per-identity `LockManager`, the `ProfileService` that owns profile
//! versions and computes effective (merged) profiles across the parent DAG,
//! the `ContainerRegistry` of mutable container state, and the
//! `ContainerService` that drives the container lifecycle and reconciles each
//! container's installed resources against its effective profile. `Fabric`
//! wires everything from a `FabricConfig`.

pub mod bootstrap;
pub mod concurrency;
pub mod config;
pub mod containers;
pub mod effective;
pub mod events;
pub mod lifecycle;
pub mod profiles;
mod provision;
pub mod registry;

pub use bootstrap::{Fabric, FabricBuilder};
pub use concurrency::{
    assert_read_lock, assert_write_lock, LockHandle, LockManager, LockMode, DEFAULT_LOCK_TIMEOUT,
};
pub use config::FabricConfig;
pub use containers::ContainerService;
pub use effective::{effective_identity, effective_identity_for, LinkedProfile};
pub use events::{
    EventDispatcher, ProfileEvent, ProfileEventType, ProfileListener, ProvisionEvent,
    ProvisionEventType, ProvisionLatch, ProvisionListener,
};
pub use lifecycle::{validate_transition, ComponentState};
pub use profiles::ProfileService;
pub use registry::{ContainerRegistry, ContainerState, InstalledResource};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("profile error: {0}")]
    Schema(#[from] fabric_schema::ProfileError),
    #[error("store error: {0}")]
    Store(#[from] fabric_store::StoreError),
    #[error("provisioning error: {0}")]
    Provision(#[from] fabric_provision::ProvisionError),
    #[error("invalid state transition for '{identity}': {from} -> {to}")]
    InvalidTransition {
        identity: String,
        from: String,
        to: String,
    },
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("container not found: {0}")]
    ContainerNotFound(String),
    #[error("profile version not found: {0}")]
    VersionNotFound(String),
    #[error("profile '{profile}' not found in version {version}")]
    ProfileNotFound { version: String, profile: String },
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("timed out after {timeout_ms}ms waiting for {mode} lock on {key}")]
    LockTimeout {
        key: String,
        mode: &'static str,
        timeout_ms: u128,
    },
    #[error("component '{0}' is not active")]
    Inactive(&'static str),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Whether the error reports a missing entity rather than a failed check.
    pub fn is_not_found(&self) -> bool {
        match self {
            CoreError::ContainerNotFound(_)
            | CoreError::VersionNotFound(_)
            | CoreError::ProfileNotFound { .. } => true,
            CoreError::Store(e) => e.is_not_found(),
            _ => false,
        }
    }
}

pub(crate) fn poisoned<T>(e: &std::sync::PoisonError<T>) -> CoreError {
    CoreError::IllegalState(format!("state poisoned: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_classification() {
        assert!(CoreError::ContainerNotFound("cntA".into()).is_not_found());
        assert!(CoreError::Store(fabric_store::StoreError::VersionNotFound("1.0.0".into()))
            .is_not_found());
        assert!(!CoreError::IllegalState("in use".into()).is_not_found());
        assert!(!CoreError::AlreadyExists("cntA".into()).is_not_found());
    }

    #[test]
    fn transition_error_names_container() {
        let e = CoreError::InvalidTransition {
            identity: "cntA".into(),
            from: "destroyed".into(),
            to: "started".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("cntA"));
        assert!(msg.contains("destroyed -> started"));
    }
}
