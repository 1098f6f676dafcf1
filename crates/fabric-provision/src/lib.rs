//! Provisioning contracts for Fabric containers.
//!
//! This crate defines the collaborators the container service drives during
//! reconciliation: the `Provisioner` (environment cloning, requirement
//! resolution, resource installation), the `ResourceHandle` returned for each
//! installed resource, and the `ConfigurationManager` that applies merged
//! configuration to named targets. It also ships in-memory implementations
//! (`RepositoryProvisioner`, `MemoryConfigurationManager`) used by tests, the
//! CLI dry run and embedded runtimes.

pub mod configuration;
pub mod provisioner;
pub mod repository;
pub mod resolver;

pub use configuration::{ConfigurationManager, MemoryConfigurationManager};
pub use provisioner::{Environment, ProvisionResult, Provisioner, ResourceHandle};
pub use repository::{InstallAction, InstallLog, InstallRecord, RepositoryProvisioner};
pub use resolver::resolve;

use fabric_schema::{Requirement, ResourceIdentity};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("unsatisfied requirements: {}", format_requirements(.0))]
    Unsatisfied(Vec<Requirement>),
    #[error("failed to install resource '{identity}': {reason}")]
    InstallFailed {
        identity: ResourceIdentity,
        reason: String,
    },
    #[error("failed to uninstall resource '{identity}': {reason}")]
    UninstallFailed {
        identity: ResourceIdentity,
        reason: String,
    },
    #[error("failed to apply configuration '{target}': {reason}")]
    Configuration { target: String, reason: String },
    #[error("provisioner state poisoned: {0}")]
    Poisoned(String),
}

fn format_requirements(requirements: &[Requirement]) -> String {
    requirements
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn poisoned<T>(e: &std::sync::PoisonError<T>) -> ProvisionError {
    ProvisionError::Poisoned(e.to_string())
}
