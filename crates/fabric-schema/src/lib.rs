//! Value objects and profile definitions for Fabric.
//!
//! This crate defines the schema layer: string identities (`ContainerIdentity`,
//! `ProfileIdentity`, ...), the structured profile `Version`, immutable
//! `Profile`/`ProfileVersion`/`Container` snapshots, the polymorphic
//! `ProfileItem`, installable `Resource`s with their requirements and
//! capabilities, the runtime-type directive filter, and TOML profile
//! definition parsing (`ProfileDefinition`).

pub mod container;
pub mod definition;
pub mod profile;
pub mod resource;
pub mod runtime;
pub mod types;
pub mod version;

pub use container::{Container, CreateOptions, LifecycleState, ServiceEndpoint};
pub use definition::{
    parse_profile_file, parse_profile_str, ConfigurationSection, ProfileDefinition, ProfileError,
    ProfileSection, RequirementSection, ResourceSection,
};
pub use profile::{
    Configuration, ConfigurationItem, Profile, ProfileBuilder, ProfileItem, ProfileVersion,
    RequirementItem, ResourceItem, DEFAULT_CONFIGURATION, DELETED, EFFECTIVE_PREFIX,
};
pub use resource::{Capability, Requirement, Resource, ResourceBuilder, IDENTITY_NAMESPACE};
pub use runtime::{runtime_matches, RuntimeType, EXCLUDE_RUNTIME_TYPE, INCLUDE_RUNTIME_TYPE};
pub use types::{Attributes, ContainerIdentity, ItemIdentity, ProfileIdentity, ResourceIdentity};
pub use version::Version;
