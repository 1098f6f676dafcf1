use crate::types::{Attributes, ContainerIdentity, ProfileIdentity, ResourceIdentity};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Created,
    Started,
    Stopped,
    Destroyed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Created => write!(f, "created"),
            LifecycleState::Started => write!(f, "started"),
            LifecycleState::Stopped => write!(f, "stopped"),
            LifecycleState::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// A named endpoint a container exposes, e.g. an HTTP or management URL.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub identity: String,
    pub url: String,
}

impl ServiceEndpoint {
    pub fn new(identity: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            url: url.into(),
        }
    }
}

/// Immutable snapshot of a container, as returned by every container operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub identity: ContainerIdentity,
    pub parent: Option<ContainerIdentity>,
    pub children: BTreeSet<ContainerIdentity>,
    pub state: LifecycleState,
    pub profile_version: Option<Version>,
    pub profiles: Vec<ProfileIdentity>,
    pub endpoints: BTreeSet<ServiceEndpoint>,
    pub attributes: Attributes,
    /// Installed resources in installation order.
    pub installed: Vec<ResourceIdentity>,
    pub created_at: String,
}

impl Container {
    pub fn is_started(&self) -> bool {
        self.state == LifecycleState::Started
    }

    pub fn has_profile(&self, profile: &str) -> bool {
        self.profiles.iter().any(|p| p == profile)
    }
}

/// Parameters for creating a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOptions {
    pub identity: ContainerIdentity,
    pub parent: Option<ContainerIdentity>,
    pub profile_version: Option<Version>,
    pub profiles: Vec<ProfileIdentity>,
    pub attributes: Attributes,
}

impl CreateOptions {
    pub fn new(identity: impl Into<ContainerIdentity>) -> Self {
        Self {
            identity: identity.into(),
            parent: None,
            profile_version: None,
            profiles: Vec::new(),
            attributes: Attributes::new(),
        }
    }

    #[must_use]
    pub fn parent(mut self, parent: impl Into<ContainerIdentity>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    #[must_use]
    pub fn profile_version(mut self, version: Version) -> Self {
        self.profile_version = Some(version);
        self
    }

    #[must_use]
    pub fn profile(mut self, profile: impl Into<ProfileIdentity>) -> Self {
        self.profiles.push(profile.into());
        self
    }

    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
