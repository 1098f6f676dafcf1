use crate::types::{Attributes, ResourceIdentity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace of the capability every resource provides for its own symbolic name.
pub const IDENTITY_NAMESPACE: &str = "identity";

/// Attribute carrying the blake3 digest of a content resource.
pub const CONTENT_DIGEST_ATTRIBUTE: &str = "content.digest";

/// Attribute carrying the byte length of a content resource.
pub const CONTENT_SIZE_ATTRIBUTE: &str = "content.size";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Capability {
    pub namespace: String,
    pub name: String,
}

impl Capability {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

/// Something a profile or a resource needs from the provisioning environment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Requirement {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub optional: bool,
}

impl Requirement {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            optional: false,
        }
    }

    /// Requirement on a resource with the given symbolic name.
    pub fn identity(name: impl Into<String>) -> Self {
        Self::new(IDENTITY_NAMESPACE, name)
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn matches(&self, capability: &Capability) -> bool {
        self.namespace == capability.namespace && self.name == capability.name
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)?;
        if self.optional {
            f.write_str(" (optional)")?;
        }
        Ok(())
    }
}

/// An installable unit known to the provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub identity: ResourceIdentity,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Resource {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            identity: ResourceIdentity::from_parts(name, version),
            capabilities: Vec::new(),
            requirements: Vec::new(),
            attributes: Attributes::new(),
        }
    }

    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    #[must_use]
    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn symbolic_name(&self) -> &str {
        self.identity.symbolic_name()
    }

    /// Whether this resource satisfies the requirement, either through its
    /// implicit identity capability or a declared one.
    pub fn provides(&self, requirement: &Requirement) -> bool {
        if requirement.namespace == IDENTITY_NAMESPACE && requirement.name == self.symbolic_name()
        {
            return true;
        }
        self.capabilities.iter().any(|c| requirement.matches(c))
    }
}

/// Builds a resource whose payload is a blob of content.
///
/// Only the digest and size of the content are kept on the resource; the
/// bytes themselves stay with whoever installs them.
#[derive(Debug, Clone)]
pub struct ResourceBuilder {
    resource: Resource,
}

impl ResourceBuilder {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            resource: Resource::new(name, version),
        }
    }

    #[must_use]
    pub fn content(mut self, content: &[u8]) -> Self {
        let digest = blake3::hash(content).to_hex().to_string();
        self.resource
            .attributes
            .insert(CONTENT_DIGEST_ATTRIBUTE.to_owned(), digest);
        self.resource
            .attributes
            .insert(CONTENT_SIZE_ATTRIBUTE.to_owned(), content.len().to_string());
        self
    }

    #[must_use]
    pub fn capability(mut self, capability: Capability) -> Self {
        self.resource.capabilities.push(capability);
        self
    }

    #[must_use]
    pub fn requirement(mut self, requirement: Requirement) -> Self {
        self.resource.requirements.push(requirement);
        self
    }

    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.resource.attributes.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Resource {
        self.resource
    }
}
