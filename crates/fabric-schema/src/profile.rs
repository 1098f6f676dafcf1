use crate::definition::ProfileError;
use crate::resource::{Requirement, Resource};
use crate::runtime::{runtime_matches, RuntimeType};
use crate::types::{Attributes, ItemIdentity, ProfileIdentity};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Configuration value that removes an inherited key during the effective merge.
pub const DELETED: &str = "#deleted#";

/// Name of the configuration used when an item declares only one.
pub const DEFAULT_CONFIGURATION: &str = "default";

/// Prefix of synthesized effective profile identities.
pub const EFFECTIVE_PREFIX: &str = "effective#";

/// One named set of configuration attributes, selected by runtime directives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub name: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub directives: Attributes,
}

impl Configuration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Attributes::new(),
            directives: Attributes::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_directive(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.directives.insert(key.into(), value.into());
        self
    }

    pub fn matches_runtime(&self, runtime: RuntimeType) -> bool {
        runtime_matches(&self.directives, runtime)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationItem {
    pub id: ItemIdentity,
    pub configurations: Vec<Configuration>,
}

impl ConfigurationItem {
    pub fn new(id: impl Into<ItemIdentity>) -> Self {
        Self {
            id: id.into(),
            configurations: Vec::new(),
        }
    }

    /// Item with a single default configuration holding `attributes`.
    pub fn with_attributes(id: impl Into<ItemIdentity>, attributes: Attributes) -> Self {
        let mut configuration = Configuration::new(DEFAULT_CONFIGURATION);
        configuration.attributes = attributes;
        Self {
            id: id.into(),
            configurations: vec![configuration],
        }
    }

    #[must_use]
    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configurations.push(configuration);
        self
    }

    pub fn configuration(&self, name: &str) -> Option<&Configuration> {
        self.configurations.iter().find(|c| c.name == name)
    }

    /// Attributes of the default configuration, or an empty map.
    pub fn default_attributes(&self) -> Attributes {
        self.configuration(DEFAULT_CONFIGURATION)
            .map(|c| c.attributes.clone())
            .unwrap_or_default()
    }

    /// Attributes of every configuration matching `runtime`, merged in
    /// declaration order. `None` when no configuration applies.
    pub fn matching_attributes(&self, runtime: RuntimeType) -> Option<Attributes> {
        let mut merged: Option<Attributes> = None;
        for configuration in self
            .configurations
            .iter()
            .filter(|c| c.matches_runtime(runtime))
        {
            merged
                .get_or_insert_with(Attributes::new)
                .extend(configuration.attributes.clone());
        }
        merged
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceItem {
    pub id: ItemIdentity,
    pub resource: Resource,
    /// Installed once and shared by every container that references it.
    #[serde(default)]
    pub shared: bool,
    /// Abstract items only describe a resource; they are never installed directly.
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
}

impl ResourceItem {
    pub fn new(id: impl Into<ItemIdentity>, resource: Resource) -> Self {
        Self {
            id: id.into(),
            resource,
            shared: false,
            is_abstract: false,
        }
    }

    #[must_use]
    pub fn shared(mut self) -> Self {
        self.shared = true;
        self
    }

    #[must_use]
    pub fn abstract_only(mut self) -> Self {
        self.is_abstract = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementItem {
    pub id: ItemIdentity,
    pub requirement: Requirement,
}

impl RequirementItem {
    pub fn new(id: impl Into<ItemIdentity>, requirement: Requirement) -> Self {
        Self {
            id: id.into(),
            requirement,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProfileItem {
    Configuration(ConfigurationItem),
    Resource(ResourceItem),
    Requirement(RequirementItem),
}

impl ProfileItem {
    pub fn id(&self) -> &ItemIdentity {
        match self {
            ProfileItem::Configuration(item) => &item.id,
            ProfileItem::Resource(item) => &item.id,
            ProfileItem::Requirement(item) => &item.id,
        }
    }

    pub fn as_configuration(&self) -> Option<&ConfigurationItem> {
        match self {
            ProfileItem::Configuration(item) => Some(item),
            _ => None,
        }
    }

    pub fn as_resource(&self) -> Option<&ResourceItem> {
        match self {
            ProfileItem::Resource(item) => Some(item),
            _ => None,
        }
    }

    pub fn as_requirement(&self) -> Option<&RequirementItem> {
        match self {
            ProfileItem::Requirement(item) => Some(item),
            _ => None,
        }
    }
}

impl From<ConfigurationItem> for ProfileItem {
    fn from(item: ConfigurationItem) -> Self {
        ProfileItem::Configuration(item)
    }
}

impl From<ResourceItem> for ProfileItem {
    fn from(item: ResourceItem) -> Self {
        ProfileItem::Resource(item)
    }
}

impl From<RequirementItem> for ProfileItem {
    fn from(item: RequirementItem) -> Self {
        ProfileItem::Requirement(item)
    }
}

/// Immutable snapshot of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub identity: ProfileIdentity,
    pub version: Version,
    #[serde(default)]
    pub parents: Vec<ProfileIdentity>,
    #[serde(default)]
    pub items: Vec<ProfileItem>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Profile {
    pub fn builder(identity: impl Into<ProfileIdentity>) -> ProfileBuilder {
        ProfileBuilder::new(identity)
    }

    pub fn item(&self, id: &str) -> Option<&ProfileItem> {
        self.items.iter().find(|i| i.id() == id)
    }

    pub fn configuration_items(&self) -> impl Iterator<Item = &ConfigurationItem> {
        self.items.iter().filter_map(ProfileItem::as_configuration)
    }

    pub fn resource_items(&self) -> impl Iterator<Item = &ResourceItem> {
        self.items.iter().filter_map(ProfileItem::as_resource)
    }

    pub fn requirement_items(&self) -> impl Iterator<Item = &RequirementItem> {
        self.items.iter().filter_map(ProfileItem::as_requirement)
    }

    pub fn is_effective(&self) -> bool {
        self.identity.starts_with(EFFECTIVE_PREFIX)
    }

    /// Structural checks that need no other profile: non-empty identity,
    /// no self-parent, no duplicate parents or item identities.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.identity.trim().is_empty() {
            return Err(ProfileError::EmptyIdentity("profile"));
        }
        let mut seen_parents = HashSet::new();
        for parent in &self.parents {
            if *parent == self.identity {
                return Err(ProfileError::SelfParent(self.identity.to_string()));
            }
            if !seen_parents.insert(parent) {
                return Err(ProfileError::DuplicateParent {
                    profile: self.identity.to_string(),
                    parent: parent.to_string(),
                });
            }
        }
        let mut seen_items = HashSet::new();
        for item in &self.items {
            if item.id().trim().is_empty() {
                return Err(ProfileError::EmptyIdentity("profile item"));
            }
            if !seen_items.insert(item.id()) {
                return Err(ProfileError::DuplicateItem {
                    profile: self.identity.to_string(),
                    item: item.id().to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Builder for [`Profile`]; `build` runs [`Profile::validate`].
#[derive(Debug, Clone)]
pub struct ProfileBuilder {
    profile: Profile,
}

impl ProfileBuilder {
    pub fn new(identity: impl Into<ProfileIdentity>) -> Self {
        Self {
            profile: Profile {
                identity: identity.into(),
                version: Version::default(),
                parents: Vec::new(),
                items: Vec::new(),
                attributes: Attributes::new(),
            },
        }
    }

    /// Start from an existing profile, e.g. to produce an update.
    pub fn from_profile(profile: Profile) -> Self {
        Self { profile }
    }

    #[must_use]
    pub fn version(mut self, version: Version) -> Self {
        self.profile.version = version;
        self
    }

    #[must_use]
    pub fn parent(mut self, parent: impl Into<ProfileIdentity>) -> Self {
        self.profile.parents.push(parent.into());
        self
    }

    #[must_use]
    pub fn item(mut self, item: impl Into<ProfileItem>) -> Self {
        self.profile.items.push(item.into());
        self
    }

    /// Replace the item with the same identity, or append it.
    #[must_use]
    pub fn replace_item(mut self, item: impl Into<ProfileItem>) -> Self {
        let item = item.into();
        if let Some(slot) = self.profile.items.iter_mut().find(|i| i.id() == item.id()) {
            *slot = item;
        } else {
            self.profile.items.push(item);
        }
        self
    }

    #[must_use]
    pub fn remove_item(mut self, id: &str) -> Self {
        self.profile.items.retain(|i| i.id() != id);
        self
    }

    /// Set one key in the default configuration of item `id`, creating the
    /// item if needed.
    #[must_use]
    pub fn configuration(
        mut self,
        id: impl Into<ItemIdentity>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let id = id.into();
        let (key, value) = (key.into(), value.into());
        let existing = self.profile.items.iter_mut().find_map(|i| match i {
            ProfileItem::Configuration(c) if c.id == id => Some(c),
            _ => None,
        });
        match existing {
            Some(item) => {
                if let Some(c) = item
                    .configurations
                    .iter_mut()
                    .find(|c| c.name == DEFAULT_CONFIGURATION)
                {
                    c.attributes.insert(key, value);
                } else {
                    item.configurations
                        .push(Configuration::new(DEFAULT_CONFIGURATION).with_attribute(key, value));
                }
                self
            }
            None => {
                let mut attributes = Attributes::new();
                attributes.insert(key, value);
                self.item(ConfigurationItem::with_attributes(id, attributes))
            }
        }
    }

    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.profile.attributes.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<Profile, ProfileError> {
        self.profile.validate()?;
        Ok(self.profile)
    }
}

/// Immutable snapshot of a profile version and the profiles it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileVersion {
    pub version: Version,
    #[serde(default)]
    pub profiles: BTreeSet<ProfileIdentity>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl ProfileVersion {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            profiles: BTreeSet::new(),
            attributes: Attributes::new(),
        }
    }

    pub fn contains(&self, profile: &str) -> bool {
        self.profiles.iter().any(|p| p == profile)
    }
}
