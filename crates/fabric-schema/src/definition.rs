use crate::profile::{
    Configuration, ConfigurationItem, Profile, ProfileItem, RequirementItem, ResourceItem,
    DEFAULT_CONFIGURATION,
};
use crate::resource::{Capability, Requirement, Resource};
use crate::runtime::{EXCLUDE_RUNTIME_TYPE, INCLUDE_RUNTIME_TYPE};
use crate::types::{Attributes, ItemIdentity, ProfileIdentity};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to read profile definition: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse profile definition: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported definition_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("{0} identity must not be empty")]
    EmptyIdentity(&'static str),
    #[error("profile '{0}' lists itself as parent")]
    SelfParent(String),
    #[error("profile '{profile}' lists parent '{parent}' more than once")]
    DuplicateParent { profile: String, parent: String },
    #[error("profile '{profile}' declares item '{item}' more than once")]
    DuplicateItem { profile: String, item: String },
    #[error("invalid version '{input}': {reason}")]
    InvalidVersion { input: String, reason: String },
    #[error("profile '{0}' declares no version and none was supplied")]
    MissingVersion(String),
    #[error("invalid capability '{0}', expected '<namespace>:<name>'")]
    InvalidCapability(String),
    #[error("unknown runtime type: {0}")]
    UnknownRuntimeType(String),
}

/// On-disk TOML form of a single profile.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProfileDefinition {
    pub definition_version: u32,
    pub profile: ProfileSection,
    #[serde(default)]
    pub configuration: Vec<ConfigurationSection>,
    #[serde(default)]
    pub resource: Vec<ResourceSection>,
    #[serde(default)]
    pub requirement: Vec<RequirementSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProfileSection {
    pub id: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

/// One configuration of an item. Sections sharing an `id` form one item.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConfigurationSection {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ResourceSection {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub shared: bool,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RequirementSection {
    pub id: String,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub optional: bool,
}

pub fn parse_profile_str(input: &str) -> Result<ProfileDefinition, ProfileError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_profile_file(path: impl AsRef<Path>) -> Result<ProfileDefinition, ProfileError> {
    let content = fs::read_to_string(path)?;
    parse_profile_str(&content)
}

fn parse_namespaced(spec: &str) -> Result<(String, String), ProfileError> {
    match spec.split_once(':') {
        Some((ns, name)) if !ns.trim().is_empty() && !name.trim().is_empty() => {
            Ok((ns.trim().to_owned(), name.trim().to_owned()))
        }
        _ => Err(ProfileError::InvalidCapability(spec.to_owned())),
    }
}

impl ProfileDefinition {
    /// Convert into a validated [`Profile`]. `fallback` is used when the
    /// definition does not name its version.
    pub fn into_profile(self, fallback: Option<&Version>) -> Result<Profile, ProfileError> {
        if self.definition_version != 1 {
            return Err(ProfileError::UnsupportedVersion(self.definition_version));
        }

        let identity = self.profile.id.trim().to_owned();
        let version = match (&self.profile.version, fallback) {
            (Some(v), _) => Version::parse(v)?,
            (None, Some(v)) => v.clone(),
            (None, None) => return Err(ProfileError::MissingVersion(identity)),
        };

        let mut items: Vec<ProfileItem> = Vec::new();

        for section in self.configuration {
            let mut configuration =
                Configuration::new(section.name.as_deref().unwrap_or(DEFAULT_CONFIGURATION));
            configuration.attributes = section.attributes;
            if !section.include.is_empty() {
                configuration
                    .directives
                    .insert(INCLUDE_RUNTIME_TYPE.to_owned(), section.include.join(","));
            }
            if !section.exclude.is_empty() {
                configuration
                    .directives
                    .insert(EXCLUDE_RUNTIME_TYPE.to_owned(), section.exclude.join(","));
            }
            let existing = items.iter_mut().find_map(|item| match item {
                ProfileItem::Configuration(c) if c.id == section.id => Some(c),
                _ => None,
            });
            match existing {
                Some(item) => item.configurations.push(configuration),
                None => items.push(
                    ConfigurationItem::new(ItemIdentity::new(section.id))
                        .with_configuration(configuration)
                        .into(),
                ),
            }
        }

        for section in self.resource {
            let mut resource = Resource::new(section.name.trim(), section.version.trim());
            resource.attributes = section.attributes;
            for cap in &section.capabilities {
                let (ns, name) = parse_namespaced(cap)?;
                resource.capabilities.push(Capability::new(ns, name));
            }
            for req in &section.requirements {
                let (ns, name) = parse_namespaced(req)?;
                resource.requirements.push(Requirement::new(ns, name));
            }
            let mut item = ResourceItem::new(section.id, resource);
            item.shared = section.shared;
            item.is_abstract = section.is_abstract;
            items.push(item.into());
        }

        for section in self.requirement {
            let mut requirement = Requirement::new(section.namespace, section.name);
            requirement.optional = section.optional;
            items.push(RequirementItem::new(section.id, requirement).into());
        }

        let profile = Profile {
            identity: ProfileIdentity::new(identity),
            version,
            parents: self
                .profile
                .parents
                .iter()
                .map(|p| ProfileIdentity::new(p.trim()))
                .collect(),
            items,
            attributes: self.profile.attributes,
        };
        profile.validate()?;
        Ok(profile)
    }
}
