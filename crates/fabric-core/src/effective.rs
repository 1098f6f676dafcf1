//! Effective profile computation.
//!
//! A profile's parents form a DAG. [`linearize`] walks it depth first in
//! declared parent order and emits every profile exactly once, parents before
//! children. [`merge`] then folds the items of the linearized profiles keyed
//! by item identity, keeping the order in which each identity first appeared.

use crate::CoreError;
use fabric_schema::{
    Attributes, Configuration, ConfigurationItem, ItemIdentity, Profile, ProfileIdentity,
    ProfileItem, Version, DELETED, EFFECTIVE_PREFIX,
};
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Identity of the effective view of a single profile.
pub fn effective_identity(profile: &ProfileIdentity) -> ProfileIdentity {
    ProfileIdentity::new(format!("{EFFECTIVE_PREFIX}{profile}"))
}

/// Identity of the effective profile of a container's profile list.
pub fn effective_identity_for(version: &Version, profiles: &[ProfileIdentity]) -> ProfileIdentity {
    let joined = profiles
        .iter()
        .map(ProfileIdentity::as_str)
        .collect::<Vec<_>>()
        .join(",");
    ProfileIdentity::new(format!("{EFFECTIVE_PREFIX}{version}[{joined}]"))
}

/// Order `roots` and all their ancestors so that each profile comes after
/// all of its parents. Roots are visited in the given order.
pub fn linearize<'a>(
    profiles: &'a BTreeMap<ProfileIdentity, Profile>,
    version: &Version,
    roots: &[ProfileIdentity],
) -> Result<Vec<&'a Profile>, CoreError> {
    let mut order = Vec::new();
    let mut visited: HashSet<&ProfileIdentity> = HashSet::new();
    let mut in_progress: HashSet<&ProfileIdentity> = HashSet::new();

    for root in roots {
        if visited.contains(root) {
            continue;
        }
        let profile = profiles
            .get(root)
            .ok_or_else(|| CoreError::ProfileNotFound {
                version: version.to_string(),
                profile: root.to_string(),
            })?;
        in_progress.insert(&profile.identity);
        let mut stack: Vec<(&Profile, usize)> = vec![(profile, 0)];

        while let Some(top) = stack.last_mut() {
            let current = top.0;
            if top.1 < current.parents.len() {
                let parent_id = &current.parents[top.1];
                top.1 += 1;
                if visited.contains(parent_id) {
                    continue;
                }
                if in_progress.contains(parent_id) {
                    return Err(CoreError::IllegalState(format!(
                        "inheritance cycle in version {version}: '{}' -> '{parent_id}'",
                        current.identity
                    )));
                }
                let parent = profiles
                    .get(parent_id)
                    .ok_or_else(|| CoreError::ProfileNotFound {
                        version: version.to_string(),
                        profile: parent_id.to_string(),
                    })?;
                in_progress.insert(&parent.identity);
                stack.push((parent, 0));
            } else {
                stack.pop();
                in_progress.remove(&current.identity);
                visited.insert(&current.identity);
                order.push(current);
            }
        }
    }
    Ok(order)
}

/// Fold linearized profiles into one effective profile named `identity`.
pub fn merge(identity: ProfileIdentity, version: &Version, linearized: &[&Profile]) -> Profile {
    let mut items: IndexMap<ItemIdentity, ProfileItem> = IndexMap::new();
    let mut attributes = Attributes::new();

    for profile in linearized {
        merge_attributes(&mut attributes, &profile.attributes);
        for item in &profile.items {
            match items.get_mut(item.id()) {
                Some(existing) => merge_item(existing, item),
                None => {
                    items.insert(item.id().clone(), strip_deleted(item.clone()));
                }
            }
        }
    }

    Profile {
        identity,
        version: version.clone(),
        parents: Vec::new(),
        items: items.into_values().collect(),
        attributes,
    }
}

fn merge_attributes(target: &mut Attributes, overlay: &Attributes) {
    for (key, value) in overlay {
        if value == DELETED {
            target.remove(key);
        } else {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn merge_item(existing: &mut ProfileItem, overlay: &ProfileItem) {
    match (existing, overlay) {
        (ProfileItem::Configuration(base), ProfileItem::Configuration(child)) => {
            merge_configuration_item(base, child);
        }
        (slot, _) => *slot = strip_deleted(overlay.clone()),
    }
}

fn merge_configuration_item(base: &mut ConfigurationItem, child: &ConfigurationItem) {
    for configuration in &child.configurations {
        match base
            .configurations
            .iter_mut()
            .find(|c| c.name == configuration.name)
        {
            Some(target) => {
                merge_attributes(&mut target.attributes, &configuration.attributes);
                target.directives.extend(configuration.directives.clone());
            }
            None => base.configurations.push(strip_configuration(configuration.clone())),
        }
    }
}

fn strip_configuration(mut configuration: Configuration) -> Configuration {
    configuration.attributes.retain(|_, v| v != DELETED);
    configuration
}

fn strip_deleted(item: ProfileItem) -> ProfileItem {
    match item {
        ProfileItem::Configuration(mut config) => {
            config.configurations = config
                .configurations
                .into_iter()
                .map(strip_configuration)
                .collect();
            ProfileItem::Configuration(config)
        }
        other => other,
    }
}

/// A profile together with its resolved parents.
///
/// Parents reached through several paths are shared, not copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedProfile {
    profile: Profile,
    parents: Vec<Arc<LinkedProfile>>,
}

impl LinkedProfile {
    /// Build the linked structure from a linearization and return the node
    /// for `identity`.
    pub fn link(linearized: &[&Profile], identity: &ProfileIdentity) -> Option<Arc<LinkedProfile>> {
        let mut built: HashMap<&ProfileIdentity, Arc<LinkedProfile>> = HashMap::new();
        for profile in linearized {
            let parents = profile
                .parents
                .iter()
                .filter_map(|p| built.get(p).cloned())
                .collect();
            built.insert(
                &profile.identity,
                Arc::new(LinkedProfile {
                    profile: (*profile).clone(),
                    parents,
                }),
            );
        }
        built.remove(identity)
    }

    pub fn identity(&self) -> &ProfileIdentity {
        &self.profile.identity
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn parents(&self) -> &[Arc<LinkedProfile>] {
        &self.parents
    }

    /// This profile and every ancestor, parents first, each exactly once.
    pub fn lineage(&self) -> Vec<&Profile> {
        let mut order = Vec::new();
        let mut visited: HashSet<&ProfileIdentity> = HashSet::new();
        let mut stack: Vec<(&LinkedProfile, usize)> = vec![(self, 0)];
        while let Some(top) = stack.last_mut() {
            let current = top.0;
            if let Some(parent) = current.parents.get(top.1) {
                top.1 += 1;
                if !visited.contains(parent.identity()) {
                    stack.push((parent.as_ref(), 0));
                }
            } else {
                stack.pop();
                if visited.insert(current.identity()) {
                    order.push(&current.profile);
                }
            }
        }
        order
    }

    pub fn effective_profile(&self) -> Profile {
        merge(
            effective_identity(self.identity()),
            &self.profile.version,
            &self.lineage(),
        )
    }
}
