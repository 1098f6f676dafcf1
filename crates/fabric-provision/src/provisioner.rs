use crate::ProvisionError;
use fabric_schema::{Requirement, Resource, ResourceBuilder, ResourceIdentity};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// An installed resource. Dropping the handle does not uninstall it.
pub trait ResourceHandle: Send + Sync + fmt::Debug {
    fn resource(&self) -> &Resource;

    fn uninstall(&self) -> Result<(), ProvisionError>;

    fn identity(&self) -> &ResourceIdentity {
        &self.resource().identity
    }
}

/// The set of resources a resolution may draw from.
///
/// Fixed resources are already part of the target and satisfy requirements
/// before any repository resource is considered.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    name: String,
    resources: Vec<Resource>,
    fixed: Vec<Resource>,
}

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.add_resource(resource);
        self
    }

    pub fn add_resource(&mut self, resource: Resource) {
        if !self.resources.iter().any(|r| r.identity == resource.identity) {
            self.resources.push(resource);
        }
    }

    pub fn add_fixed(&mut self, resource: Resource) {
        if !self.fixed.iter().any(|r| r.identity == resource.identity) {
            self.fixed.push(resource);
        }
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn fixed(&self) -> &[Resource] {
        &self.fixed
    }

    pub fn is_fixed(&self, identity: &ResourceIdentity) -> bool {
        self.fixed.iter().any(|r| &r.identity == identity)
    }
}

/// Outcome of resolving requirements against an [`Environment`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProvisionResult {
    /// Repository resources selected to satisfy the requirements, in
    /// resolution order. Fixed resources are not repeated here.
    pub resources: Vec<Resource>,
    /// Mandatory requirements no resource provides.
    pub unsatisfied: Vec<Requirement>,
}

impl ProvisionResult {
    pub fn is_satisfied(&self) -> bool {
        self.unsatisfied.is_empty()
    }
}

pub trait Provisioner: Send + Sync {
    /// A private copy of the provisioning environment for one reconciliation.
    fn clone_environment(&self) -> Environment;

    fn find_resources(
        &self,
        environment: &Environment,
        requirements: &[Requirement],
    ) -> Result<ProvisionResult, ProvisionError> {
        Ok(crate::resolver::resolve(environment, requirements))
    }

    fn install_resource(&self, resource: &Resource)
        -> Result<Arc<dyn ResourceHandle>, ProvisionError>;

    fn content_resource_builder(&self, name: &str, version: &str, content: &[u8]) -> ResourceBuilder {
        ResourceBuilder::new(name, version).content(content)
    }
}
