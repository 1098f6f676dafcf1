use crate::provisioner::{Environment, Provisioner, ResourceHandle};
use crate::{poisoned, ProvisionError};
use fabric_schema::{Resource, ResourceIdentity};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallAction {
    Install,
    Uninstall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallRecord {
    pub action: InstallAction,
    pub identity: ResourceIdentity,
}

/// Ordered journal of install and uninstall calls, shared with every handle.
#[derive(Debug, Clone, Default)]
pub struct InstallLog {
    records: Arc<Mutex<Vec<InstallRecord>>>,
}

impl InstallLog {
    fn push(&self, action: InstallAction, identity: &ResourceIdentity) -> Result<(), ProvisionError> {
        let mut records = self.records.lock().map_err(|e| poisoned(&e))?;
        records.push(InstallRecord {
            action,
            identity: identity.clone(),
        });
        Ok(())
    }

    pub fn records(&self) -> Vec<InstallRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn filtered(&self, action: InstallAction) -> Vec<ResourceIdentity> {
        self.records()
            .into_iter()
            .filter(|r| r.action == action)
            .map(|r| r.identity)
            .collect()
    }

    pub fn installs(&self) -> Vec<ResourceIdentity> {
        self.filtered(InstallAction::Install)
    }

    pub fn uninstalls(&self) -> Vec<ResourceIdentity> {
        self.filtered(InstallAction::Uninstall)
    }

    /// Resources installed and not yet uninstalled, replayed from the journal.
    pub fn installed(&self) -> BTreeSet<ResourceIdentity> {
        let mut installed = BTreeSet::new();
        for record in self.records() {
            match record.action {
                InstallAction::Install => installed.insert(record.identity),
                InstallAction::Uninstall => installed.remove(&record.identity),
            };
        }
        installed
    }

    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }
}

#[derive(Debug)]
struct RepositoryHandle {
    resource: Resource,
    log: InstallLog,
    uninstalled: AtomicBool,
}

impl ResourceHandle for RepositoryHandle {
    fn resource(&self) -> &Resource {
        &self.resource
    }

    fn uninstall(&self) -> Result<(), ProvisionError> {
        if self.uninstalled.swap(true, Ordering::SeqCst) {
            return Err(ProvisionError::UninstallFailed {
                identity: self.resource.identity.clone(),
                reason: "already uninstalled".to_owned(),
            });
        }
        debug!("uninstalled {}", self.resource.identity);
        self.log.push(InstallAction::Uninstall, &self.resource.identity)
    }
}

/// Provisioner backed by an in-memory resource repository.
///
/// Installs only record themselves in the [`InstallLog`]. Individual
/// resources can be marked to fail on install.
#[derive(Debug, Default)]
pub struct RepositoryProvisioner {
    environment: RwLock<Environment>,
    log: InstallLog,
    failing: Mutex<BTreeSet<ResourceIdentity>>,
}

impl RepositoryProvisioner {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment: RwLock::new(environment),
            ..Self::default()
        }
    }

    pub fn with_resources(resources: impl IntoIterator<Item = Resource>) -> Self {
        let mut environment = Environment::new("repository");
        for resource in resources {
            environment.add_resource(resource);
        }
        Self::new(environment)
    }

    pub fn add_resource(&self, resource: Resource) -> Result<(), ProvisionError> {
        let mut environment = self.environment.write().map_err(|e| poisoned(&e))?;
        environment.add_resource(resource);
        Ok(())
    }

    pub fn log(&self) -> &InstallLog {
        &self.log
    }

    pub fn fail_install(&self, identity: impl Into<ResourceIdentity>) -> Result<(), ProvisionError> {
        let mut failing = self.failing.lock().map_err(|e| poisoned(&e))?;
        failing.insert(identity.into());
        Ok(())
    }
}

impl Provisioner for RepositoryProvisioner {
    fn clone_environment(&self) -> Environment {
        self.environment
            .read()
            .map(|env| env.clone())
            .unwrap_or_default()
    }

    fn install_resource(
        &self,
        resource: &Resource,
    ) -> Result<Arc<dyn ResourceHandle>, ProvisionError> {
        let failing = self.failing.lock().map_err(|e| poisoned(&e))?;
        if failing.contains(&resource.identity) {
            return Err(ProvisionError::InstallFailed {
                identity: resource.identity.clone(),
                reason: "install rejected by repository".to_owned(),
            });
        }
        drop(failing);

        self.log.push(InstallAction::Install, &resource.identity)?;
        debug!("installed {}", resource.identity);
        Ok(Arc::new(RepositoryHandle {
            resource: resource.clone(),
            log: self.log.clone(),
            uninstalled: AtomicBool::new(false),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_schema::Requirement;

    fn provisioner() -> RepositoryProvisioner {
        RepositoryProvisioner::with_resources([
            Resource::new("r1", "1.0.0"),
            Resource::new("r2", "1.0.0"),
        ])
    }

    #[test]
    fn install_and_uninstall_are_journaled() {
        let p = provisioner();
        let handle = p.install_resource(&Resource::new("r1", "1.0.0")).unwrap();
        assert_eq!(handle.identity().as_str(), "r1:1.0.0");
        handle.uninstall().unwrap();
        let records = p.log().records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].action, InstallAction::Install);
        assert_eq!(records[1].action, InstallAction::Uninstall);
        assert!(p.log().installed().is_empty());
    }

    #[test]
    fn double_uninstall_fails() {
        let p = provisioner();
        let handle = p.install_resource(&Resource::new("r1", "1.0.0")).unwrap();
        handle.uninstall().unwrap();
        assert!(matches!(
            handle.uninstall(),
            Err(ProvisionError::UninstallFailed { .. })
        ));
    }

    #[test]
    fn injected_install_failure() {
        let p = provisioner();
        p.fail_install("r2:1.0.0").unwrap();
        assert!(p.install_resource(&Resource::new("r2", "1.0.0")).is_err());
        assert!(p.log().installs().is_empty());
    }

    #[test]
    fn find_resources_uses_repository() {
        let p = provisioner();
        let env = p.clone_environment();
        let result = p
            .find_resources(&env, &[Requirement::identity("r2")])
            .unwrap();
        assert_eq!(result.resources[0].identity.as_str(), "r2:1.0.0");
    }

    #[test]
    fn content_builder_records_digest() {
        let p = provisioner();
        let resource = p.content_resource_builder("blob", "1.0.0", b"hello").build();
        assert_eq!(
            resource.attributes.get(fabric_schema::resource::CONTENT_SIZE_ATTRIBUTE),
            Some(&"5".to_owned())
        );
    }
}
