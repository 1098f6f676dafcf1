//! Reconciliation of a container's installed resources against its
//! effective profile.

use crate::concurrency::{LockHandle, LockMode};
use crate::events::{EventDispatcher, ProvisionEvent, ProvisionEventType, ProvisionListener};
use crate::registry::{InstalledResource, CONTAINER_SCOPE};
use crate::{poisoned, CoreError};
use fabric_provision::{ConfigurationManager, ProvisionError, Provisioner, ResourceHandle};
use fabric_schema::{ContainerIdentity, Profile, Resource, ResourceIdentity, RuntimeType};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

struct SharedEntry {
    handle: Arc<dyn ResourceHandle>,
    references: usize,
}

type SharedSlot = Arc<Mutex<Option<SharedEntry>>>;

/// Shared resources are installed once and reference counted across
/// containers.
///
/// Each identity has its own slot, so installing one shared resource never
/// waits on another. The map lock is only held to look a slot up.
#[derive(Default)]
pub(crate) struct SharedResources {
    slots: Mutex<HashMap<ResourceIdentity, SharedSlot>>,
}

impl SharedResources {
    fn slot(&self, identity: &ResourceIdentity) -> Result<SharedSlot, CoreError> {
        let mut slots = self.slots.lock().map_err(|e| poisoned(&e))?;
        Ok(Arc::clone(slots.entry(identity.clone()).or_default()))
    }

    fn existing_slot(&self, identity: &ResourceIdentity) -> Result<Option<SharedSlot>, CoreError> {
        let slots = self.slots.lock().map_err(|e| poisoned(&e))?;
        Ok(slots.get(identity).map(Arc::clone))
    }

    fn acquire(
        &self,
        provisioner: &dyn Provisioner,
        resource: &Resource,
    ) -> Result<Arc<dyn ResourceHandle>, CoreError> {
        let slot = self.slot(&resource.identity)?;
        let mut entry = slot.lock().map_err(|e| poisoned(&e))?;
        if let Some(entry) = entry.as_mut() {
            entry.references += 1;
            debug!(
                "shared resource {} now has {} references",
                resource.identity, entry.references
            );
            return Ok(Arc::clone(&entry.handle));
        }
        let handle = provisioner.install_resource(resource)?;
        *entry = Some(SharedEntry {
            handle: Arc::clone(&handle),
            references: 1,
        });
        Ok(handle)
    }

    fn release(&self, identity: &ResourceIdentity) -> Result<(), CoreError> {
        let Some(slot) = self.existing_slot(identity)? else {
            return Ok(());
        };
        let mut entry = slot.lock().map_err(|e| poisoned(&e))?;
        let Some(current) = entry.as_mut() else {
            return Ok(());
        };
        if current.references > 1 {
            current.references -= 1;
            return Ok(());
        }
        current.handle.uninstall()?;
        *entry = None;
        Ok(())
    }

    pub(crate) fn references(&self, identity: &ResourceIdentity) -> usize {
        let Ok(Some(slot)) = self.existing_slot(identity) else {
            return 0;
        };
        let references = match slot.lock() {
            Ok(entry) => entry.as_ref().map_or(0, |entry| entry.references),
            Err(_) => 0,
        };
        references
    }
}

/// Collaborators of a reconciliation pass.
pub(crate) struct Provisioning {
    pub(crate) provisioner: Arc<dyn Provisioner>,
    pub(crate) configuration: Arc<dyn ConfigurationManager>,
    pub(crate) dispatcher: Arc<EventDispatcher>,
    pub(crate) shared: SharedResources,
    pub(crate) runtime: RuntimeType,
}

impl Provisioning {
    fn require_write(proof: &LockHandle, container: &ContainerIdentity) -> Result<(), CoreError> {
        let key = format!("{CONTAINER_SCOPE}/{container}");
        if proof.covers(&key, LockMode::Write) {
            Ok(())
        } else {
            Err(CoreError::IllegalState(format!(
                "provisioning {container} requires its write lock, got {}",
                proof.key()
            )))
        }
    }

    pub(crate) fn dispatch(
        &self,
        event: &ProvisionEvent,
        listener: Option<&dyn ProvisionListener>,
    ) {
        self.dispatcher.dispatch_provision_event(event, listener);
    }

    /// Bring `installed` in line with `effective`. On failure the steps
    /// already taken stay in effect and `installed` reflects them.
    pub(crate) fn reconcile(
        &self,
        proof: &LockHandle,
        container: &ContainerIdentity,
        effective: &Profile,
        installed: &mut Vec<InstalledResource>,
        listener: Option<&dyn ProvisionListener>,
    ) -> Result<(), CoreError> {
        Self::require_write(proof, container)?;
        self.dispatch(
            &ProvisionEvent::new(
                container,
                ProvisionEventType::Provisioning,
                Some(&effective.identity),
            ),
            listener,
        );

        match self.apply(container, effective, installed) {
            Ok(()) => {
                self.dispatch(
                    &ProvisionEvent::new(
                        container,
                        ProvisionEventType::Provisioned,
                        Some(&effective.identity),
                    ),
                    listener,
                );
                Ok(())
            }
            Err(e) => {
                self.dispatch(
                    &ProvisionEvent::error(container, Some(&effective.identity), &e),
                    listener,
                );
                Err(e)
            }
        }
    }

    fn apply(
        &self,
        container: &ContainerIdentity,
        effective: &Profile,
        installed: &mut Vec<InstalledResource>,
    ) -> Result<(), CoreError> {
        for item in effective.configuration_items() {
            if let Some(attributes) = item.matching_attributes(self.runtime) {
                self.configuration.apply_configuration(&item.id, &attributes)?;
            }
        }

        let mut environment = self.provisioner.clone_environment();
        let explicit: Vec<_> = effective
            .resource_items()
            .filter(|item| !item.is_abstract)
            .collect();
        for item in &explicit {
            environment.add_fixed(item.resource.clone());
        }

        let requirements: Vec<_> = effective
            .requirement_items()
            .map(|item| item.requirement.clone())
            .collect();
        let result = self
            .provisioner
            .find_resources(&environment, &requirements)?;
        if !result.unsatisfied.is_empty() {
            return Err(ProvisionError::Unsatisfied(result.unsatisfied).into());
        }

        let mut desired: IndexMap<ResourceIdentity, (Resource, bool)> = IndexMap::new();
        for resource in result.resources {
            desired.insert(resource.identity.clone(), (resource, false));
        }
        for item in explicit {
            desired.insert(
                item.resource.identity.clone(),
                (item.resource.clone(), item.shared),
            );
        }

        // Removals first, newest install first.
        let mut index = installed.len();
        while index > 0 {
            index -= 1;
            if desired.contains_key(&installed[index].identity) {
                continue;
            }
            self.release(&installed[index])?;
            let removed = installed.remove(index);
            debug!("{container}: uninstalled {}", removed.identity);
        }

        for (identity, (resource, shared)) in desired {
            if installed.iter().any(|r| r.identity == identity) {
                continue;
            }
            let handle = if shared {
                self.shared.acquire(self.provisioner.as_ref(), &resource)?
            } else {
                self.provisioner.install_resource(&resource)?
            };
            debug!("{container}: installed {identity}");
            installed.push(InstalledResource {
                identity,
                handle,
                shared,
            });
        }

        info!(
            "{container}: provisioned {} with {} resources",
            effective.identity,
            installed.len()
        );
        Ok(())
    }

    fn release(&self, resource: &InstalledResource) -> Result<(), CoreError> {
        if resource.shared {
            self.shared.release(&resource.identity)
        } else {
            Ok(resource.handle.uninstall()?)
        }
    }

    /// Uninstall everything tracked for a container in reverse installation
    /// order and dispatch REMOVED.
    pub(crate) fn remove_all(
        &self,
        proof: &LockHandle,
        container: &ContainerIdentity,
        installed: &mut Vec<InstalledResource>,
        listener: Option<&dyn ProvisionListener>,
    ) -> Result<(), CoreError> {
        Self::require_write(proof, container)?;
        while let Some(last) = installed.last() {
            if let Err(e) = self.release(last) {
                self.dispatch(&ProvisionEvent::error(container, None, &e), listener);
                return Err(e);
            }
            installed.pop();
        }
        self.dispatch(
            &ProvisionEvent::new(container, ProvisionEventType::Removed, None),
            listener,
        );
        Ok(())
    }
}
