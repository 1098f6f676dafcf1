//! Wiring of the services into a running [`Fabric`].

use crate::config::FabricConfig;
use crate::containers::{ContainerService, ContainerServiceDeps};
use crate::events::EventDispatcher;
use crate::profiles::ProfileService;
use crate::registry::ContainerRegistry;
use crate::CoreError;
use fabric_provision::{
    ConfigurationManager, MemoryConfigurationManager, Provisioner, RepositoryProvisioner,
};
use fabric_schema::{Container, CreateOptions, LifecycleState, Profile, ProfileVersion};
use fabric_store::{FileProfileRegistry, MemoryProfileRegistry, ProfileRegistry};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Default)]
pub struct FabricBuilder {
    config: FabricConfig,
    registry: Option<Arc<dyn ProfileRegistry>>,
    provisioner: Option<Arc<dyn Provisioner>>,
    configuration: Option<Arc<dyn ConfigurationManager>>,
    dispatcher: Option<Arc<EventDispatcher>>,
}

impl FabricBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config(mut self, config: FabricConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn ProfileRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use a file-backed registry rooted at `root`.
    pub fn store(self, root: &Path) -> Result<Self, CoreError> {
        let registry = FileProfileRegistry::open(root)?;
        Ok(self.registry(Arc::new(registry)))
    }

    #[must_use]
    pub fn provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    #[must_use]
    pub fn configuration_manager(mut self, configuration: Arc<dyn ConfigurationManager>) -> Self {
        self.configuration = Some(configuration);
        self
    }

    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Arc<EventDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn build(self) -> Result<Fabric, CoreError> {
        self.config.validate()?;
        let timeout = self.config.lock_timeout();
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(MemoryProfileRegistry::new()));
        let provisioner = self
            .provisioner
            .unwrap_or_else(|| Arc::new(RepositoryProvisioner::default()));
        let configuration = self
            .configuration
            .unwrap_or_else(|| Arc::new(MemoryConfigurationManager::new()));
        let dispatcher = self.dispatcher.unwrap_or_default();

        let containers = Arc::new(ContainerRegistry::new(timeout));
        let profiles = Arc::new(ProfileService::new(
            registry,
            Arc::clone(&containers),
            Arc::clone(&dispatcher),
            timeout,
        ));
        let container_service = ContainerService::new(ContainerServiceDeps {
            registry: containers,
            profiles: Arc::clone(&profiles),
            provisioner,
            configuration,
            dispatcher: Arc::clone(&dispatcher),
            runtime: self.config.runtime_type,
            default_version: self.config.default_version()?,
            default_profile: self.config.default_profile(),
        });

        Ok(Fabric {
            config: self.config,
            profiles,
            containers: Arc::new(container_service),
            dispatcher,
        })
    }
}

/// A profile service and container service sharing one lock space and one
/// event dispatcher.
#[derive(Debug)]
pub struct Fabric {
    config: FabricConfig,
    profiles: Arc<ProfileService>,
    containers: Arc<ContainerService>,
    dispatcher: Arc<EventDispatcher>,
}

impl Fabric {
    pub fn builder() -> FabricBuilder {
        FabricBuilder::new()
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn profiles(&self) -> &Arc<ProfileService> {
        &self.profiles
    }

    pub fn containers(&self) -> &Arc<ContainerService> {
        &self.containers
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Activate the services, make sure the default version and profile
    /// exist, then create and start the current container.
    pub fn start(&self) -> Result<Container, CoreError> {
        self.profiles.activate();
        self.containers.activate();

        let version = self.config.default_version()?;
        let profile_id = self.config.default_profile();
        if self
            .profiles
            .get_versions()?
            .iter()
            .all(|v| *v != version)
        {
            self.profiles
                .add_profile_version(ProfileVersion::new(version.clone()), Vec::new())?;
        }
        if !self.profiles.get_profile_version(&version)?.contains(&profile_id) {
            let profile = Profile::builder(profile_id.clone())
                .version(version.clone())
                .build()?;
            self.profiles.add_profile(profile)?;
        }

        let identity = self.config.current_container();
        if !self.containers.get_containers()?.iter().any(|c| c.identity == identity) {
            self.containers.create_container(
                CreateOptions::new(identity.clone())
                    .profile_version(version)
                    .profile(profile_id),
            )?;
        }
        let current = self.containers.get_container(&identity)?;
        let current = if current.state == LifecycleState::Started {
            current
        } else {
            self.containers.start_container(&identity, None)?
        };
        self.containers.set_current_container(identity)?;
        info!("fabric started with current container {}", current.identity);
        Ok(current)
    }

    pub fn stop(&self) {
        self.containers.deactivate();
        self.profiles.deactivate();
        info!("fabric stopped");
    }
}
