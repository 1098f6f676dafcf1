use super::{
    json_pretty, parse_version, spin_fail, spin_ok, spinner, Context, EXIT_FAILURE, EXIT_SUCCESS,
};
use fabric_core::{Fabric, ProvisionEvent, ProvisionListener};
use fabric_provision::{ConfigurationManager, MemoryConfigurationManager, RepositoryProvisioner};
use fabric_schema::{Attributes, ContainerIdentity, CreateOptions, ProfileIdentity, RuntimeType};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<ProvisionEvent>>,
}

impl ProvisionListener for EventLog {
    fn on_provision_event(&self, event: &ProvisionEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[derive(Debug, Serialize)]
struct DryRunReport {
    container: ContainerIdentity,
    effective_profile: Option<ProfileIdentity>,
    installed: Vec<String>,
    configuration: BTreeMap<String, Attributes>,
    events: Vec<ProvisionEvent>,
    error: Option<String>,
}

/// Provision a throwaway container against an in-memory repository holding
/// every resource declared in the version, then tear it down again.
pub fn run(
    ctx: &Context,
    version: &str,
    profiles: &[String],
    runtime: Option<&str>,
) -> Result<u8, String> {
    let version = parse_version(version)?;
    let mut config = ctx.config.clone();
    if let Some(runtime) = runtime {
        config.runtime_type = runtime
            .parse::<RuntimeType>()
            .map_err(|e| format!("profile error: {e}"))?;
    }

    // The repository offers every resource any profile of the version declares.
    let catalog = ctx
        .fabric()?
        .profiles()
        .get_profiles(&version)
        .map_err(|e| e.to_string())?
        .into_iter()
        .flat_map(|p| {
            p.resource_items()
                .map(|item| item.resource.clone())
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    let provisioner = Arc::new(RepositoryProvisioner::with_resources(catalog));
    let configuration = Arc::new(MemoryConfigurationManager::new());
    let fabric = Fabric::builder()
        .config(config)
        .store(&ctx.store)
        .map_err(|e| e.to_string())?
        .provisioner(provisioner.clone())
        .configuration_manager(configuration.clone())
        .build()
        .map_err(|e| e.to_string())?;
    fabric.start().map_err(|e| e.to_string())?;

    let pb = if ctx.json {
        None
    } else {
        Some(spinner("provisioning dry-run container..."))
    };
    let containers = fabric.containers();
    let identity = ContainerIdentity::new("dry-run");
    let mut options = CreateOptions::new(identity.clone()).profile_version(version);
    for profile in profiles {
        options = options.profile(profile.as_str());
    }
    containers
        .create_container(options)
        .map_err(|e| e.to_string())?;

    let log = EventLog::default();
    let outcome = containers.start_container(&identity, Some(&log));
    let container = containers
        .get_container(&identity)
        .map_err(|e| e.to_string())?;
    let effective = containers
        .get_effective_profile(&identity)
        .ok()
        .map(|p| p.identity);

    let report = DryRunReport {
        container: identity.clone(),
        effective_profile: effective,
        installed: container.installed.iter().map(ToString::to_string).collect(),
        configuration: configuration
            .targets()
            .into_iter()
            .filter_map(|t| configuration.configuration(&t).map(|a| (t, a)))
            .collect(),
        events: Vec::new(),
        error: outcome.as_ref().err().map(ToString::to_string),
    };
    containers
        .destroy_container(&identity, Some(&log))
        .map_err(|e| e.to_string())?;
    let report = DryRunReport {
        events: log.events.lock().map(|e| e.clone()).unwrap_or_default(),
        ..report
    };

    if let Some(ref pb) = pb {
        if report.error.is_some() {
            spin_fail(pb, "provisioning failed");
        } else {
            spin_ok(pb, "provisioning succeeded");
        }
    }
    if ctx.json {
        println!("{}", json_pretty(&report)?);
    } else {
        if let Some(effective) = &report.effective_profile {
            println!("effective profile: {effective}");
        }
        for resource in &report.installed {
            println!("install   {resource}");
        }
        for (target, attributes) in &report.configuration {
            println!("configure {target}");
            for (key, value) in attributes {
                println!("  {key} = {value}");
            }
        }
        if let Some(error) = &report.error {
            eprintln!("error: {error}");
        }
    }
    Ok(if report.error.is_some() {
        EXIT_FAILURE
    } else {
        EXIT_SUCCESS
    })
}
