use fabric_core::{
    ContainerService, CoreError, Fabric, FabricConfig, ProfileEvent, ProfileEventType, ProfileListener,
    ProvisionEvent, ProvisionEventType, ProvisionLatch, ProvisionListener,
};
use fabric_provision::{
    ConfigurationManager, InstallAction, MemoryConfigurationManager, RepositoryProvisioner,
};
use fabric_schema::{
    ContainerIdentity, CreateOptions, LifecycleState, Profile, ProfileIdentity, ProfileVersion,
    Requirement, RequirementItem, Resource, ResourceIdentity, ResourceItem, RuntimeType, Version,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Harness {
    fabric: Fabric,
    provisioner: Arc<RepositoryProvisioner>,
    configuration: Arc<MemoryConfigurationManager>,
}

fn harness_with(resources: Vec<Resource>, config: FabricConfig) -> Harness {
    let provisioner = Arc::new(RepositoryProvisioner::with_resources(resources));
    let configuration = Arc::new(MemoryConfigurationManager::new());
    let fabric = Fabric::builder()
        .config(config)
        .provisioner(provisioner.clone())
        .configuration_manager(configuration.clone())
        .build()
        .unwrap();
    fabric.start().unwrap();
    Harness {
        fabric,
        provisioner,
        configuration,
    }
}

fn harness() -> Harness {
    harness_with(
        Vec::new(),
        FabricConfig {
            lock_timeout_ms: 2_000,
            ..FabricConfig::default()
        },
    )
}

fn v12() -> Version {
    Version::parse("1.2").unwrap()
}

fn res(name: &str) -> Resource {
    Resource::new(name, "1.0.0")
}

fn rid(name: &str) -> ResourceIdentity {
    res(name).identity
}

fn profile_with_resources(id: &str, resources: &[&str]) -> Profile {
    let mut builder = Profile::builder(id).version(v12());
    for name in resources {
        builder = builder.item(ResourceItem::new(format!("bundle.{name}"), res(name)));
    }
    builder.build().unwrap()
}

fn cid(id: &str) -> ContainerIdentity {
    ContainerIdentity::new(id)
}

fn pid(id: &str) -> ProfileIdentity {
    ProfileIdentity::new(id)
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<ProvisionEvent>>,
}

impl Recorder {
    fn types_for(&self, container: &str) -> Vec<ProvisionEventType> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.container == container)
            .map(|e| e.event_type)
            .collect()
    }
}

impl ProvisionListener for Recorder {
    fn on_provision_event(&self, event: &ProvisionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[derive(Default)]
struct ProfileRecorder {
    events: Mutex<Vec<ProfileEvent>>,
}

impl ProfileListener for ProfileRecorder {
    fn on_profile_event(&self, event: &ProfileEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[test]
fn start_creates_default_version_and_current_container() {
    let h = harness();
    let containers = h.fabric.containers();
    let root = containers.current_container().unwrap().unwrap();
    assert_eq!(root.identity, "root");
    assert_eq!(root.state, LifecycleState::Started);
    assert_eq!(root.profile_version, Some(Version::new(1, 0, 0)));
    assert!(root.has_profile("default"));

    let versions = h.fabric.profiles().get_versions().unwrap();
    assert_eq!(versions, vec![Version::new(1, 0, 0)]);

    // Restarting is idempotent.
    let again = h.fabric.start().unwrap();
    assert_eq!(again.identity, "root");
    assert_eq!(h.fabric.profiles().get_versions().unwrap().len(), 1);
}

#[test]
fn reconciliation_uninstalls_before_installing() {
    let h = harness();
    let profiles = h.fabric.profiles();
    let containers = h.fabric.containers();
    profiles
        .add_profile_version(
            ProfileVersion::new(v12()),
            vec![profile_with_resources("prfA", &["r1", "r2", "r3"])],
        )
        .unwrap();

    containers
        .create_container(
            CreateOptions::new("cntA")
                .profile_version(v12())
                .profile("prfA"),
        )
        .unwrap();
    let started = containers.start_container(&cid("cntA"), None).unwrap();
    assert_eq!(started.installed, vec![rid("r1"), rid("r2"), rid("r3")]);

    h.provisioner.log().clear();
    containers
        .update_profile(profile_with_resources("prfA", &["r2", "r3", "r4"]), None)
        .unwrap();

    let records = h.provisioner.log().records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].action, InstallAction::Uninstall);
    assert_eq!(records[0].identity, rid("r1"));
    assert_eq!(records[1].action, InstallAction::Install);
    assert_eq!(records[1].identity, rid("r4"));

    let cnt = containers.get_container(&cid("cntA")).unwrap();
    assert_eq!(cnt.installed, vec![rid("r2"), rid("r3"), rid("r4")]);
}

#[test]
fn reconciliation_uninstalls_stale_resources_newest_first() {
    let h = harness();
    h.fabric
        .profiles()
        .add_profile_version(
            ProfileVersion::new(v12()),
            vec![profile_with_resources("prfA", &["r1", "r2", "r3"])],
        )
        .unwrap();
    let containers = h.fabric.containers();
    containers
        .create_container(CreateOptions::new("cntA").profile_version(v12()).profile("prfA"))
        .unwrap();
    containers.start_container(&cid("cntA"), None).unwrap();

    h.provisioner.log().clear();
    containers
        .update_profile(profile_with_resources("prfA", &["r3", "r4"]), None)
        .unwrap();

    assert_eq!(h.provisioner.log().uninstalls(), vec![rid("r2"), rid("r1")]);
    let actions: Vec<(InstallAction, ResourceIdentity)> = h
        .provisioner
        .log()
        .records()
        .into_iter()
        .map(|r| (r.action, r.identity))
        .collect();
    assert_eq!(
        actions,
        vec![
            (InstallAction::Uninstall, rid("r2")),
            (InstallAction::Uninstall, rid("r1")),
            (InstallAction::Install, rid("r4")),
        ]
    );
    let cnt = containers.get_container(&cid("cntA")).unwrap();
    assert_eq!(cnt.installed, vec![rid("r3"), rid("r4")]);
}

/// Records what an unlocked listing reports while provisioning is underway.
struct InstalledDuringProvisioning {
    containers: Arc<ContainerService>,
    seen: Mutex<Vec<Vec<ResourceIdentity>>>,
}

impl ProvisionListener for InstalledDuringProvisioning {
    fn on_provision_event(&self, event: &ProvisionEvent) {
        if event.event_type != ProvisionEventType::Provisioning {
            return;
        }
        let listed = self.containers.get_containers().unwrap();
        let cnt = listed.into_iter().find(|c| c.identity == event.container).unwrap();
        self.seen.lock().unwrap().push(cnt.installed);
    }
}

#[test]
fn listing_mid_reconciliation_shows_previous_resources() {
    let h = harness();
    h.fabric
        .profiles()
        .add_profile_version(
            ProfileVersion::new(v12()),
            vec![profile_with_resources("prfA", &["r1", "r2"])],
        )
        .unwrap();
    let containers = h.fabric.containers();
    containers
        .create_container(CreateOptions::new("cntA").profile_version(v12()).profile("prfA"))
        .unwrap();
    containers.start_container(&cid("cntA"), None).unwrap();

    let listener = InstalledDuringProvisioning {
        containers: Arc::clone(containers),
        seen: Mutex::new(Vec::new()),
    };
    containers
        .update_profile(profile_with_resources("prfA", &["r2", "r3"]), Some(&listener))
        .unwrap();

    let seen = listener.seen.lock().unwrap();
    assert_eq!(*seen, vec![vec![rid("r1"), rid("r2")]]);
    let cnt = containers.get_container(&cid("cntA")).unwrap();
    assert_eq!(cnt.installed, vec![rid("r2"), rid("r3")]);
}

#[test]
fn removing_last_profile_falls_back_to_default() {
    let h = harness();
    let profiles = h.fabric.profiles();
    profiles
        .add_profile_version(
            ProfileVersion::new(v12()),
            vec![profile_with_resources("prf0", &["r0"])],
        )
        .unwrap();
    let containers = h.fabric.containers();
    containers
        .create_container(CreateOptions::new("cntB").profile_version(v12()).profile("prf0"))
        .unwrap();
    containers.start_container(&cid("cntB"), None).unwrap();

    // 1.2 has no default profile yet, so the removal is refused untouched.
    let err = containers
        .remove_profiles(&cid("cntB"), &[pid("prf0")], None)
        .unwrap_err();
    assert!(matches!(err, CoreError::ProfileNotFound { ref profile, .. } if profile == "default"));
    let cnt = containers.get_container(&cid("cntB")).unwrap();
    assert_eq!(cnt.profiles, vec![pid("prf0")]);
    assert_eq!(cnt.installed, vec![rid("r0")]);
    containers.get_effective_profile(&cid("cntB")).unwrap();

    profiles
        .add_profile(profile_with_resources("default", &["base"]))
        .unwrap();
    let cnt = containers
        .remove_profiles(&cid("cntB"), &[pid("prf0")], None)
        .unwrap();
    assert_eq!(cnt.profiles, vec![pid("default")]);
    assert_eq!(cnt.installed, vec![rid("base")]);
    let effective = containers.get_effective_profile(&cid("cntB")).unwrap();
    assert_eq!(effective.identity, "effective#1.2.0[default]");
}

#[test]
fn destroy_uninstalls_in_reverse_order() {
    let h = harness();
    let recorder = Arc::new(Recorder::default());
    h.fabric.dispatcher().add_provision_listener(recorder.clone());
    h.fabric
        .profiles()
        .add_profile_version(
            ProfileVersion::new(v12()),
            vec![profile_with_resources("prfA", &["r1", "r2", "r3"])],
        )
        .unwrap();
    let containers = h.fabric.containers();
    containers
        .create_container(CreateOptions::new("cntA").profile_version(v12()).profile("prfA"))
        .unwrap();
    containers.start_container(&cid("cntA"), None).unwrap();

    let destroyed = containers.destroy_container(&cid("cntA"), None).unwrap();
    assert_eq!(destroyed.state, LifecycleState::Destroyed);
    assert!(destroyed.installed.is_empty());
    assert_eq!(
        h.provisioner.log().uninstalls(),
        vec![rid("r3"), rid("r2"), rid("r1")]
    );
    assert_eq!(
        recorder.types_for("cntA"),
        vec![
            ProvisionEventType::Provisioning,
            ProvisionEventType::Provisioned,
            ProvisionEventType::Removed,
        ]
    );
}

#[test]
fn container_default_assignment_through_lifecycle() {
    let h = harness();
    let containers = h.fabric.containers();
    let created = containers.create_container(CreateOptions::new("cntA")).unwrap();
    assert_eq!(created.state, LifecycleState::Created);
    assert!(created.profile_version.is_none());
    assert!(created.profiles.is_empty());

    let started = containers.start_container(&cid("cntA"), None).unwrap();
    assert_eq!(started.state, LifecycleState::Started);
    assert_eq!(started.profile_version, Some(Version::new(1, 0, 0)));
    assert_eq!(started.profiles, vec![pid("default")]);

    let stopped = containers.stop_container(&cid("cntA")).unwrap();
    assert_eq!(stopped.state, LifecycleState::Stopped);
    assert_eq!(stopped.profiles, vec![pid("default")]);

    containers.destroy_container(&cid("cntA"), None).unwrap();
    let err = containers.start_container(&cid("cntA"), None).unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { ref from, .. } if from == "destroyed"));
    assert!(!err.is_not_found());

    let unknown = containers.start_container(&cid("nope"), None).unwrap_err();
    assert!(unknown.is_not_found());
}

#[test]
fn illegal_transitions_are_rejected() {
    let h = harness();
    let containers = h.fabric.containers();
    containers.create_container(CreateOptions::new("cntA")).unwrap();

    let err = containers.stop_container(&cid("cntA")).unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { .. }));

    containers.start_container(&cid("cntA"), None).unwrap();
    let err = containers.start_container(&cid("cntA"), None).unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { .. }));

    let err = containers
        .create_container(CreateOptions::new("cntA"))
        .unwrap_err();
    assert!(matches!(err, CoreError::AlreadyExists(_)));
}

#[test]
fn destroy_requires_children_gone() {
    let h = harness();
    let containers = h.fabric.containers();
    containers.create_container(CreateOptions::new("parent")).unwrap();
    containers
        .create_container(CreateOptions::new("child").parent("parent"))
        .unwrap();
    assert!(containers
        .get_container(&cid("parent"))
        .unwrap()
        .children
        .contains(&cid("child")));

    let err = containers.destroy_container(&cid("parent"), None).unwrap_err();
    assert!(matches!(err, CoreError::IllegalState(ref m) if m.contains("child")));

    containers.destroy_container(&cid("child"), None).unwrap();
    assert!(containers
        .get_container(&cid("parent"))
        .unwrap()
        .children
        .is_empty());
    containers.destroy_container(&cid("parent"), None).unwrap();
}

#[test]
fn create_under_missing_or_destroyed_parent_fails() {
    let h = harness();
    let containers = h.fabric.containers();
    let err = containers
        .create_container(CreateOptions::new("child").parent("ghost"))
        .unwrap_err();
    assert!(err.is_not_found());

    containers.create_container(CreateOptions::new("parent")).unwrap();
    containers.destroy_container(&cid("parent"), None).unwrap();
    let err = containers
        .create_container(CreateOptions::new("child").parent("parent"))
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { .. }));
}

#[test]
fn current_container_cannot_be_stopped_or_destroyed() {
    let h = harness();
    let containers = h.fabric.containers();
    let root = cid("root");
    assert!(matches!(
        containers.stop_container(&root),
        Err(CoreError::IllegalState(_))
    ));
    assert!(matches!(
        containers.destroy_container(&root, None),
        Err(CoreError::IllegalState(_))
    ));
    assert!(containers.get_container(&root).unwrap().is_started());
}

#[test]
fn version_in_use_cannot_be_removed() {
    let h = harness();
    let profiles = h.fabric.profiles();
    let containers = h.fabric.containers();
    profiles
        .add_profile_version(
            ProfileVersion::new(v12()),
            vec![profile_with_resources("prfA", &[])],
        )
        .unwrap();
    containers
        .create_container(CreateOptions::new("cntA").profile_version(v12()))
        .unwrap();

    let err = profiles.remove_profile_version(&v12()).unwrap_err();
    assert!(matches!(err, CoreError::IllegalState(ref m) if m.contains("cntA")));

    containers.destroy_container(&cid("cntA"), None).unwrap();
    profiles.remove_profile_version(&v12()).unwrap();
    assert!(profiles.get_profile_version(&v12()).unwrap_err().is_not_found());
}

#[test]
fn profile_in_use_cannot_be_removed() {
    let h = harness();
    let profiles = h.fabric.profiles();
    profiles
        .add_profile_version(
            ProfileVersion::new(v12()),
            vec![profile_with_resources("prfA", &[])],
        )
        .unwrap();
    h.fabric
        .containers()
        .create_container(CreateOptions::new("cntA").profile_version(v12()).profile("prfA"))
        .unwrap();
    let err = profiles.remove_profile(&v12(), &pid("prfA")).unwrap_err();
    assert!(matches!(err, CoreError::IllegalState(_)));
}

#[test]
fn effective_profile_of_child_merges_parent_configuration() {
    let h = harness();
    let profiles = h.fabric.profiles();
    let default = Profile::builder("default").version(v12()).build().unwrap();
    let prf_a = Profile::builder("prfA")
        .version(v12())
        .configuration("pidA", "keyA", "0")
        .build()
        .unwrap();
    let prf_b = Profile::builder("prfB")
        .version(v12())
        .parent("prfA")
        .configuration("pidB", "keyB", "0")
        .build()
        .unwrap();
    profiles
        .add_profile_version(ProfileVersion::new(v12()), vec![default, prf_a, prf_b])
        .unwrap();

    let effective = profiles.get_effective_profile(&v12(), &pid("prfB")).unwrap();
    assert!(effective.is_effective());
    let items: Vec<_> = effective.configuration_items().collect();
    assert_eq!(items.len(), 2);
    let merged: Vec<String> = items
        .iter()
        .flat_map(|item| item.default_attributes().into_keys())
        .collect();
    assert_eq!(merged, vec!["keyA".to_owned(), "keyB".to_owned()]);

    let containers = h.fabric.containers();
    containers
        .create_container(CreateOptions::new("cntA").profile_version(v12()).profile("prfB"))
        .unwrap();
    containers.start_container(&cid("cntA"), None).unwrap();
    let for_container = containers.get_effective_profile(&cid("cntA")).unwrap();
    assert_eq!(for_container.identity, "effective#1.2.0[prfB]");
    assert_eq!(for_container.configuration_items().count(), 2);
    assert_eq!(
        h.configuration.configuration("pidA").unwrap().get("keyA").map(String::as_str),
        Some("0")
    );
    assert_eq!(
        h.configuration.configuration("pidB").unwrap().get("keyB").map(String::as_str),
        Some("0")
    );
}

#[test]
fn configuration_respects_runtime_directives() {
    let h = harness_with(
        Vec::new(),
        FabricConfig {
            runtime_type: RuntimeType::Karaf,
            ..FabricConfig::default()
        },
    );
    let profile = Profile::builder("prfA")
        .version(v12())
        .item(
            fabric_schema::ConfigurationItem::new("karaf.only").with_configuration(
                fabric_schema::Configuration::new("default")
                    .with_attribute("a", "1")
                    .with_directive(fabric_schema::INCLUDE_RUNTIME_TYPE, "karaf"),
            ),
        )
        .item(
            fabric_schema::ConfigurationItem::new("tomcat.only").with_configuration(
                fabric_schema::Configuration::new("default")
                    .with_attribute("b", "2")
                    .with_directive(fabric_schema::INCLUDE_RUNTIME_TYPE, "tomcat"),
            ),
        )
        .build()
        .unwrap();
    h.fabric
        .profiles()
        .add_profile_version(ProfileVersion::new(v12()), vec![profile])
        .unwrap();
    let containers = h.fabric.containers();
    containers
        .create_container(CreateOptions::new("cntA").profile_version(v12()).profile("prfA"))
        .unwrap();
    containers.start_container(&cid("cntA"), None).unwrap();

    assert!(h.configuration.configuration("karaf.only").is_some());
    assert!(h.configuration.configuration("tomcat.only").is_none());
}

#[test]
fn requirements_resolve_to_highest_version_before_explicit_resources() {
    let h = harness_with(
        vec![Resource::new("lib", "1.0.0"), Resource::new("lib", "2.0.0")],
        FabricConfig::default(),
    );
    let profile = Profile::builder("prfA")
        .version(v12())
        .item(ResourceItem::new("bundle.app", res("app")))
        .item(RequirementItem::new("req.lib", Requirement::identity("lib")))
        .build()
        .unwrap();
    h.fabric
        .profiles()
        .add_profile_version(ProfileVersion::new(v12()), vec![profile])
        .unwrap();
    let containers = h.fabric.containers();
    containers
        .create_container(CreateOptions::new("cntA").profile_version(v12()).profile("prfA"))
        .unwrap();
    let started = containers.start_container(&cid("cntA"), None).unwrap();
    assert_eq!(
        started.installed,
        vec![ResourceIdentity::from_parts("lib", "2.0.0"), rid("app")]
    );
}

#[test]
fn unsatisfied_requirement_fails_and_dispatches_error() {
    let h = harness();
    let recorder = Recorder::default();
    let profile = Profile::builder("prfA")
        .version(v12())
        .item(RequirementItem::new("req.missing", Requirement::identity("missing")))
        .item(RequirementItem::new(
            "req.nice",
            Requirement::identity("nice-to-have").optional(),
        ))
        .build()
        .unwrap();
    h.fabric
        .profiles()
        .add_profile_version(ProfileVersion::new(v12()), vec![profile])
        .unwrap();
    let containers = h.fabric.containers();
    containers
        .create_container(CreateOptions::new("cntA").profile_version(v12()).profile("prfA"))
        .unwrap();

    let err = containers
        .start_container(&cid("cntA"), Some(&recorder))
        .unwrap_err();
    match err {
        CoreError::Provision(fabric_provision::ProvisionError::Unsatisfied(reqs)) => {
            assert_eq!(reqs.len(), 1);
            assert_eq!(reqs[0].name, "missing");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        recorder.types_for("cntA"),
        vec![ProvisionEventType::Provisioning, ProvisionEventType::Error]
    );
    let events = recorder.events.lock().unwrap();
    assert!(events[1].error.as_deref().unwrap().contains("missing"));
}

#[test]
fn failed_install_keeps_partial_progress() {
    let h = harness();
    h.provisioner.fail_install(rid("r2")).unwrap();
    h.fabric
        .profiles()
        .add_profile_version(
            ProfileVersion::new(v12()),
            vec![profile_with_resources("prfA", &["r1", "r2", "r3"])],
        )
        .unwrap();
    let containers = h.fabric.containers();
    containers
        .create_container(CreateOptions::new("cntA").profile_version(v12()).profile("prfA"))
        .unwrap();
    assert!(containers.start_container(&cid("cntA"), None).is_err());

    let cnt = containers.get_container(&cid("cntA")).unwrap();
    assert_eq!(cnt.state, LifecycleState::Started);
    assert_eq!(cnt.installed, vec![rid("r1")]);
}

#[test]
fn stopped_container_records_assignment_without_provisioning() {
    let h = harness();
    h.fabric
        .profiles()
        .add_profile_version(
            ProfileVersion::new(v12()),
            vec![
                profile_with_resources("prfA", &["r1"]),
                profile_with_resources("prfB", &["r2"]),
            ],
        )
        .unwrap();
    let containers = h.fabric.containers();
    containers
        .create_container(CreateOptions::new("cntA").profile_version(v12()).profile("prfA"))
        .unwrap();

    let cnt = containers
        .add_profiles(&cid("cntA"), &[pid("prfB")], None)
        .unwrap();
    assert_eq!(cnt.profiles, vec![pid("prfA"), pid("prfB")]);
    assert!(h.provisioner.log().records().is_empty());

    let started = containers.start_container(&cid("cntA"), None).unwrap();
    assert_eq!(started.installed, vec![rid("r1"), rid("r2")]);

    let cnt = containers
        .remove_profiles(&cid("cntA"), &[pid("prfA"), pid("unknown")], None)
        .unwrap();
    assert_eq!(cnt.profiles, vec![pid("prfB")]);
    assert_eq!(cnt.installed, vec![rid("r2")]);
    assert_eq!(h.provisioner.log().uninstalls(), vec![rid("r1")]);
}

#[test]
fn assigning_unknown_profile_or_version_fails() {
    let h = harness();
    let containers = h.fabric.containers();
    containers.create_container(CreateOptions::new("cntA")).unwrap();

    let err = containers
        .add_profiles(&cid("cntA"), &[pid("ghost")], None)
        .unwrap_err();
    assert!(err.is_not_found());
    let err = containers
        .set_profile_version(&cid("cntA"), &Version::new(9, 9, 9), None)
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(containers
        .get_container(&cid("cntA"))
        .unwrap()
        .profiles
        .is_empty());
}

#[test]
fn switching_version_reprovisions() {
    let h = harness();
    let profiles = h.fabric.profiles();
    profiles
        .add_profile_version(
            ProfileVersion::new(v12()),
            vec![profile_with_resources("prfA", &["r1"])],
        )
        .unwrap();
    let v13 = Version::parse("1.3").unwrap();
    let prf_a13 = Profile::builder("prfA")
        .version(v13.clone())
        .item(ResourceItem::new("bundle.r9", res("r9")))
        .build()
        .unwrap();
    profiles
        .add_profile_version(ProfileVersion::new(v13.clone()), vec![prf_a13])
        .unwrap();

    let containers = h.fabric.containers();
    containers
        .create_container(CreateOptions::new("cntA").profile_version(v12()).profile("prfA"))
        .unwrap();
    containers.start_container(&cid("cntA"), None).unwrap();
    let cnt = containers
        .set_profile_version(&cid("cntA"), &v13, None)
        .unwrap();
    assert_eq!(cnt.profile_version, Some(v13));
    assert_eq!(cnt.installed, vec![rid("r9")]);
}

#[test]
fn shared_resources_are_installed_once() {
    let h = harness();
    let profile = Profile::builder("prfA")
        .version(v12())
        .item(ResourceItem::new("bundle.shared", res("shared")).shared())
        .build()
        .unwrap();
    h.fabric
        .profiles()
        .add_profile_version(ProfileVersion::new(v12()), vec![profile])
        .unwrap();
    let containers = h.fabric.containers();
    for id in ["cntA", "cntB"] {
        containers
            .create_container(CreateOptions::new(id).profile_version(v12()).profile("prfA"))
            .unwrap();
        containers.start_container(&cid(id), None).unwrap();
    }
    assert_eq!(h.provisioner.log().installs(), vec![rid("shared")]);
    assert_eq!(containers.shared_references(&rid("shared")), 2);

    containers.destroy_container(&cid("cntA"), None).unwrap();
    assert!(h.provisioner.log().uninstalls().is_empty());
    containers.destroy_container(&cid("cntB"), None).unwrap();
    assert_eq!(h.provisioner.log().uninstalls(), vec![rid("shared")]);
    assert_eq!(containers.shared_references(&rid("shared")), 0);
}

#[test]
fn update_profile_reprovisions_only_inheriting_containers() {
    let h = harness();
    let recorder = Arc::new(Recorder::default());
    let profile_events = Arc::new(ProfileRecorder::default());
    h.fabric.dispatcher().add_provision_listener(recorder.clone());
    h.fabric.dispatcher().add_profile_listener(profile_events.clone());
    let prf_b = Profile::builder("prfB")
        .version(v12())
        .parent("prfA")
        .build()
        .unwrap();
    h.fabric
        .profiles()
        .add_profile_version(
            ProfileVersion::new(v12()),
            vec![
                profile_with_resources("prfA", &["r1"]),
                prf_b,
                profile_with_resources("prfC", &["r3"]),
            ],
        )
        .unwrap();
    let containers = h.fabric.containers();
    for (id, profile) in [("cntA", "prfB"), ("cntC", "prfC")] {
        containers
            .create_container(CreateOptions::new(id).profile_version(v12()).profile(profile))
            .unwrap();
        containers.start_container(&cid(id), None).unwrap();
    }
    let before_c = recorder.types_for("cntC").len();

    containers
        .update_profile(profile_with_resources("prfA", &["r1", "r5"]), None)
        .unwrap();

    let cnt_a = containers.get_container(&cid("cntA")).unwrap();
    assert_eq!(cnt_a.installed, vec![rid("r1"), rid("r5")]);
    assert_eq!(recorder.types_for("cntC").len(), before_c);

    let events = profile_events.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].profile, "prfA");
    assert_eq!(events[0].event_type, ProfileEventType::Updated);
}

#[test]
fn update_profile_tolerates_failing_container() {
    let h = harness();
    h.fabric
        .profiles()
        .add_profile_version(
            ProfileVersion::new(v12()),
            vec![profile_with_resources("prfA", &["r1"])],
        )
        .unwrap();
    let containers = h.fabric.containers();
    for id in ["cntA", "cntB"] {
        containers
            .create_container(CreateOptions::new(id).profile_version(v12()).profile("prfA"))
            .unwrap();
        containers.start_container(&cid(id), None).unwrap();
    }
    let updated = containers
        .update_profile(
            Profile::builder("prfA")
                .version(v12())
                .item(RequirementItem::new("req.absent", Requirement::identity("absent")))
                .build()
                .unwrap(),
            None,
        )
        .unwrap();
    assert_eq!(updated.identity, "prfA");
    // Both containers failed to resolve and kept their resources.
    for id in ["cntA", "cntB"] {
        let cnt = containers.get_container(&cid(id)).unwrap();
        assert_eq!(cnt.installed, vec![rid("r1")]);
    }
}

#[test]
fn latch_opens_on_provisioned() {
    let h = harness();
    let latch = Arc::new(ProvisionLatch::new("cntA", 1));
    h.fabric.dispatcher().add_provision_listener(latch.clone());
    let containers = h.fabric.containers();
    containers.create_container(CreateOptions::new("cntA")).unwrap();
    assert!(!latch.wait(Duration::from_millis(20)));

    containers.start_container(&cid("cntA"), None).unwrap();
    assert!(latch.wait(Duration::from_secs(1)));
    assert_eq!(latch.remaining(), 0);
}

#[test]
fn endpoints_and_attributes_are_recorded() {
    let h = harness();
    let containers = h.fabric.containers();
    containers
        .create_container(CreateOptions::new("cntA").attribute("zone", "eu"))
        .unwrap();
    containers
        .add_service_endpoint(
            &cid("cntA"),
            fabric_schema::ServiceEndpoint::new("http", "http://localhost:8181"),
        )
        .unwrap();
    let cnt = containers.set_attribute(&cid("cntA"), "rack", "r1").unwrap();
    assert_eq!(cnt.endpoints.len(), 1);
    assert_eq!(cnt.attributes.get("zone").map(String::as_str), Some("eu"));
    assert_eq!(cnt.attributes.get("rack").map(String::as_str), Some("r1"));
}

#[test]
fn stopped_fabric_rejects_operations() {
    let h = harness();
    h.fabric.stop();
    assert!(matches!(
        h.fabric.containers().get_containers(),
        Err(CoreError::Inactive(_))
    ));
    assert!(matches!(
        h.fabric.profiles().get_versions(),
        Err(CoreError::Inactive(_))
    ));
}

#[test]
fn file_store_survives_restart() {
    let store = tempfile::tempdir().unwrap();
    {
        let fabric = Fabric::builder().store(store.path()).unwrap().build().unwrap();
        fabric.start().unwrap();
        fabric
            .profiles()
            .add_profile_version(
                ProfileVersion::new(v12()),
                vec![profile_with_resources("prfA", &["r1"])],
            )
            .unwrap();
    }

    let fabric = Fabric::builder().store(store.path()).unwrap().build().unwrap();
    fabric.start().unwrap();
    let versions = fabric.profiles().get_versions().unwrap();
    assert_eq!(versions, vec![Version::new(1, 0, 0), v12()]);
    let profile = fabric.profiles().get_profile(&v12(), &pid("prfA")).unwrap();
    assert_eq!(profile.resource_items().count(), 1);
}
