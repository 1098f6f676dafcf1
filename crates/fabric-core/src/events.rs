use fabric_schema::{ContainerIdentity, ProfileIdentity, Version};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionEventType {
    Provisioning,
    Provisioned,
    Removed,
    Error,
}

impl fmt::Display for ProvisionEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProvisionEventType::Provisioning => "provisioning",
            ProvisionEventType::Provisioned => "provisioned",
            ProvisionEventType::Removed => "removed",
            ProvisionEventType::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionEvent {
    pub container: ContainerIdentity,
    pub event_type: ProvisionEventType,
    /// Effective profile identity the reconciliation ran against, if computed.
    pub profile: Option<ProfileIdentity>,
    pub error: Option<String>,
}

impl ProvisionEvent {
    pub fn new(
        container: &ContainerIdentity,
        event_type: ProvisionEventType,
        profile: Option<&ProfileIdentity>,
    ) -> Self {
        Self {
            container: container.clone(),
            event_type,
            profile: profile.cloned(),
            error: None,
        }
    }

    pub fn error(
        container: &ContainerIdentity,
        profile: Option<&ProfileIdentity>,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(container, ProvisionEventType::Error, profile)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileEventType {
    Updated,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileEvent {
    pub version: Version,
    pub profile: ProfileIdentity,
    pub event_type: ProfileEventType,
    pub error: Option<String>,
}

pub trait ProvisionListener: Send + Sync {
    fn on_provision_event(&self, event: &ProvisionEvent);
}

pub trait ProfileListener: Send + Sync {
    fn on_profile_event(&self, event: &ProfileEvent);
}

/// Synchronous delivery of events to global listeners and an optional
/// per-call listener.
///
/// Listener lists are copied before delivery, so a listener may register
/// further listeners or call back into the services.
#[derive(Default)]
pub struct EventDispatcher {
    provision_listeners: RwLock<Vec<Arc<dyn ProvisionListener>>>,
    profile_listeners: RwLock<Vec<Arc<dyn ProfileListener>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_provision_listener(&self, listener: Arc<dyn ProvisionListener>) {
        match self.provision_listeners.write() {
            Ok(mut listeners) => listeners.push(listener),
            Err(e) => warn!("dropping provision listener, registry poisoned: {e}"),
        }
    }

    pub fn add_profile_listener(&self, listener: Arc<dyn ProfileListener>) {
        match self.profile_listeners.write() {
            Ok(mut listeners) => listeners.push(listener),
            Err(e) => warn!("dropping profile listener, registry poisoned: {e}"),
        }
    }

    pub fn dispatch_provision_event(
        &self,
        event: &ProvisionEvent,
        listener: Option<&dyn ProvisionListener>,
    ) {
        if let Some(listener) = listener {
            listener.on_provision_event(event);
        }
        let global: Vec<_> = self
            .provision_listeners
            .read()
            .map(|l| l.clone())
            .unwrap_or_default();
        for listener in global {
            listener.on_provision_event(event);
        }
    }

    pub fn dispatch_profile_event(
        &self,
        event: &ProfileEvent,
        listener: Option<&dyn ProfileListener>,
    ) {
        if let Some(listener) = listener {
            listener.on_profile_event(event);
        }
        let global: Vec<_> = self
            .profile_listeners
            .read()
            .map(|l| l.clone())
            .unwrap_or_default();
        for listener in global {
            listener.on_profile_event(event);
        }
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher").finish_non_exhaustive()
    }
}

/// Counts down on each PROVISIONED event for one container.
///
/// Register it as a listener, trigger the operation, then [`wait`](Self::wait).
#[derive(Debug)]
pub struct ProvisionLatch {
    container: ContainerIdentity,
    remaining: Mutex<usize>,
    signal: Condvar,
}

impl ProvisionLatch {
    pub fn new(container: impl Into<ContainerIdentity>, count: usize) -> Self {
        Self {
            container: container.into(),
            remaining: Mutex::new(count),
            signal: Condvar::new(),
        }
    }

    /// Block until the count reaches zero or `timeout` elapses. Returns
    /// whether the latch opened.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let Ok(mut remaining) = self.remaining.lock() else {
            return false;
        };
        while *remaining > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.signal.wait_timeout(remaining, deadline - now) {
                Ok((guard, _)) => remaining = guard,
                Err(_) => return false,
            }
        }
        true
    }

    pub fn remaining(&self) -> usize {
        self.remaining.lock().map(|r| *r).unwrap_or(0)
    }
}

impl ProvisionListener for ProvisionLatch {
    fn on_provision_event(&self, event: &ProvisionEvent) {
        if event.container != self.container || event.event_type != ProvisionEventType::Provisioned
        {
            return;
        }
        if let Ok(mut remaining) = self.remaining.lock() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.signal.notify_all();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ProvisionEventType>>,
    }

    impl ProvisionListener for Recorder {
        fn on_provision_event(&self, event: &ProvisionEvent) {
            self.events.lock().unwrap().push(event.event_type);
        }
    }

    fn event(container: &str, event_type: ProvisionEventType) -> ProvisionEvent {
        ProvisionEvent::new(&ContainerIdentity::new(container), event_type, None)
    }

    #[test]
    fn dispatch_reaches_caller_and_global_listeners() {
        let dispatcher = EventDispatcher::new();
        let global = Arc::new(Recorder::default());
        dispatcher.add_provision_listener(global.clone());
        let caller = Recorder::default();

        dispatcher.dispatch_provision_event(
            &event("cntA", ProvisionEventType::Provisioning),
            Some(&caller),
        );
        dispatcher.dispatch_provision_event(&event("cntA", ProvisionEventType::Provisioned), None);

        assert_eq!(caller.events.lock().unwrap().len(), 1);
        assert_eq!(
            *global.events.lock().unwrap(),
            vec![
                ProvisionEventType::Provisioning,
                ProvisionEventType::Provisioned
            ]
        );
    }

    #[test]
    fn error_event_carries_message() {
        let e = ProvisionEvent::error(&ContainerIdentity::new("cntA"), None, "boom");
        assert_eq!(e.event_type, ProvisionEventType::Error);
        assert_eq!(e.error.as_deref(), Some("boom"));
    }

    #[test]
    fn latch_opens_on_matching_events_only() {
        let latch = Arc::new(ProvisionLatch::new("cntA", 2));
        latch.on_provision_event(&event("cntB", ProvisionEventType::Provisioned));
        latch.on_provision_event(&event("cntA", ProvisionEventType::Provisioning));
        assert_eq!(latch.remaining(), 2);

        let signaller = Arc::clone(&latch);
        let handle = thread::spawn(move || {
            signaller.on_provision_event(&event("cntA", ProvisionEventType::Provisioned));
            signaller.on_provision_event(&event("cntA", ProvisionEventType::Provisioned));
        });
        assert!(latch.wait(Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[test]
    fn latch_times_out() {
        let latch = ProvisionLatch::new("cntA", 1);
        assert!(!latch.wait(Duration::from_millis(20)));
    }
}
