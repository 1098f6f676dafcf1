use crate::CoreError;
use fabric_schema::LifecycleState;
use std::sync::atomic::{AtomicBool, Ordering};

pub fn validate_transition(
    identity: &str,
    from: LifecycleState,
    to: LifecycleState,
) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (
            LifecycleState::Created | LifecycleState::Stopped,
            LifecycleState::Started
        ) | (LifecycleState::Started, LifecycleState::Stopped)
            | (
                LifecycleState::Created | LifecycleState::Started | LifecycleState::Stopped,
                LifecycleState::Destroyed
            )
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            identity: identity.to_owned(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Activation flag checked first by every public service entry point.
#[derive(Debug)]
pub struct ComponentState {
    name: &'static str,
    active: AtomicBool,
}

impl ComponentState {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            active: AtomicBool::new(false),
        }
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), CoreError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(CoreError::Inactive(self.name))
        }
    }
}
