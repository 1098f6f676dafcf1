use crate::{poisoned, ProvisionError};
use fabric_schema::Attributes;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::debug;

/// Applies key/value configuration to a named target.
///
/// Applying the same attributes twice must be harmless. Returns whether the
/// target was actually written.
pub trait ConfigurationManager: Send + Sync {
    fn apply_configuration(&self, target: &str, attributes: &Attributes)
        -> Result<bool, ProvisionError>;

    fn configuration(&self, target: &str) -> Option<Attributes>;
}

#[derive(Debug, Default)]
struct ConfigurationState {
    targets: BTreeMap<String, Attributes>,
    writes: usize,
}

/// Keeps configuration in memory and only counts a write when the attributes
/// for a target change.
#[derive(Debug, Default)]
pub struct MemoryConfigurationManager {
    state: Mutex<ConfigurationState>,
}

impl MemoryConfigurationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().map(|s| s.writes).unwrap_or(0)
    }

    pub fn targets(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.targets.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl ConfigurationManager for MemoryConfigurationManager {
    fn apply_configuration(
        &self,
        target: &str,
        attributes: &Attributes,
    ) -> Result<bool, ProvisionError> {
        if target.is_empty() {
            return Err(ProvisionError::Configuration {
                target: target.to_owned(),
                reason: "empty target".to_owned(),
            });
        }
        let mut state = self.state.lock().map_err(|e| poisoned(&e))?;
        if state.targets.get(target) == Some(attributes) {
            debug!("configuration '{target}' unchanged");
            return Ok(false);
        }
        state.targets.insert(target.to_owned(), attributes.clone());
        state.writes += 1;
        debug!("configuration '{target}' written ({} keys)", attributes.len());
        Ok(true)
    }

    fn configuration(&self, target: &str) -> Option<Attributes> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.targets.get(target).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn writes_only_on_change() {
        let manager = MemoryConfigurationManager::new();
        assert!(manager
            .apply_configuration("itemA", &attrs(&[("keyA", "0")]))
            .unwrap());
        assert!(!manager
            .apply_configuration("itemA", &attrs(&[("keyA", "0")]))
            .unwrap());
        assert!(manager
            .apply_configuration("itemA", &attrs(&[("keyA", "1")]))
            .unwrap());
        assert_eq!(manager.write_count(), 2);
        assert_eq!(
            manager.configuration("itemA"),
            Some(attrs(&[("keyA", "1")]))
        );
    }

    #[test]
    fn empty_target_is_rejected() {
        let manager = MemoryConfigurationManager::new();
        assert!(manager.apply_configuration("", &Attributes::new()).is_err());
        assert_eq!(manager.write_count(), 0);
    }

    #[test]
    fn targets_are_listed() {
        let manager = MemoryConfigurationManager::new();
        manager
            .apply_configuration("b", &attrs(&[("k", "v")]))
            .unwrap();
        manager
            .apply_configuration("a", &attrs(&[("k", "v")]))
            .unwrap();
        assert_eq!(manager.targets(), vec!["a", "b"]);
    }
}
