use crate::concurrency::DEFAULT_LOCK_TIMEOUT;
use crate::CoreError;
use fabric_schema::{ContainerIdentity, ProfileIdentity, RuntimeType, Version};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for a [`crate::Fabric`] instance, read from `fabric.toml`.
///
/// Every key is optional; missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    pub lock_timeout_ms: u64,
    pub default_version: String,
    pub default_profile: String,
    pub current_container: String,
    pub runtime_type: RuntimeType,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
            default_version: "1.0.0".to_owned(),
            default_profile: "default".to_owned(),
            current_container: "root".to_owned(),
            runtime_type: RuntimeType::Other,
        }
    }
}

impl FabricConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn default_version(&self) -> Result<Version, CoreError> {
        Version::parse(&self.default_version)
            .map_err(|e| CoreError::Config(format!("default_version: {e}")))
    }

    pub fn default_profile(&self) -> ProfileIdentity {
        ProfileIdentity::new(self.default_profile.clone())
    }

    pub fn current_container(&self) -> ContainerIdentity {
        ContainerIdentity::new(self.current_container.clone())
    }

    /// Load `~/.config/fabric/fabric.toml`, or the defaults if it does not
    /// exist.
    pub fn load_default() -> Result<Self, CoreError> {
        let path = default_config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("invalid config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.lock_timeout_ms == 0 {
            return Err(CoreError::Config("lock_timeout_ms must be positive".to_owned()));
        }
        self.default_version()?;
        if self.default_profile.trim().is_empty() {
            return Err(CoreError::Config("default_profile must not be empty".to_owned()));
        }
        if self.current_container.trim().is_empty() {
            return Err(CoreError::Config("current_container must not be empty".to_owned()));
        }
        Ok(())
    }
}

fn default_config_path() -> Result<PathBuf, CoreError> {
    let home =
        std::env::var("HOME").map_err(|_| CoreError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/fabric/fabric.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let config: FabricConfig = toml::from_str("lock_timeout_ms = 250\n").unwrap();
        assert_eq!(config.lock_timeout(), Duration::from_millis(250));
        assert_eq!(config.default_profile, "default");
        assert_eq!(config.default_version().unwrap(), Version::new(1, 0, 0));
        assert_eq!(config.runtime_type, RuntimeType::Other);
    }

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/fabric.toml");
        let config = FabricConfig {
            runtime_type: RuntimeType::Karaf,
            current_container: "node1".to_owned(),
            ..FabricConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(FabricConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn rejects_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fabric.toml");
        std::fs::write(&path, "default_version = \"not-a-version\"\n").unwrap();
        assert!(matches!(
            FabricConfig::load(&path),
            Err(CoreError::Config(_))
        ));

        std::fs::write(&path, "lock_timeout_ms = 0\n").unwrap();
        assert!(FabricConfig::load(&path).is_err());

        std::fs::write(&path, "runtime_type = [1, 2]\n").unwrap();
        assert!(FabricConfig::load(&path).is_err());
    }
}
