//! Config store for loading `configuration.toml`.

use std::path::{Path, PathBuf};

use crate::context::DeploymentContext;
use crate::error::ConfigError;

use super::MpmConfig;

#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    pub fn for_context(ctx: &DeploymentContext) -> Self {
        Self::from_path(ctx.configuration_file_path())
    }

    pub fn from_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load and validate; a missing file yields the defaults.
    pub fn load(&self) -> Result<MpmConfig, ConfigError> {
        if !self.config_path.exists() {
            return Ok(MpmConfig::default());
        }
        let content =
            std::fs::read_to_string(&self.config_path).map_err(|source| ConfigError::Read {
                path: self.config_path.clone(),
                source,
            })?;
        let config: MpmConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: self.config_path.clone(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_defaults() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::from_path(temp.path().join("configuration.toml"));
        assert_eq!(store.load().unwrap(), MpmConfig::default());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("configuration.toml");
        std::fs::write(&path, "[agents\nbroken").unwrap();

        let err = ConfigStore::from_path(path).load().unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
