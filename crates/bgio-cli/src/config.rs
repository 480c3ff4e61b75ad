//! CLI configuration
//!
//! A TOML file layered over defaults: every section and field may be
//! omitted. Lifecycle timings live under `[lifecycle.*]`.

use anyhow::Context;
use bgio_core::LifecycleConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CliError, Result};

/// Complete configuration for the bgio CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub lifecycle: LifecycleConfig,
    pub state: StatePaths,
}

/// Where persisted state lives
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatePaths {
    /// Shared state file; defaults to `<data dir>/bgio/shared_state.json`
    pub state_file: Option<PathBuf>,
}

impl AppConfig {
    /// Load and validate a TOML configuration file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&contents)?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.lifecycle.validate().map_err(CliError::Config)?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Effective shared state path
    pub fn state_file(&self) -> PathBuf {
        self.state
            .state_file
            .clone()
            .unwrap_or_else(default_state_file)
    }
}

fn default_state_file() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bgio")
        .join("shared_state.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [lifecycle.fetch]
            timeout_secs = 25

            [state]
            state_file = "/tmp/bgio-state.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.lifecycle.fetch.timeout_secs, 25);
        assert_eq!(config.lifecycle.fetch.flush_grace_ms, 1000);
        assert_eq!(config.lifecycle.wake.window_secs, 60);
        assert_eq!(config.state_file(), PathBuf::from("/tmp/bgio-state.json"));
    }

    #[test]
    fn test_invalid_timings_are_rejected() {
        let err = AppConfig::from_toml(
            r#"
            [lifecycle.budget]
            poll_interval_ms = 20000
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn test_toml_roundtrip_of_defaults() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(AppConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load_from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn test_default_state_file_location() {
        let path = AppConfig::default().state_file();
        assert!(path.ends_with("bgio/shared_state.json"));
    }
}
