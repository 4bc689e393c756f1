//! Skyfold engine configuration
//!
//! Settings are read from a YAML file and every field has a default, so a
//! missing file is not an error. A handful of environment variables override
//! the file for deployments that cannot ship one.

pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_PATH_ENV: &str = "SKYFOLD_CONFIG_PATH";
const CALL_TIMEOUT_ENV: &str = "SKYFOLD_CALL_TIMEOUT_SECS";
const STATE_DIR_ENV: &str = "SKYFOLD_STATE_DIR";

/// Engine settings shared by every reconcile pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound for a single remote call (get, create, delete, poll)
    pub call_timeout_secs: u64,

    /// Requeue delay for an in-flight operation when the provider gives no hint
    pub default_retry_after_secs: u64,

    /// Directory holding persisted object status
    pub state_dir: PathBuf,

    /// Refetch capability data older than this. `None` keeps entries for the
    /// lifetime of the process.
    pub capability_ttl_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
            default_retry_after_secs: 15,
            state_dir: PathBuf::from(".skyfold"),
            capability_ttl_secs: None,
        }
    }
}

impl EngineConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs)
    }

    pub fn capability_ttl(&self) -> Option<Duration> {
        self.capability_ttl_secs.map(Duration::from_secs)
    }

    /// Parse a config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply `SKYFOLD_*` environment overrides
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(value) = std::env::var(CALL_TIMEOUT_ENV) {
            self.call_timeout_secs = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: CALL_TIMEOUT_ENV.to_string(),
                value: value.clone(),
            })?;
        }
        if let Ok(value) = std::env::var(STATE_DIR_ENV) {
            self.state_dir = PathBuf::from(value);
        }
        Ok(self)
    }
}

/// Get the Skyfold config directory, creating it when missing
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("skyfold");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Locate the config file
///
/// Search order:
/// 1. `SKYFOLD_CONFIG_PATH`
/// 2. current directory: `skyfold.yaml`, `.skyfold.yaml`
/// 3. `./.skyfold/skyfold.yaml`
/// 4. `~/.config/skyfold/config.yaml`
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;
    let candidates = ["skyfold.yaml", ".skyfold.yaml"];

    for filename in &candidates {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let nested = current_dir.join(".skyfold").join("skyfold.yaml");
    if nested.exists() {
        return Ok(nested);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("skyfold").join("config.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Load the effective configuration: file (if any), then env overrides
pub fn load() -> Result<EngineConfig> {
    let config = match find_config_file() {
        Ok(path) => EngineConfig::from_file(path)?,
        Err(ConfigError::ConfigFileNotFound) => EngineConfig::default(),
        Err(e) => return Err(e),
    };
    config.apply_env()
}
