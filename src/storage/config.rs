//! Configuration handling for dshub
//!
//! Configuration is stored in `.dshub/config.toml` (hub) and
//! `~/.config/dshub/config.toml` (global).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{OwnerId, DEFAULT_DOI_PREFIX};

/// Name of the hub directory
pub const HUB_DIR: &str = ".dshub";

/// Overrides the registry domain used in publication URLs
pub const DOMAIN_ENV: &str = "DSHUB_DOMAIN";

/// Overrides the acting user id
pub const USER_ENV: &str = "DSHUB_USER";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Where uploaded dataset files live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Uploads root, relative to the hub root unless absolute
    pub uploads_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            uploads_dir: "uploads".to_string(),
        }
    }
}

/// Settings for the simulated registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Prefix of minted DOIs
    pub doi_prefix: String,

    /// Host used to build `http://{domain}/doi/{doi}` publication URLs
    pub domain: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            doi_prefix: DEFAULT_DOI_PREFIX.to_string(),
            domain: "localhost".to_string(),
        }
    }
}

impl RegistryConfig {
    /// Gets the effective domain from environment or config
    pub fn effective_domain(&self) -> String {
        std::env::var(DOMAIN_ENV)
            .ok()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| self.domain.clone())
    }
}

/// Hub-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HubConfig {
    pub storage: StorageConfig,
    pub registry: RegistryConfig,
}

impl HubConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.uploads_dir.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "storage.uploads_dir must not be empty".to_string(),
            ));
        }
        if !self.registry.doi_prefix.starts_with("10.") || !self.registry.doi_prefix.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "registry.doi_prefix must look like '10.xxxx/name', got '{}'",
                self.registry.doi_prefix
            )));
        }
        Ok(())
    }
}

/// Global user configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GlobalConfig {
    /// Default output format (text or json)
    pub default_format: OutputFormat,

    /// User id datasets are created under
    pub user_id: Option<OwnerId>,
}

impl GlobalConfig {
    /// Gets the effective user id from environment, config, or 1
    pub fn effective_user(&self) -> OwnerId {
        std::env::var(USER_ENV)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .or(self.user_id)
            .unwrap_or(1)
    }
}

/// Output format for commands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Combined configuration (global + hub)
#[derive(Debug, Clone)]
pub struct Config {
    pub hub: HubConfig,
    pub global: GlobalConfig,
    pub hub_root: Option<PathBuf>,
}

impl Config {
    /// Loads configuration from default locations
    pub fn load() -> Result<Self> {
        let global = Self::load_global()?;
        let hub_root = Self::find_hub_root();
        let hub = match &hub_root {
            Some(root) => Self::load_hub_config(root)?,
            None => HubConfig::default(),
        };

        Ok(Self {
            hub,
            global,
            hub_root,
        })
    }

    /// Loads configuration for a specific hub
    pub fn for_hub(hub_root: &Path) -> Result<Self> {
        let global = Self::load_global()?;
        let hub = Self::load_hub_config(hub_root)?;

        Ok(Self {
            hub,
            global,
            hub_root: Some(hub_root.to_path_buf()),
        })
    }

    /// Returns the global config directory
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "dshub", "dshub").map(|dirs| dirs.config_dir().to_path_buf())
    }

    fn load_global() -> Result<GlobalConfig> {
        let config_dir = match Self::global_config_dir() {
            Some(dir) => dir,
            None => return Ok(GlobalConfig::default()),
        };

        let config_path = config_dir.join("config.toml");
        if !config_path.exists() {
            return Ok(GlobalConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read global config: {}", config_path.display()))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .context("Failed to parse global config")
    }

    fn load_hub_config(hub_root: &Path) -> Result<HubConfig> {
        let config_path = hub_root.join(HUB_DIR).join("config.toml");

        if !config_path.exists() {
            return Ok(HubConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read hub config: {}", config_path.display()))?;

        let config: HubConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .context("Failed to parse hub config")?;

        config
            .validate()
            .with_context(|| format!("Invalid hub config: {}", config_path.display()))?;

        Ok(config)
    }

    /// Finds the hub root by looking for a `.dshub/` directory
    pub fn find_hub_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        Self::find_hub_root_from(&current)
    }

    /// Walks up from `start` looking for a `.dshub/` directory
    pub fn find_hub_root_from(start: &Path) -> Option<PathBuf> {
        let mut current = start.to_path_buf();

        loop {
            if current.join(HUB_DIR).is_dir() {
                return Some(current);
            }

            if !current.pop() {
                return None;
            }
        }
    }

    /// Returns the hub root, or an error if not in a hub
    pub fn require_hub_root(&self) -> Result<&Path> {
        self.hub_root
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Not in a dshub hub. Run 'dshub init' first."))
    }

    /// Absolute uploads root for this hub
    pub fn uploads_root(&self) -> Result<PathBuf> {
        let configured = Path::new(&self.hub.storage.uploads_dir);
        if configured.is_absolute() {
            return Ok(configured.to_path_buf());
        }
        Ok(self.require_hub_root()?.join(configured))
    }
}
