//! Hub management
//!
//! Handles hub initialization and provides access to the databases,
//! the file storage and the simulated registry.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

use super::config::HUB_DIR;
use super::{Config, Database, FileStorage};
use crate::registry::Fakenodo;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Not in a dshub hub. Run 'dshub init' first.")]
    NotInHub,
}

/// A dataset hub rooted at a directory containing `.dshub/`
pub struct Hub {
    root: PathBuf,
    config: Config,
}

impl Hub {
    /// Opens an existing hub at the given path
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();

        if !root.join(HUB_DIR).is_dir() {
            return Err(HubError::NotInHub.into());
        }

        let config = Config::for_hub(&root)?;

        Ok(Self { root, config })
    }

    /// Opens the hub at the current directory or a parent
    pub fn open_current() -> Result<Self> {
        let root = Config::find_hub_root().ok_or(HubError::NotInHub)?;

        Self::open(root)
    }

    /// Initializes a new hub at the given path
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let hub_dir = root.join(HUB_DIR);

        fs::create_dir_all(&hub_dir)
            .with_context(|| format!("Failed to create {} directory: {}", HUB_DIR, hub_dir.display()))?;

        let registry_dir = hub_dir.join("registry");
        fs::create_dir_all(&registry_dir).with_context(|| {
            format!(
                "Failed to create registry directory: {}",
                registry_dir.display()
            )
        })?;

        let config_path = hub_dir.join("config.toml");
        if !config_path.exists() {
            let default_config = r#"# dshub configuration

[storage]
# Root of uploaded dataset files, relative to the hub root
uploads_dir = "uploads"

[registry]
# Prefix of DOIs minted by the simulated registry
doi_prefix = "10.5281/fakenodo"

# Host used in publication URLs (overridden by DSHUB_DOMAIN)
domain = "localhost"
"#;
            fs::write(&config_path, default_config)
                .with_context(|| format!("Failed to write config: {}", config_path.display()))?;
        }

        let gitignore_path = hub_dir.join(".gitignore");
        if !gitignore_path.exists() {
            let gitignore = r#"# SQLite write-ahead files
*.db-wal
*.db-shm

# Files uploaded to the simulated registry
registry/
"#;
            fs::write(&gitignore_path, gitignore).with_context(|| {
                format!("Failed to write .gitignore: {}", gitignore_path.display())
            })?;
        }

        let hub = Self::open(root)?;

        // Create both databases up front so a fresh hub is immediately usable
        hub.database()?;
        hub.registry()?;

        Ok(hub)
    }

    /// Returns the hub root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the .dshub directory path
    pub fn hub_dir(&self) -> PathBuf {
        self.root.join(HUB_DIR)
    }

    /// Returns the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens the metadata database
    pub fn database(&self) -> Result<Database> {
        Database::open(&self.hub_dir().join("hub.db"))
    }

    /// Opens the simulated registry
    pub fn registry(&self) -> Result<Fakenodo> {
        Fakenodo::open(
            &self.hub_dir().join("registry.db"),
            self.hub_dir().join("registry"),
            &self.config.hub.registry.doi_prefix,
        )
    }

    /// Returns the uploaded-files storage
    pub fn file_storage(&self) -> Result<FileStorage> {
        Ok(FileStorage::new(self.config.uploads_root()?))
    }

    /// Domain used in publication URLs
    pub fn domain(&self) -> String {
        self.config.hub.registry.effective_domain()
    }
}
