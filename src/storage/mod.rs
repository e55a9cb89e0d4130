//! # Storage Layer
//!
//! Persistence for dshub: a SQLite metadata database and a file tree.
//!
//! ## Hub Structure
//!
//! ```text
//! .dshub/
//! ├── hub.db                # Datasets, files, concepts, versions
//! ├── registry.db           # Simulated registry depositions
//! ├── registry/             # Bytes uploaded to the registry
//! ├── config.toml           # Hub configuration
//! └── .gitignore
//! uploads/
//! └── user_{owner}/dataset_{id}/   # Dataset files
//! ```
//!
//! ## Key Types
//!
//! - [`Hub`] - Entry point for accessing a hub
//! - [`Database`] - Metadata database and transactions
//! - [`DatasetRepository`] - Dataset row reads and writes
//! - [`FileStorage`] - Physical file layout
//! - [`Config`] - Hub and global configuration

mod config;
mod datasets;
mod db;
mod files;
mod hub;

pub use config::{
    Config, ConfigError, GlobalConfig, HubConfig, OutputFormat, RegistryConfig, StorageConfig,
    DOMAIN_ENV, HUB_DIR, USER_ENV,
};
pub use datasets::{DatasetRepository, SyncFilter};
pub(crate) use datasets::{version_from_row, VERSION_COLUMNS};
pub use db::{unique_violation, Database, UniqueViolation};
pub(crate) use db::{parse_column, parse_optional_column};
pub use files::{digest_file, FileDigest, FileStorage};
pub use hub::{Hub, HubError};
