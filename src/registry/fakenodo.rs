//! In-process simulated registry
//!
//! Serves the adapter contract from a local [`DepositionStore`]. Uploaded
//! bytes are kept under `{files_dir}/deposition_{id}/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use super::adapter::{FileSource, RegistryAdapter, RegistryError};
use super::deposition::{DepositionError, DepositionStore};
use crate::domain::{
    Deposition, DepositionId, DepositionMetadata, Doi, FileDescriptor, MetadataPatch,
    VersionNumber,
};

/// Simulated registry backed by SQLite and a files directory
pub struct Fakenodo {
    store: DepositionStore,
    files_dir: PathBuf,
}

impl Fakenodo {
    /// Opens the registry database at `db_path`
    pub fn open(db_path: &Path, files_dir: impl Into<PathBuf>, doi_prefix: &str) -> Result<Self> {
        let store = DepositionStore::open(db_path, doi_prefix)
            .with_context(|| format!("Failed to open registry database: {}", db_path.display()))?;

        Ok(Self::with_store(store, files_dir))
    }

    pub fn with_store(store: DepositionStore, files_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            files_dir: files_dir.into(),
        }
    }

    /// Direct access to the deposition records
    pub fn store(&self) -> &DepositionStore {
        &self.store
    }

    /// Directory holding a deposition's uploaded bytes
    pub fn deposition_dir(&self, id: DepositionId) -> PathBuf {
        self.files_dir.join(format!("deposition_{}", id))
    }

    /// Deletes a deposition and its uploaded bytes
    pub fn delete_deposition(&self, id: DepositionId) -> std::result::Result<bool, RegistryError> {
        let removed = self
            .store
            .delete(id)
            .map_err(|e| RegistryError::from_store("delete_deposition", e))?;

        if removed {
            let dir = self.deposition_dir(id);
            if dir.exists() {
                fs::remove_dir_all(&dir).map_err(|e| RegistryError::Call {
                    call: "delete_deposition",
                    message: format!("failed to remove {}: {}", dir.display(), e),
                })?;
            }
        }

        Ok(removed)
    }

    fn store_bytes(&self, id: DepositionId, name: &str, bytes: &[u8]) -> Result<PathBuf, DepositionError> {
        let dir = self.deposition_dir(id);
        let path = dir.join(name);

        fs::create_dir_all(&dir)
            .and_then(|()| fs::write(&path, bytes))
            .map_err(|source| DepositionError::File {
                name: name.to_string(),
                source,
            })?;

        Ok(path)
    }
}

/// Accepts bare file names only
fn validate_file_name(name: &str) -> Result<(), DepositionError> {
    let bare = Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name);
    if name.is_empty() || !bare || name == ".." {
        return Err(DepositionError::InvalidFileName(name.to_string()));
    }
    Ok(())
}

impl RegistryAdapter for Fakenodo {
    fn create_deposition(
        &self,
        metadata: DepositionMetadata,
    ) -> std::result::Result<Deposition, RegistryError> {
        self.store
            .create(metadata)
            .map_err(|e| RegistryError::from_store("create_deposition", e))
    }

    fn upload_file(
        &self,
        id: DepositionId,
        name: &str,
        source: FileSource<'_>,
    ) -> std::result::Result<FileDescriptor, RegistryError> {
        const CALL: &str = "upload_file";

        validate_file_name(name).map_err(|e| RegistryError::from_store(CALL, e))?;
        self.store
            .require(id)
            .map_err(|e| RegistryError::from_store(CALL, e))?;

        let descriptor = match source {
            FileSource::Path(path) => {
                let size = fs::metadata(path).map(|m| m.len()).map_err(|e| RegistryError::Call {
                    call: CALL,
                    message: format!("cannot read {}: {}", path.display(), e),
                })?;
                FileDescriptor::new(name, path.display().to_string(), Some(size))
            }
            FileSource::Bytes(bytes) => {
                let stored = self
                    .store_bytes(id, name, bytes)
                    .map_err(|e| RegistryError::from_store(CALL, e))?;
                FileDescriptor::new(name, stored.display().to_string(), Some(bytes.len() as u64))
            }
        };

        debug!(deposition_id = id, file = name, "uploaded file");
        self.store
            .attach_file(id, descriptor.clone())
            .map_err(|e| RegistryError::from_store(CALL, e))?;

        Ok(descriptor)
    }

    fn publish_deposition(&self, id: DepositionId) -> std::result::Result<Doi, RegistryError> {
        self.store
            .publish(id)
            .map(|receipt| receipt.doi)
            .map_err(|e| RegistryError::from_store("publish_deposition", e))
    }

    fn get_doi(&self, id: DepositionId) -> std::result::Result<Option<Doi>, RegistryError> {
        self.store
            .require(id)
            .map(|dep| dep.doi)
            .map_err(|e| RegistryError::from_store("get_doi", e))
    }

    fn get_deposition(&self, id: DepositionId) -> std::result::Result<Deposition, RegistryError> {
        self.store
            .require(id)
            .map_err(|e| RegistryError::from_store("get_deposition", e))
    }

    fn find_by_doi(&self, doi: &Doi) -> std::result::Result<Option<Deposition>, RegistryError> {
        self.store
            .get_by_doi(doi)
            .map_err(|e| RegistryError::from_store("find_by_doi", e))
    }

    fn update_metadata(
        &self,
        id: DepositionId,
        patch: &MetadataPatch,
    ) -> std::result::Result<Deposition, RegistryError> {
        self.store
            .update_metadata(id, patch)
            .map_err(|e| RegistryError::from_store("update_metadata", e))
    }

    fn set_version_label(
        &self,
        id: DepositionId,
        number: VersionNumber,
        append_history: bool,
    ) -> std::result::Result<Deposition, RegistryError> {
        self.store
            .set_version_label(id, number, append_history)
            .map_err(|e| RegistryError::from_store("set_version_label", e))
    }
}
