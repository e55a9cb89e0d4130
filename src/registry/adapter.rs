//! Registry adapter contract
//!
//! The versioning layer talks to a registry through four calls:
//! create, upload, publish and read back the DOI. Two further calls cover
//! metadata-only edits, and two read a deposition by id or by any DOI it ever
//! held. An in-process simulated registry and a remote one must both honor the
//! same draft/dirty/published semantics.

use std::path::Path;

use thiserror::Error;

use super::deposition::DepositionError;
use crate::domain::{
    Deposition, DepositionId, DepositionMetadata, Doi, FileDescriptor, MetadataPatch,
    VersionNumber,
};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Deposition {0} not found")]
    NotFound(DepositionId),

    #[error("Registry call '{call}' failed: {message}")]
    Call { call: &'static str, message: String },
}

impl RegistryError {
    /// Wraps a state-machine failure raised while serving `call`
    pub fn from_store(call: &'static str, err: DepositionError) -> Self {
        match err {
            DepositionError::NotFound(id) => RegistryError::NotFound(id),
            other => RegistryError::Call {
                call,
                message: other.to_string(),
            },
        }
    }
}

/// Content handed to [`RegistryAdapter::upload_file`]
#[derive(Debug, Clone, Copy)]
pub enum FileSource<'a> {
    /// A file already on disk; the registry records its path
    Path(&'a Path),
    /// Raw bytes the registry stores itself
    Bytes(&'a [u8]),
}

/// The registry calls the versioning layer depends on
pub trait RegistryAdapter {
    /// Creates a draft deposition with the given metadata bag
    fn create_deposition(&self, metadata: DepositionMetadata) -> Result<Deposition, RegistryError>;

    /// Attaches a file to a deposition
    fn upload_file(
        &self,
        id: DepositionId,
        name: &str,
        source: FileSource<'_>,
    ) -> Result<FileDescriptor, RegistryError>;

    /// Publishes a deposition, minting a new DOI
    fn publish_deposition(&self, id: DepositionId) -> Result<Doi, RegistryError>;

    /// Returns the current DOI, `None` while the deposition is a draft
    fn get_doi(&self, id: DepositionId) -> Result<Option<Doi>, RegistryError>;

    fn get_deposition(&self, id: DepositionId) -> Result<Deposition, RegistryError>;

    /// Finds the deposition that minted `doi`, even if a later publish superseded it
    fn find_by_doi(&self, doi: &Doi) -> Result<Option<Deposition>, RegistryError>;

    /// Merges a metadata-only edit; never changes the DOI
    fn update_metadata(
        &self,
        id: DepositionId,
        patch: &MetadataPatch,
    ) -> Result<Deposition, RegistryError>;

    /// Sets the current version label, optionally recording it in history
    fn set_version_label(
        &self,
        id: DepositionId,
        number: VersionNumber,
        append_history: bool,
    ) -> Result<Deposition, RegistryError>;
}
