//! Versioning error taxonomy

use thiserror::Error;

use crate::domain::{DatasetError, DatasetId, DepositionId, Doi, VersionNumber};
use crate::registry::RegistryError;

#[derive(Debug, Error)]
pub enum VersioningError {
    /// The dataset already belongs to a concept
    #[error("Dataset {0} already has a version")]
    ConceptCreation(DatasetId),

    /// `(concept, major, minor)` is already taken
    #[error("Version {number} already exists for concept {concept_id}")]
    DuplicateVersion {
        concept_id: i64,
        number: VersionNumber,
    },

    /// A new version was requested for a dataset that was never versioned
    #[error("Dataset {0} has no concept; it was never versioned")]
    NoConcept(DatasetId),

    #[error("Deposition {0} not found")]
    DepositionNotFound(DepositionId),

    #[error("Registry call failed: {0}")]
    RegistryCall(#[source] RegistryError),

    #[error("Dataset {0} not found")]
    DatasetNotFound(DatasetId),

    /// Neither a dataset nor a deposition ever carried this DOI
    #[error("DOI {0} is not known to this hub")]
    UnknownDoi(Doi),

    #[error("Dataset {0} is already synchronized")]
    AlreadySynced(DatasetId),

    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RegistryError> for VersioningError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => VersioningError::DepositionNotFound(id),
            other => VersioningError::RegistryCall(other),
        }
    }
}

impl From<DatasetError> for VersioningError {
    fn from(err: DatasetError) -> Self {
        match err {
            DatasetError::Invalid(message) => VersioningError::InvalidDataset(message),
            other => VersioningError::InvalidDataset(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, VersioningError>;
