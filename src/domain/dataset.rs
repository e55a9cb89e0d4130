//! Dataset domain model
//!
//! A dataset is a mutable record: a metadata row, an owner, and the file groups
//! holding its files. Dataset kinds are a tagged variant ([`DatasetKind`]) with
//! one dispatch point per kind-specific behavior.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::id::Doi;
use super::version::Version;

/// Row id of a dataset
pub type DatasetId = i64;

/// Row id of a dataset metadata record
pub type MetadataId = i64;

/// Row id of a file group
pub type FileGroupId = i64;

/// Row id of a file entry
pub type FileEntryId = i64;

/// Id of the user owning a dataset
pub type OwnerId = i64;

#[derive(Debug, Error, PartialEq)]
pub enum DatasetError {
    #[error("Unknown publication type: '{0}'")]
    UnknownPublicationType(String),

    #[error("Invalid dataset: {0}")]
    Invalid(String),
}

/// Category of publication a dataset belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PublicationType {
    #[default]
    None,
    Specifications,
    Sales,
    Rankings,
    Reviews,
    Materials,
    Methods,
    Results,
    Distributors,
    Competitors,
    Records,
    Other,
}

impl PublicationType {
    pub const ALL: [PublicationType; 12] = [
        PublicationType::None,
        PublicationType::Specifications,
        PublicationType::Sales,
        PublicationType::Rankings,
        PublicationType::Reviews,
        PublicationType::Materials,
        PublicationType::Methods,
        PublicationType::Results,
        PublicationType::Distributors,
        PublicationType::Competitors,
        PublicationType::Records,
        PublicationType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PublicationType::None => "none",
            PublicationType::Specifications => "specifications",
            PublicationType::Sales => "sales",
            PublicationType::Rankings => "rankings",
            PublicationType::Reviews => "reviews",
            PublicationType::Materials => "materials",
            PublicationType::Methods => "methods",
            PublicationType::Results => "results",
            PublicationType::Distributors => "distributors",
            PublicationType::Competitors => "competitors",
            PublicationType::Records => "records",
            PublicationType::Other => "other",
        }
    }

    /// Human-facing label (e.g. `"Specifications"`)
    pub fn display_name(&self) -> String {
        let s = self.as_str();
        let mut chars = s.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl fmt::Display for PublicationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PublicationType {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| DatasetError::UnknownPublicationType(s.to_string()))
    }
}

/// Descriptive metadata of a dataset
///
/// `deposition_id` is a soft back-reference into the registry: a lookup key,
/// never an ownership edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub id: MetadataId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposition_id: Option<i64>,
    pub title: String,
    pub description: String,
    pub publication_type: PublicationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publication_doi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_doi: Option<Doi>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

impl DatasetMetadata {
    /// A dataset is synced iff its metadata carries a registry DOI
    pub fn is_synced(&self) -> bool {
        self.dataset_doi.is_some()
    }

    /// Tags split on commas, trimmed, empties dropped
    pub fn tag_list(&self) -> Vec<String> {
        split_tags(self.tags.as_deref().unwrap_or(""))
    }

    /// Compares every field except identity and registry linkage
    pub fn same_content(&self, other: &DatasetMetadata) -> bool {
        self.title == other.title
            && self.description == other.description
            && self.publication_type == other.publication_type
            && self.publication_doi == other.publication_doi
            && self.tags == other.tags
    }
}

/// Splits a comma separated tag string
pub fn split_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// A physical file owned by a dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: FileEntryId,
    pub name: String,
    /// blake3 hex digest of the file bytes
    pub checksum: String,
    pub size: u64,
}

/// A group of files sharing descriptive metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileGroup {
    pub id: FileGroupId,
    pub csv_filename: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publication_doi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv_version: Option<String>,
    pub files: Vec<FileEntry>,
}

impl FileGroup {
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Payload specific to tabular (CSV) datasets
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TabularPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_json: Option<String>,
}

/// Kind of dataset with its kind-specific payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatasetKind {
    Tabular(TabularPayload),
}

impl Default for DatasetKind {
    fn default() -> Self {
        DatasetKind::Tabular(TabularPayload::default())
    }
}

impl DatasetKind {
    /// Discriminator stored in the `kind` column
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Tabular(_) => "tabular",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DatasetKind::Tabular(_) => "Tabular (CSV)",
        }
    }

    /// Extension of the files this kind holds
    pub fn file_extension(&self) -> &'static str {
        match self {
            DatasetKind::Tabular(_) => "csv",
        }
    }

    pub fn validate(&self) -> Result<(), DatasetError> {
        match self {
            DatasetKind::Tabular(payload) => {
                if payload.rows_count.is_some_and(|rows| rows < 0) {
                    return Err(DatasetError::Invalid(
                        "rows_count must not be negative".to_string(),
                    ));
                }
                if let Some(schema) = &payload.schema_json {
                    serde_json::from_str::<serde_json::Value>(schema).map_err(|e| {
                        DatasetError::Invalid(format!("schema_json is not valid JSON: {}", e))
                    })?;
                }
                Ok(())
            }
        }
    }

    pub fn files_count(&self, groups: &[FileGroup]) -> usize {
        match self {
            DatasetKind::Tabular(_) => groups.iter().map(|g| g.files.len()).sum(),
        }
    }

    pub fn total_size(&self, groups: &[FileGroup]) -> u64 {
        match self {
            DatasetKind::Tabular(_) => groups.iter().map(FileGroup::total_size).sum(),
        }
    }
}

/// A dataset with its metadata, files and (optionally) the version it materializes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub owner_id: OwnerId,
    pub created_at: DateTime<Utc>,
    pub metadata: DatasetMetadata,
    pub kind: DatasetKind,
    pub file_groups: Vec<FileGroup>,
    /// Times the dataset's files were packaged for download
    #[serde(default)]
    pub downloads: u64,
    /// `None` for legacy datasets created before versioning
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
}

impl Dataset {
    pub fn is_synced(&self) -> bool {
        self.metadata.is_synced()
    }

    pub fn files(&self) -> impl Iterator<Item = &FileEntry> {
        self.file_groups.iter().flat_map(|g| g.files.iter())
    }

    pub fn files_count(&self) -> usize {
        self.kind.files_count(&self.file_groups)
    }

    pub fn total_size(&self) -> u64 {
        self.kind.total_size(&self.file_groups)
    }

    pub fn total_size_human(&self) -> String {
        human_size(self.total_size())
    }

    pub fn validate(&self) -> Result<(), DatasetError> {
        if self.metadata.title.trim().is_empty() {
            return Err(DatasetError::Invalid("title must not be empty".to_string()));
        }
        self.kind.validate()
    }

    /// Version label of this dataset, if versioned
    pub fn version_label(&self) -> Option<String> {
        self.version.as_ref().map(Version::label)
    }
}

/// Formats a byte count as `N bytes`, `x KB`, `x MB` or `x GB`
pub fn human_size(size: u64) -> String {
    const KB: f64 = 1024.0;
    let bytes = size as f64;

    if size < 1024 {
        format!("{} bytes", size)
    } else if bytes < KB * KB {
        format!("{:.2} KB", bytes / KB)
    } else if bytes < KB * KB * KB {
        format!("{:.2} MB", bytes / (KB * KB))
    } else {
        format!("{:.2} GB", bytes / (KB * KB * KB))
    }
}
