//! Deposition domain model
//!
//! A deposition is the registry-facing record of a dataset: a metadata bag,
//! a status and a DOI. The bag is the only externally visible serialization
//! surface, so unknown fields are preserved on read and written back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use super::dataset::DatasetId;
use super::id::Doi;

/// Registry-side id of a deposition
pub type DepositionId = i64;

/// Publication state of a deposition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DepositionStatus {
    /// Never published, no DOI
    #[default]
    Draft,
    /// Published at least once, has a DOI
    Published,
}

impl DepositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositionStatus::Draft => "draft",
            DepositionStatus::Published => "published",
        }
    }
}

impl fmt::Display for DepositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepositionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(DepositionStatus::Draft),
            "published" => Ok(DepositionStatus::Published),
            other => Err(format!("unknown deposition status '{}'", other)),
        }
    }
}

/// A file attached to a deposition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub file_name: String,
    pub file_path: String,
    pub file_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl FileDescriptor {
    pub fn new(file_name: impl Into<String>, file_path: impl Into<String>, size: Option<u64>) -> Self {
        let file_name = file_name.into();
        let file_type = content_type_for(&file_name).to_string();
        Self {
            file_name,
            file_path: file_path.into(),
            file_type,
            size,
        }
    }
}

/// Content type recorded for an attached file
pub fn content_type_for(file_name: &str) -> &'static str {
    let is_csv = Path::new(file_name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    if is_csv {
        "text/csv"
    } else {
        "application/octet-stream"
    }
}

/// What changed between two history entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChanges {
    pub metadata_changed: bool,
    pub file_changed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl VersionChanges {
    /// Changes recorded for a publish
    pub fn published() -> Self {
        Self {
            metadata_changed: false,
            file_changed: true,
            comment: Some("Published deposition".to_string()),
        }
    }
}

/// One entry of the append-only version history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: String,
    pub doi: Option<Doi>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<VersionChanges>,
}

/// The deposition metadata bag
///
/// Every field is optional on read so older bags stay readable.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DepositionMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    /// Current free-form version label (e.g. `"1.1"`)
    pub dataset_version: Option<String>,
    pub dataset_id: Option<DatasetId>,
    pub files: Vec<FileDescriptor>,
    pub versions: Vec<VersionEntry>,
    /// Fields this build does not know about
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DepositionMetadata {
    /// Merges a patch into the bag; absent patch fields are left alone
    pub fn merge(&mut self, patch: &MetadataPatch) {
        if let Some(title) = &patch.title {
            self.title = Some(title.clone());
        }
        if let Some(description) = &patch.description {
            self.description = Some(description.clone());
        }
        if let Some(tags) = &patch.tags {
            self.tags = Some(tags.clone());
        }
        if let Some(publication_type) = &patch.publication_type {
            self.extra.insert(
                "publication_type".to_string(),
                serde_json::Value::String(publication_type.clone()),
            );
        }
        if let Some(publication_doi) = &patch.publication_doi {
            self.extra.insert(
                "publication_doi".to_string(),
                serde_json::Value::String(publication_doi.clone()),
            );
        }
    }

    /// Label written into history when no version label was ever set
    pub fn version_label_or_initial(&self) -> String {
        self.dataset_version
            .clone()
            .filter(|label| !label.is_empty())
            .unwrap_or_else(|| "1.0".to_string())
    }
}

/// A metadata-only edit
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub publication_type: Option<String>,
    pub publication_doi: Option<String>,
}

impl MetadataPatch {
    /// Sets tags from a list, joined with commas
    pub fn with_tag_list<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined: Vec<String> = tags
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        self.tags = Some(joined.join(","));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.tags.is_none()
            && self.publication_type.is_none()
            && self.publication_doi.is_none()
    }
}

/// A registry deposition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deposition {
    pub id: DepositionId,
    pub metadata: DepositionMetadata,
    pub status: DepositionStatus,
    pub doi: Option<Doi>,
    /// Metadata changed since the last publish
    pub dirty: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deposition {
    pub fn is_published(&self) -> bool {
        self.status == DepositionStatus::Published
    }
}

/// Result of a publish
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishReceipt {
    pub doi: Doi,
    pub version_label: String,
}
