//! Clone engine
//!
//! Deep-copies a dataset: a new metadata row, a new dataset row, new file
//! groups and entries, and the physical bytes under the new dataset's own
//! directory. Rows are all-or-nothing with the caller's transaction. Bytes are
//! best-effort: a source file that is missing or unreadable is skipped with a
//! warning and gets no entry in the clone.

use std::path::PathBuf;

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, warn};

use super::error::{Result, VersioningError};
use crate::domain::Dataset;
use crate::storage::{DatasetRepository, FileStorage};

/// A file the clone could not copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub name: String,
    pub source: PathBuf,
    pub reason: String,
}

/// Result of a clone
#[derive(Debug, Clone, Serialize)]
pub struct CloneOutcome {
    pub dataset: Dataset,
    pub files_copied: usize,
    pub files_skipped: Vec<SkippedFile>,
}

impl CloneOutcome {
    /// True when every source file was copied
    pub fn is_complete(&self) -> bool {
        self.files_skipped.is_empty()
    }
}

/// Produces independent copies of datasets
#[derive(Debug, Clone)]
pub struct CloneEngine {
    files: FileStorage,
    repo: DatasetRepository,
}

impl CloneEngine {
    pub fn new(files: FileStorage) -> Self {
        Self {
            files,
            repo: DatasetRepository,
        }
    }

    pub fn file_storage(&self) -> &FileStorage {
        &self.files
    }

    /// Clones `source` into a new dataset owned by the same user
    pub fn clone(&self, conn: &Connection, source: &Dataset) -> Result<CloneOutcome> {
        let owner = source.owner_id;

        let metadata_id = self.repo.insert_metadata(conn, &source.metadata)?;
        let dataset_id =
            self.repo
                .insert_dataset(conn, owner, metadata_id, &source.kind, Utc::now())?;
        debug!(source = source.id, clone = dataset_id, "cloning dataset");

        let mut files_copied = 0;
        let mut files_skipped = Vec::new();

        for group in &source.file_groups {
            let group_id = self.repo.insert_file_group(conn, dataset_id, group)?;

            for file in &group.files {
                let src = self.files.file_path(owner, source.id, &file.name);

                if !src.is_file() {
                    warn!(
                        dataset_id = source.id,
                        file = %src.display(),
                        "source file missing, skipping copy"
                    );
                    files_skipped.push(SkippedFile {
                        name: file.name.clone(),
                        source: src,
                        reason: "source file missing".to_string(),
                    });
                    continue;
                }

                if let Err(e) = self.files.copy_into(&src, owner, dataset_id, &file.name) {
                    warn!(
                        dataset_id = source.id,
                        file = %src.display(),
                        error = %e,
                        "failed to copy file, skipping"
                    );
                    files_skipped.push(SkippedFile {
                        name: file.name.clone(),
                        source: src,
                        reason: e.to_string(),
                    });
                    continue;
                }

                self.repo.insert_file_entry(conn, group_id, file)?;
                files_copied += 1;
            }
        }

        let dataset = self
            .repo
            .get(conn, dataset_id)?
            .ok_or(VersioningError::DatasetNotFound(dataset_id))?;

        Ok(CloneOutcome {
            dataset,
            files_copied,
            files_skipped,
        })
    }
}
