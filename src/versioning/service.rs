//! Dataset service
//!
//! Entry point for collaborators: dataset creation from validated input,
//! explicit version creation, version history, listings, downloads and
//! deletion.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::error::{Result, VersioningError};
use super::orchestrator::{NumberChoice, PublicationOrchestrator};
use crate::domain::{
    split_tags, Dataset, DatasetId, DatasetKind, DatasetMetadata, FileEntry, FileGroup, OwnerId,
    PublicationType, Version, VersionNumber,
};
use crate::storage::{digest_file, DatasetRepository, SyncFilter};

/// Input for [`DatasetService::create_from_form`]
#[derive(Debug, Clone)]
pub struct NewDataset {
    pub owner_id: OwnerId,
    pub title: String,
    pub description: String,
    pub publication_type: PublicationType,
    pub publication_doi: Option<String>,
    /// Comma-separated tags
    pub tags: Option<String>,
    pub kind: DatasetKind,
    /// Source files; each becomes one file group
    pub files: Vec<PathBuf>,
}

impl NewDataset {
    fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(invalid("title must not be empty"));
        }
        if self.description.trim().is_empty() {
            return Err(invalid("description must not be empty"));
        }
        self.kind.validate()?;

        if self.files.is_empty() {
            return Err(invalid("at least one file is required"));
        }

        let mut seen = HashSet::new();
        for path in &self.files {
            let name = file_name(path)?;
            let extension_ok = Path::new(name)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(self.kind.file_extension()));
            if !extension_ok {
                return Err(invalid(format!(
                    "{} datasets accept .{} files only, got '{}'",
                    self.kind.label(),
                    self.kind.file_extension(),
                    name
                )));
            }
            if !path.is_file() {
                return Err(invalid(format!("file not found: {}", path.display())));
            }
            if !seen.insert(name) {
                return Err(invalid(format!("duplicate file name '{}'", name)));
            }
        }

        Ok(())
    }

    fn normalized_tags(&self) -> Option<String> {
        self.tags
            .as_deref()
            .map(|t| split_tags(t).join(","))
            .filter(|t| !t.is_empty())
    }
}

/// Result of [`DatasetService::download`]
#[derive(Debug, Clone, Serialize)]
pub struct DownloadReceipt {
    pub dataset_id: DatasetId,
    pub archive: PathBuf,
    pub files: usize,
    /// Download count including this one
    pub downloads: u64,
}

fn invalid(message: impl Into<String>) -> VersioningError {
    VersioningError::InvalidDataset(message.into())
}

fn file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| invalid(format!("invalid file path: {}", path.display())))
}

pub struct DatasetService<'a> {
    orchestrator: PublicationOrchestrator<'a>,
    repo: DatasetRepository,
}

impl<'a> DatasetService<'a> {
    pub fn new(orchestrator: PublicationOrchestrator<'a>) -> Self {
        Self {
            orchestrator,
            repo: DatasetRepository,
        }
    }

    pub fn orchestrator(&self) -> &PublicationOrchestrator<'a> {
        &self.orchestrator
    }

    /// Creates a dataset with its files and its initial version 1.0
    ///
    /// Rows commit together; copied bytes are removed if the commit fails.
    pub fn create_from_form(&self, form: NewDataset) -> Result<Dataset> {
        form.validate()?;

        let db = self.orchestrator.database();
        let storage = self.orchestrator.file_storage();
        let tx = db.transaction()?;

        let metadata = DatasetMetadata {
            id: 0,
            deposition_id: None,
            title: form.title.trim().to_string(),
            description: form.description.clone(),
            publication_type: form.publication_type,
            publication_doi: form.publication_doi.clone().filter(|d| !d.trim().is_empty()),
            dataset_doi: None,
            tags: form.normalized_tags(),
        };
        let metadata_id = self.repo.insert_metadata(&tx, &metadata)?;
        let dataset_id =
            self.repo
                .insert_dataset(&tx, form.owner_id, metadata_id, &form.kind, Utc::now())?;

        let staged = (|| -> Result<()> {
            for path in &form.files {
                let name = file_name(path)?;
                let dest = storage.copy_into(path, form.owner_id, dataset_id, name)?;
                let digest = digest_file(&dest)?;

                let stem = Path::new(name)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or(name);
                let group_id = self.repo.insert_file_group(
                    &tx,
                    dataset_id,
                    &FileGroup {
                        id: 0,
                        csv_filename: name.to_string(),
                        title: stem.to_string(),
                        description: String::new(),
                        publication_doi: None,
                        tags: None,
                        csv_version: None,
                        files: Vec::new(),
                    },
                )?;
                self.repo.insert_file_entry(
                    &tx,
                    group_id,
                    &FileEntry {
                        id: 0,
                        name: name.to_string(),
                        checksum: digest.checksum,
                        size: digest.size,
                    },
                )?;
            }

            self.orchestrator
                .ledger()
                .create_initial_version(&tx, dataset_id, &metadata.title)?;
            Ok(())
        })();

        if let Err(e) = staged.and_then(|()| tx.commit().map_err(Into::into)) {
            if let Err(cleanup) = storage.remove_dataset_dir(form.owner_id, dataset_id) {
                warn!(dataset_id, error = %cleanup, "failed to clean up files of rolled-back dataset");
            }
            return Err(e);
        }

        info!(dataset_id, owner = form.owner_id, files = form.files.len(), "created dataset");
        self.get(dataset_id)
    }

    /// Clones a dataset and registers it under an explicit version number
    ///
    /// Fails with [`VersioningError::DuplicateVersion`] if the number is taken.
    pub fn create_version(
        &self,
        dataset_id: DatasetId,
        major: u32,
        minor: u32,
        changelog: Option<&str>,
    ) -> Result<Version> {
        let number = VersionNumber::new(major, minor);
        let (_, version, outcome) =
            self.orchestrator
                .materialize(dataset_id, NumberChoice::Exact(number), changelog, None)?;

        info!(
            source = dataset_id,
            dataset_id = outcome.dataset.id,
            version = %version.number,
            "created version"
        );
        Ok(version)
    }

    /// Version history of the dataset's concept, ordered by `(major, minor)`
    pub fn get_dataset_versions(&self, dataset_id: DatasetId) -> Result<Vec<Version>> {
        let conn = self.orchestrator.database().conn();
        if !self.repo.exists(conn, dataset_id)? {
            return Err(VersioningError::DatasetNotFound(dataset_id));
        }
        self.orchestrator.ledger().versions_for_dataset(conn, dataset_id)
    }

    pub fn get(&self, dataset_id: DatasetId) -> Result<Dataset> {
        self.repo
            .get(self.orchestrator.database().conn(), dataset_id)?
            .ok_or(VersioningError::DatasetNotFound(dataset_id))
    }

    pub fn list(&self, owner: OwnerId, filter: SyncFilter) -> Result<Vec<Dataset>> {
        Ok(self
            .repo
            .list_by_owner(self.orchestrator.database().conn(), owner, filter)?)
    }

    /// Datasets of `owner` that carry a registry DOI
    pub fn list_synchronized(&self, owner: OwnerId) -> Result<Vec<Dataset>> {
        self.list(owner, SyncFilter::Synced)
    }

    /// Datasets of `owner` not yet in the registry
    pub fn list_local(&self, owner: OwnerId) -> Result<Vec<Dataset>> {
        self.list(owner, SyncFilter::Local)
    }

    /// Packages a dataset's files into a zip archive and counts the download
    ///
    /// A directory `dest` receives `dataset_{id}.zip`; any other path is used
    /// as the archive path. The counter only moves once the archive is written.
    pub fn download(&self, dataset_id: DatasetId, dest: &Path) -> Result<DownloadReceipt> {
        let dataset = self.get(dataset_id)?;

        let archive = if dest.is_dir() {
            dest.join(format!("dataset_{}.zip", dataset_id))
        } else {
            dest.to_path_buf()
        };

        let files = self
            .orchestrator
            .file_storage()
            .package(dataset.owner_id, dataset_id, &archive)?;
        let downloads = self
            .repo
            .record_download(self.orchestrator.database().conn(), dataset_id)?
            .ok_or(VersioningError::DatasetNotFound(dataset_id))?;

        info!(dataset_id, files, downloads, archive = %archive.display(), "packaged dataset download");
        Ok(DownloadReceipt {
            dataset_id,
            archive,
            files,
            downloads,
        })
    }

    /// Deletes a dataset's rows, then its files
    ///
    /// The linked deposition, if any, is left in the registry.
    pub fn delete(&self, dataset_id: DatasetId) -> Result<Dataset> {
        let db = self.orchestrator.database();
        let tx = db.transaction()?;

        let dataset = self
            .repo
            .get(&tx, dataset_id)?
            .ok_or(VersioningError::DatasetNotFound(dataset_id))?;
        self.repo.delete(&tx, dataset_id)?;
        tx.commit()?;

        if let Err(e) = self
            .orchestrator
            .file_storage()
            .remove_dataset_dir(dataset.owner_id, dataset_id)
        {
            warn!(dataset_id, error = %e, "failed to remove dataset files");
        }

        info!(dataset_id, "deleted dataset");
        Ok(dataset)
    }
}
