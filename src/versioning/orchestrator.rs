//! Publication orchestrator
//!
//! Coordinates the clone engine, the version ledger and the registry to
//! create new versions and to synchronize datasets with the registry.
//!
//! Metadata writes for one operation share one transaction. File copies and
//! registry calls happen alongside it, not inside it: registry calls are made
//! only after the metadata transaction has committed.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::clone::{CloneEngine, CloneOutcome, SkippedFile};
use super::error::{Result, VersioningError};
use super::ledger::VersionLedger;
use crate::domain::{
    Concept, Dataset, DatasetId, Deposition, DepositionId, DepositionMetadata, Doi, FileEntry,
    FileGroup, MetadataPatch, PublicationType, Version, VersionNumber,
};
use crate::registry::{FileSource, RegistryAdapter, RegistryError};
use crate::storage::{digest_file, Database, DatasetRepository, FileStorage};

/// Whether a dataset is known to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Synced,
    Local,
}

impl SyncStatus {
    /// A dataset is synced iff its metadata carries a registry DOI
    pub fn of(dataset: &Dataset) -> Self {
        if dataset.metadata.is_synced() {
            SyncStatus::Synced
        } else {
            SyncStatus::Local
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Local => "local",
        }
    }
}

/// Parameters of a new-version request
#[derive(Debug, Clone, Default)]
pub struct NewVersionRequest {
    pub bump_major: bool,
    pub changelog: Option<String>,
    /// CSV replacing the new version's file; `None` for a metadata-only bump
    pub replacement: Option<PathBuf>,
}

impl NewVersionRequest {
    pub fn replaces_files(&self) -> bool {
        self.replacement.is_some()
    }
}

/// What happened on the registry side of a new version
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RegistryUpdate {
    /// The source dataset has no deposition
    NotLinked,
    /// Label bumped and recorded in history; DOI unchanged
    LabelUpdated { deposition_id: DepositionId },
    /// New file uploaded and published under a new DOI
    Published { deposition_id: DepositionId, doi: Doi },
}

/// Result of [`PublicationOrchestrator::create_new_version`]
#[derive(Debug)]
pub struct NewVersionOutcome {
    pub version: Version,
    pub dataset: Dataset,
    pub files_skipped: Vec<SkippedFile>,
    /// The version is committed either way; a registry failure lands here
    pub registry: Result<RegistryUpdate>,
}

/// Result of a successful synchronization
#[derive(Debug, Clone, Serialize)]
pub struct SyncReceipt {
    pub dataset_id: DatasetId,
    pub deposition_id: DepositionId,
    pub doi: Doi,
    pub publication_doi: Option<String>,
}

/// Where a DOI points: the newest dataset carrying it and its deposition
#[derive(Debug, Clone, Serialize)]
pub struct DoiResolution {
    pub doi: Doi,
    pub dataset: Option<Dataset>,
    pub deposition: Option<Deposition>,
    /// The deposition has since been republished under another DOI
    pub superseded: bool,
}

/// How the number of a materialized version is chosen
#[derive(Debug, Clone, Copy)]
pub enum NumberChoice {
    /// Next number after the concept's latest version
    Next { bump_major: bool },
    /// A caller-supplied number
    Exact(VersionNumber),
}

pub struct PublicationOrchestrator<'a> {
    db: &'a Database,
    registry: &'a dyn RegistryAdapter,
    ledger: VersionLedger,
    cloner: CloneEngine,
    repo: DatasetRepository,
    domain: String,
}

impl<'a> PublicationOrchestrator<'a> {
    pub fn new(
        db: &'a Database,
        registry: &'a dyn RegistryAdapter,
        files: FileStorage,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            db,
            registry,
            ledger: VersionLedger,
            cloner: CloneEngine::new(files),
            repo: DatasetRepository,
            domain: domain.into(),
        }
    }

    pub fn database(&self) -> &'a Database {
        self.db
    }

    pub fn registry(&self) -> &'a dyn RegistryAdapter {
        self.registry
    }

    pub fn ledger(&self) -> &VersionLedger {
        &self.ledger
    }

    pub fn file_storage(&self) -> &FileStorage {
        self.cloner.file_storage()
    }

    pub fn synchronization_status(&self, dataset: &Dataset) -> SyncStatus {
        SyncStatus::of(dataset)
    }

    /// Creates the next version of a dataset
    ///
    /// Clones the dataset, registers the next number against the clone and,
    /// when a replacement file is given, swaps it in. All of that commits
    /// together. Then, if the source dataset is linked to a deposition, either
    /// publishes the new file (new DOI) or only records the new label (DOI
    /// unchanged).
    pub fn create_new_version(
        &self,
        dataset_id: DatasetId,
        request: NewVersionRequest,
    ) -> Result<NewVersionOutcome> {
        let (source, version, outcome) = self.materialize(
            dataset_id,
            NumberChoice::Next {
                bump_major: request.bump_major,
            },
            request.changelog.as_deref(),
            request.replacement.as_deref(),
        )?;

        let mut dataset = outcome.dataset;
        let registry = match source.metadata.deposition_id {
            None => Ok(RegistryUpdate::NotLinked),
            Some(deposition_id) => {
                self.update_registry(deposition_id, &mut dataset, version.number, &request)
            }
        };

        if let Err(e) = &registry {
            warn!(dataset_id = dataset.id, error = %e, "registry update failed for new version");
        }

        info!(
            source = dataset_id,
            dataset_id = dataset.id,
            version = %version.number,
            "created new version"
        );

        Ok(NewVersionOutcome {
            version,
            dataset,
            files_skipped: outcome.files_skipped,
            registry,
        })
    }

    /// Clones a dataset and registers a version for the clone, in one transaction
    ///
    /// Returns the source, the new version and the clone. No registry calls.
    pub fn materialize(
        &self,
        dataset_id: DatasetId,
        number: NumberChoice,
        changelog: Option<&str>,
        replacement: Option<&Path>,
    ) -> Result<(Dataset, Version, CloneOutcome)> {
        let tx = self.db.transaction()?;

        let source = self
            .repo
            .get(&tx, dataset_id)?
            .ok_or(VersioningError::DatasetNotFound(dataset_id))?;
        let concept = self.resolve_concept(&tx, &source)?;

        let mut outcome = self.cloner.clone(&tx, &source)?;
        let new_id = outcome.dataset.id;

        let staged = (|| -> Result<Version> {
            let number = match number {
                NumberChoice::Next { bump_major } => {
                    self.ledger.next_version_numbers(&concept, bump_major)
                }
                NumberChoice::Exact(number) => number,
            };
            let version =
                self.ledger
                    .register_version(&tx, concept.id, new_id, number, changelog)?;

            if let Some(path) = replacement {
                outcome.dataset = self.replace_file(&tx, &outcome.dataset, path)?;
            }
            outcome.dataset.version = Some(version.clone());
            Ok(version)
        })();

        let version = match staged.and_then(|v| tx.commit().map(|()| v).map_err(Into::into)) {
            Ok(version) => version,
            Err(e) => {
                self.discard_files(&outcome.dataset);
                return Err(e);
            }
        };

        Ok((source, version, outcome))
    }

    /// Creates the preliminary draft deposition for a dataset
    ///
    /// Returns the linked deposition id when it still exists in the registry.
    pub fn prepare_deposition(&self, dataset_id: DatasetId) -> Result<DepositionId> {
        let dataset = self.load(dataset_id)?;

        if dataset.is_synced() {
            return Err(VersioningError::AlreadySynced(dataset_id));
        }

        if let Some(existing) = dataset.metadata.deposition_id {
            match self.registry.get_doi(existing) {
                Ok(_) => return Ok(existing),
                Err(RegistryError::NotFound(_)) => {
                    warn!(dataset_id, deposition_id = existing, "linked deposition is gone, creating a new one");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let label = self
            .ledger
            .concept_for_dataset(self.db.conn(), dataset_id)?
            .as_ref()
            .and_then(Concept::latest_version)
            .map(Version::label)
            .or_else(|| dataset.version_label());

        let bag = DepositionMetadata {
            title: Some(dataset.metadata.title.clone()),
            description: Some(dataset.metadata.description.clone()),
            tags: dataset.metadata.tags.clone(),
            dataset_version: label,
            dataset_id: Some(dataset.id),
            ..Default::default()
        };

        let deposition = self.registry.create_deposition(bag)?;
        self.repo
            .set_deposition_id(self.db.conn(), dataset.metadata.id, Some(deposition.id))?;

        info!(dataset_id, deposition_id = deposition.id, "prepared deposition");
        Ok(deposition.id)
    }

    /// Uploads, publishes and records the DOI of a local dataset
    ///
    /// The dataset stays local unless every registry call succeeds.
    pub fn sync_dataset(&self, dataset_id: DatasetId) -> Result<SyncReceipt> {
        let dataset = self.load(dataset_id)?;

        if dataset.is_synced() {
            return Err(VersioningError::AlreadySynced(dataset_id));
        }

        let deposition_id = self.prepare_deposition(dataset_id)?;

        for file in dataset.files() {
            let path = self
                .file_storage()
                .file_path(dataset.owner_id, dataset.id, &file.name);
            self.registry
                .upload_file(deposition_id, &file.name, FileSource::Path(&path))?;
        }

        let published = self.registry.publish_deposition(deposition_id)?;
        let doi = self.registry.get_doi(deposition_id)?.unwrap_or(published);

        let publication_url = format!("http://{}/doi/{}", self.domain, doi);
        self.repo.set_dataset_doi(
            self.db.conn(),
            dataset.metadata.id,
            &doi,
            Some(&publication_url),
        )?;

        let synced = self.load(dataset_id)?;
        info!(dataset_id, deposition_id, doi = %doi, "synchronized dataset");

        Ok(SyncReceipt {
            dataset_id,
            deposition_id,
            doi,
            publication_doi: synced.metadata.publication_doi,
        })
    }

    /// Applies a metadata-only edit to a dataset and its deposition
    ///
    /// The deposition is patched first; it becomes dirty and keeps its DOI.
    pub fn edit_metadata(&self, dataset_id: DatasetId, patch: &MetadataPatch) -> Result<Dataset> {
        let mut patch = patch.clone();
        if let Some(raw) = &patch.publication_type {
            let publication_type: PublicationType = raw.parse()?;
            patch.publication_type = Some(publication_type.as_str().to_string());
        }
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(VersioningError::InvalidDataset(
                "title must not be empty".to_string(),
            ));
        }

        let dataset = self.load(dataset_id)?;

        if let Some(deposition_id) = dataset.metadata.deposition_id {
            self.registry.update_metadata(deposition_id, &patch)?;
            debug!(dataset_id, deposition_id, "patched deposition metadata");
        }

        self.repo
            .update_metadata(self.db.conn(), dataset.metadata.id, &patch)?;

        self.load(dataset_id)
    }

    /// Resolves a DOI to its dataset and deposition
    ///
    /// Superseded DOIs still resolve: older versions keep the DOI they were
    /// published under, and the registry remembers every DOI it minted.
    pub fn resolve_doi(&self, doi: &Doi) -> Result<DoiResolution> {
        let dataset = self.repo.find_by_doi(self.db.conn(), doi)?;
        let deposition = match self.registry.find_by_doi(doi)? {
            Some(dep) => Some(dep),
            None => match dataset.as_ref().and_then(|d| d.metadata.deposition_id) {
                Some(id) => match self.registry.get_deposition(id) {
                    Ok(dep) => Some(dep),
                    Err(RegistryError::NotFound(_)) => None,
                    Err(e) => return Err(e.into()),
                },
                None => None,
            },
        };

        if dataset.is_none() && deposition.is_none() {
            return Err(VersioningError::UnknownDoi(doi.clone()));
        }

        let superseded = deposition
            .as_ref()
            .is_some_and(|dep| dep.doi.as_ref() != Some(doi));
        debug!(doi = %doi, dataset = ?dataset.as_ref().map(|d| d.id), superseded, "resolved DOI");

        Ok(DoiResolution {
            doi: doi.clone(),
            dataset,
            deposition,
            superseded,
        })
    }

    fn load(&self, dataset_id: DatasetId) -> Result<Dataset> {
        self.repo
            .get(self.db.conn(), dataset_id)?
            .ok_or(VersioningError::DatasetNotFound(dataset_id))
    }

    /// Concept of a dataset, from its version link or a ledger lookup
    fn resolve_concept(&self, conn: &Connection, dataset: &Dataset) -> Result<Concept> {
        if let Some(version) = &dataset.version {
            if let Some(concept) = self.ledger.concept(conn, version.concept_id)? {
                return Ok(concept);
            }
            debug!(dataset_id = dataset.id, "stale version link, falling back to ledger lookup");
        }

        self.ledger
            .concept_for_dataset(conn, dataset.id)?
            .ok_or(VersioningError::NoConcept(dataset.id))
    }

    fn update_registry(
        &self,
        deposition_id: DepositionId,
        dataset: &mut Dataset,
        number: VersionNumber,
        request: &NewVersionRequest,
    ) -> Result<RegistryUpdate> {
        if !request.replaces_files() {
            self.registry.set_version_label(deposition_id, number, true)?;
            return Ok(RegistryUpdate::LabelUpdated { deposition_id });
        }

        let previous = self
            .registry
            .get_deposition(deposition_id)?
            .metadata
            .dataset_version;
        self.registry.set_version_label(deposition_id, number, false)?;

        let published = (|| -> Result<Doi> {
            if let Some(group) = dataset.file_groups.first() {
                let name = &group.csv_filename;
                let path = self.file_storage().file_path(dataset.owner_id, dataset.id, name);
                self.registry
                    .upload_file(deposition_id, name, FileSource::Path(&path))?;
            }
            Ok(self.registry.publish_deposition(deposition_id)?)
        })();

        let doi = match published {
            Ok(doi) => doi,
            Err(e) => {
                self.restore_label(deposition_id, previous.as_deref());
                return Err(e);
            }
        };

        self.repo
            .set_dataset_doi(self.db.conn(), dataset.metadata.id, &doi, None)?;
        dataset.metadata.dataset_doi = Some(doi.clone());

        Ok(RegistryUpdate::Published { deposition_id, doi })
    }

    /// Puts back the label a failed publish had already overwritten
    fn restore_label(&self, deposition_id: DepositionId, previous: Option<&str>) {
        let Some(number) = previous.and_then(|label| label.parse::<VersionNumber>().ok()) else {
            warn!(deposition_id, previous, "cannot restore version label after failed publish");
            return;
        };
        if let Err(e) = self.registry.set_version_label(deposition_id, number, false) {
            warn!(deposition_id, error = %e, "failed to restore version label after failed publish");
        }
    }

    /// Swaps the first file group's CSV for `path`
    ///
    /// Files of the other groups are left in place.
    fn replace_file(&self, conn: &Connection, dataset: &Dataset, path: &Path) -> Result<Dataset> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                VersioningError::InvalidDataset(format!("invalid file path: {}", path.display()))
            })?
            .to_string();

        if !path.is_file() {
            return Err(VersioningError::InvalidDataset(format!(
                "replacement file not found: {}",
                path.display()
            )));
        }

        let taken_elsewhere = dataset
            .file_groups
            .iter()
            .skip(1)
            .any(|g| g.csv_filename == name || g.files.iter().any(|f| f.name == name));
        if taken_elsewhere {
            return Err(VersioningError::InvalidDataset(format!(
                "replacement file '{}' would overwrite another file group",
                name
            )));
        }

        let storage = self.file_storage();
        let mut removed = 0;
        if let Some(group) = dataset.file_groups.first() {
            let names = std::iter::once(&group.csv_filename).chain(group.files.iter().map(|f| &f.name));
            for old in names {
                if storage.remove_file(dataset.owner_id, dataset.id, old)? {
                    removed += 1;
                }
            }
        }
        let dest = storage.copy_into(path, dataset.owner_id, dataset.id, &name)?;
        let digest = digest_file(&dest)?;
        debug!(dataset_id = dataset.id, removed, file = %name, "replaced dataset file");

        match dataset.file_groups.first() {
            Some(group) => {
                self.repo.set_group_filename(conn, group.id, &name)?;
                match group.files.first() {
                    Some(entry) => self.repo.update_file_entry(conn, entry.id, &name, &digest)?,
                    None => {
                        self.repo.insert_file_entry(
                            conn,
                            group.id,
                            &FileEntry {
                                id: 0,
                                name: name.clone(),
                                checksum: digest.checksum.clone(),
                                size: digest.size,
                            },
                        )?;
                    }
                }
            }
            None => {
                let group_id = self.repo.insert_file_group(
                    conn,
                    dataset.id,
                    &FileGroup {
                        id: 0,
                        csv_filename: name.clone(),
                        title: dataset.metadata.title.clone(),
                        description: dataset.metadata.description.clone(),
                        publication_doi: None,
                        tags: dataset.metadata.tags.clone(),
                        csv_version: None,
                        files: Vec::new(),
                    },
                )?;
                self.repo.insert_file_entry(
                    conn,
                    group_id,
                    &FileEntry {
                        id: 0,
                        name: name.clone(),
                        checksum: digest.checksum,
                        size: digest.size,
                    },
                )?;
            }
        }

        self.repo
            .get(conn, dataset.id)?
            .ok_or(VersioningError::DatasetNotFound(dataset.id))
    }

    /// Best-effort removal of files copied for a rolled-back dataset
    fn discard_files(&self, dataset: &Dataset) {
        if let Err(e) = self
            .file_storage()
            .remove_dataset_dir(dataset.owner_id, dataset.id)
        {
            warn!(dataset_id = dataset.id, error = %e, "failed to clean up files of rolled-back dataset");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DatasetKind, DatasetMetadata, DepositionStatus, DEFAULT_DOI_PREFIX};
    use crate::registry::{DepositionStore, Fakenodo};
    use crate::versioning::service::{DatasetService, NewDataset};
    use std::cell::Cell;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        db: Database,
        registry: Fakenodo,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let db = Database::open_in_memory().unwrap();
            let store = DepositionStore::open_in_memory(DEFAULT_DOI_PREFIX).unwrap();
            let registry = Fakenodo::with_store(store, dir.path().join("registry"));
            Self { dir, db, registry }
        }

        fn storage(&self) -> FileStorage {
            FileStorage::new(self.dir.path().join("uploads"))
        }

        fn orchestrator(&self) -> PublicationOrchestrator<'_> {
            PublicationOrchestrator::new(&self.db, &self.registry, self.storage(), "hub.test")
        }

        fn orchestrator_with<'a>(
            &'a self,
            registry: &'a dyn RegistryAdapter,
        ) -> PublicationOrchestrator<'a> {
            PublicationOrchestrator::new(&self.db, registry, self.storage(), "hub.test")
        }

        fn csv(&self, name: &str, body: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            fs::write(&path, body).unwrap();
            path
        }

        /// Creates a versioned dataset (1.0) with one CSV
        fn dataset(&self) -> Dataset {
            let source = self.csv("sales.csv", "region,total\nnorth,10\n");
            let service = DatasetService::new(self.orchestrator());
            service
                .create_from_form(NewDataset {
                    owner_id: 1,
                    title: "Sales".to_string(),
                    description: "Quarterly sales".to_string(),
                    publication_type: PublicationType::Sales,
                    publication_doi: None,
                    tags: Some("retail".to_string()),
                    kind: DatasetKind::default(),
                    files: vec![source],
                })
                .unwrap()
        }
    }

    /// Registry double whose calls all fail
    struct FailingRegistry {
        calls: Cell<u32>,
    }

    impl FailingRegistry {
        fn fail<T>(&self, call: &'static str) -> std::result::Result<T, RegistryError> {
            self.calls.set(self.calls.get() + 1);
            Err(RegistryError::Call {
                call,
                message: "registry unavailable".to_string(),
            })
        }
    }

    impl RegistryAdapter for FailingRegistry {
        fn create_deposition(
            &self,
            _: DepositionMetadata,
        ) -> std::result::Result<crate::domain::Deposition, RegistryError> {
            self.fail("create_deposition")
        }
        fn upload_file(
            &self,
            _: DepositionId,
            _: &str,
            _: FileSource<'_>,
        ) -> std::result::Result<crate::domain::FileDescriptor, RegistryError> {
            self.fail("upload_file")
        }
        fn publish_deposition(&self, _: DepositionId) -> std::result::Result<Doi, RegistryError> {
            self.fail("publish_deposition")
        }
        fn get_doi(&self, _: DepositionId) -> std::result::Result<Option<Doi>, RegistryError> {
            self.fail("get_doi")
        }
        fn get_deposition(
            &self,
            _: DepositionId,
        ) -> std::result::Result<crate::domain::Deposition, RegistryError> {
            self.fail("get_deposition")
        }
        fn find_by_doi(
            &self,
            _: &Doi,
        ) -> std::result::Result<Option<crate::domain::Deposition>, RegistryError> {
            self.fail("find_by_doi")
        }
        fn update_metadata(
            &self,
            _: DepositionId,
            _: &MetadataPatch,
        ) -> std::result::Result<crate::domain::Deposition, RegistryError> {
            self.fail("update_metadata")
        }
        fn set_version_label(
            &self,
            _: DepositionId,
            _: VersionNumber,
            _: bool,
        ) -> std::result::Result<crate::domain::Deposition, RegistryError> {
            self.fail("set_version_label")
        }
    }

    /// Registry that works like the wrapped one except that publishing fails
    struct PublishRefused<'a> {
        inner: &'a Fakenodo,
    }

    impl RegistryAdapter for PublishRefused<'_> {
        fn create_deposition(
            &self,
            metadata: DepositionMetadata,
        ) -> std::result::Result<crate::domain::Deposition, RegistryError> {
            self.inner.create_deposition(metadata)
        }
        fn upload_file(
            &self,
            id: DepositionId,
            name: &str,
            source: FileSource<'_>,
        ) -> std::result::Result<crate::domain::FileDescriptor, RegistryError> {
            self.inner.upload_file(id, name, source)
        }
        fn publish_deposition(&self, _: DepositionId) -> std::result::Result<Doi, RegistryError> {
            Err(RegistryError::Call {
                call: "publish_deposition",
                message: "archive offline".to_string(),
            })
        }
        fn get_doi(&self, id: DepositionId) -> std::result::Result<Option<Doi>, RegistryError> {
            self.inner.get_doi(id)
        }
        fn get_deposition(
            &self,
            id: DepositionId,
        ) -> std::result::Result<crate::domain::Deposition, RegistryError> {
            self.inner.get_deposition(id)
        }
        fn find_by_doi(
            &self,
            doi: &Doi,
        ) -> std::result::Result<Option<crate::domain::Deposition>, RegistryError> {
            self.inner.find_by_doi(doi)
        }
        fn update_metadata(
            &self,
            id: DepositionId,
            patch: &MetadataPatch,
        ) -> std::result::Result<crate::domain::Deposition, RegistryError> {
            self.inner.update_metadata(id, patch)
        }
        fn set_version_label(
            &self,
            id: DepositionId,
            number: VersionNumber,
            append_history: bool,
        ) -> std::result::Result<crate::domain::Deposition, RegistryError> {
            self.inner.set_version_label(id, number, append_history)
        }
    }

    #[test]
    fn minor_version_without_replacement_keeps_doi() {
        let fx = Fixture::new();
        let orch = fx.orchestrator();
        let d = fx.dataset();

        let receipt = orch.sync_dataset(d.id).unwrap();
        let dep_before = fx.registry.store().require(receipt.deposition_id).unwrap();

        let outcome = orch
            .create_new_version(
                d.id,
                NewVersionRequest {
                    changelog: Some("typo fix".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_ne!(outcome.dataset.id, d.id);
        assert_eq!(outcome.version.number, VersionNumber::new(1, 1));
        assert_eq!(outcome.version.dataset_id, outcome.dataset.id);
        assert_eq!(
            outcome.version.concept_id,
            d.version.as_ref().unwrap().concept_id
        );
        assert_eq!(
            outcome.registry.unwrap(),
            RegistryUpdate::LabelUpdated {
                deposition_id: receipt.deposition_id
            }
        );

        let dep = fx.registry.store().require(receipt.deposition_id).unwrap();
        assert_eq!(dep.metadata.dataset_version.as_deref(), Some("1.1"));
        assert_eq!(dep.doi, dep_before.doi);
        assert_eq!(dep.metadata.versions.len(), dep_before.metadata.versions.len() + 1);
        assert_eq!(dep.metadata.versions.last().unwrap().doi, dep_before.doi);
    }

    #[test]
    fn major_version_with_replacement_publishes_new_doi() {
        let fx = Fixture::new();
        let orch = fx.orchestrator();
        let d = fx.dataset();
        let first = orch.sync_dataset(d.id).unwrap();

        let replacement = fx.csv("sales_v2.csv", "region,total\nnorth,12\nsouth,4\n");
        let outcome = orch
            .create_new_version(
                d.id,
                NewVersionRequest {
                    bump_major: true,
                    changelog: Some("new quarter".to_string()),
                    replacement: Some(replacement.clone()),
                },
            )
            .unwrap();

        assert_eq!(outcome.version.number, VersionNumber::new(2, 0));
        let RegistryUpdate::Published { doi, .. } = outcome.registry.unwrap() else {
            panic!("expected a publish");
        };
        assert_ne!(doi, first.doi);

        let new_dataset = DatasetRepository
            .get(fx.db.conn(), outcome.dataset.id)
            .unwrap()
            .unwrap();
        assert_eq!(new_dataset.metadata.dataset_doi.as_ref(), Some(&doi));
        assert_eq!(new_dataset.file_groups[0].csv_filename, "sales_v2.csv");
        let entry = &new_dataset.file_groups[0].files[0];
        assert_eq!(entry.name, "sales_v2.csv");
        assert_eq!(entry.checksum, digest_file(&replacement).unwrap().checksum);

        let dir = fx.storage().dataset_dir(1, new_dataset.id);
        assert!(dir.join("sales_v2.csv").is_file());
        assert!(!dir.join("sales.csv").exists());

        let original = DatasetRepository.get(fx.db.conn(), d.id).unwrap().unwrap();
        assert_eq!(original.metadata.dataset_doi, Some(first.doi));

        let dep = fx.registry.store().require(first.deposition_id).unwrap();
        assert_eq!(dep.metadata.dataset_version.as_deref(), Some("2.0"));
        assert_eq!(dep.metadata.versions.last().unwrap().version, "2.0");
    }

    #[test]
    fn unlinked_dataset_skips_registry() {
        let fx = Fixture::new();
        let d = fx.dataset();

        let outcome = fx
            .orchestrator()
            .create_new_version(d.id, NewVersionRequest::default())
            .unwrap();

        assert_eq!(outcome.registry.unwrap(), RegistryUpdate::NotLinked);
        assert!(fx.registry.store().list().unwrap().is_empty());
    }

    #[test]
    fn new_version_needs_a_concept() {
        let fx = Fixture::new();
        let repo = DatasetRepository;
        let meta_id = repo
            .insert_metadata(
                fx.db.conn(),
                &DatasetMetadata {
                    id: 0,
                    deposition_id: None,
                    title: "Legacy".to_string(),
                    description: "pre-versioning".to_string(),
                    publication_type: PublicationType::None,
                    publication_doi: None,
                    dataset_doi: None,
                    tags: None,
                },
            )
            .unwrap();
        let id = repo
            .insert_dataset(fx.db.conn(), 1, meta_id, &DatasetKind::default(), chrono::Utc::now())
            .unwrap();

        let err = fx
            .orchestrator()
            .create_new_version(id, NewVersionRequest::default())
            .unwrap_err();

        assert!(matches!(err, VersioningError::NoConcept(d) if d == id));
        let datasets: i64 = fx
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM datasets", [], |row| row.get(0))
            .unwrap();
        assert_eq!(datasets, 1);
    }

    #[test]
    fn duplicate_exact_number_rolls_back_clone() {
        let fx = Fixture::new();
        let orch = fx.orchestrator();
        let d = fx.dataset();

        let err = orch
            .materialize(d.id, NumberChoice::Exact(VersionNumber::INITIAL), None, None)
            .unwrap_err();

        assert!(matches!(err, VersioningError::DuplicateVersion { .. }));
        let datasets: i64 = fx
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM datasets", [], |row| row.get(0))
            .unwrap();
        assert_eq!(datasets, 1);
        // The clone's copied bytes were cleaned up
        let user_dir = fx.storage().root().join("user_1");
        assert_eq!(fs::read_dir(user_dir).unwrap().count(), 1);
    }

    #[test]
    fn sync_sets_doi_and_publication_url() {
        let fx = Fixture::new();
        let orch = fx.orchestrator();
        let d = fx.dataset();
        assert_eq!(orch.synchronization_status(&d), SyncStatus::Local);

        let receipt = orch.sync_dataset(d.id).unwrap();
        let synced = DatasetRepository.get(fx.db.conn(), d.id).unwrap().unwrap();

        assert_eq!(orch.synchronization_status(&synced), SyncStatus::Synced);
        assert_eq!(synced.metadata.dataset_doi.as_ref(), Some(&receipt.doi));
        assert_eq!(synced.metadata.deposition_id, Some(receipt.deposition_id));
        assert_eq!(
            synced.metadata.publication_doi,
            Some(format!("http://hub.test/doi/{}", receipt.doi))
        );

        let dep = fx.registry.store().require(receipt.deposition_id).unwrap();
        assert_eq!(dep.status, DepositionStatus::Published);
        assert_eq!(dep.metadata.files.len(), 1);
        assert_eq!(dep.metadata.dataset_version.as_deref(), Some("1.0"));
        assert_eq!(dep.metadata.versions.len(), 1);

        assert!(matches!(
            orch.sync_dataset(d.id),
            Err(VersioningError::AlreadySynced(_))
        ));
    }

    #[test]
    fn prepare_reuses_linked_deposition() {
        let fx = Fixture::new();
        let orch = fx.orchestrator();
        let d = fx.dataset();

        let first = orch.prepare_deposition(d.id).unwrap();
        let second = orch.prepare_deposition(d.id).unwrap();
        assert_eq!(first, second);

        let dep = fx.registry.store().require(first).unwrap();
        assert_eq!(dep.status, DepositionStatus::Draft);
        assert_eq!(dep.metadata.dataset_id, Some(d.id));
        assert_eq!(dep.metadata.title.as_deref(), Some("Sales"));
    }

    #[test]
    fn prepare_replaces_stale_link() {
        let fx = Fixture::new();
        let orch = fx.orchestrator();
        let d = fx.dataset();

        let first = orch.prepare_deposition(d.id).unwrap();
        fx.registry.delete_deposition(first).unwrap();

        let second = orch.prepare_deposition(d.id).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn failed_registry_leaves_dataset_local() {
        let fx = Fixture::new();
        let failing = FailingRegistry { calls: Cell::new(0) };
        let orch = fx.orchestrator_with(&failing);
        let d = fx.dataset();

        let err = orch.sync_dataset(d.id).unwrap_err();

        assert!(matches!(err, VersioningError::RegistryCall(_)));
        assert_eq!(failing.calls.get(), 1);
        let after = DatasetRepository.get(fx.db.conn(), d.id).unwrap().unwrap();
        assert!(!after.is_synced());
        assert!(after.metadata.deposition_id.is_none());
    }

    #[test]
    fn registry_failure_on_new_version_is_surfaced() {
        let fx = Fixture::new();
        let d = fx.dataset();
        fx.orchestrator().sync_dataset(d.id).unwrap();

        let failing = FailingRegistry { calls: Cell::new(0) };
        let outcome = fx
            .orchestrator_with(&failing)
            .create_new_version(d.id, NewVersionRequest::default())
            .unwrap();

        assert_eq!(outcome.version.number, VersionNumber::new(1, 1));
        assert!(matches!(outcome.registry, Err(VersioningError::RegistryCall(_))));
    }

    #[test]
    fn failed_publish_of_replacement_restores_label() {
        let fx = Fixture::new();
        let d = fx.dataset();
        let receipt = fx.orchestrator().sync_dataset(d.id).unwrap();
        let before = fx.registry.store().require(receipt.deposition_id).unwrap();

        let refusing = PublishRefused { inner: &fx.registry };
        let replacement = fx.csv("sales_v2.csv", "region,total\nnorth,12\n");
        let outcome = fx
            .orchestrator_with(&refusing)
            .create_new_version(
                d.id,
                NewVersionRequest {
                    bump_major: true,
                    replacement: Some(replacement),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(outcome.version.number, VersionNumber::new(2, 0));
        assert!(matches!(outcome.registry, Err(VersioningError::RegistryCall(_))));

        let dep = fx.registry.store().require(receipt.deposition_id).unwrap();
        assert_eq!(dep.metadata.dataset_version.as_deref(), Some("1.0"));
        assert_eq!(dep.doi, before.doi);
        assert_eq!(dep.metadata.versions, before.metadata.versions);

        let clone = DatasetRepository
            .get(fx.db.conn(), outcome.dataset.id)
            .unwrap()
            .unwrap();
        assert_eq!(clone.metadata.dataset_doi, Some(receipt.doi));
    }

    #[test]
    fn replacement_only_touches_first_group() {
        let fx = Fixture::new();
        let a = fx.csv("a.csv", "x\n1\n");
        let b = fx.csv("b.csv", "y\n2\n");
        let d = DatasetService::new(fx.orchestrator())
            .create_from_form(NewDataset {
                owner_id: 1,
                title: "Pair".to_string(),
                description: "two files".to_string(),
                publication_type: PublicationType::Other,
                publication_doi: None,
                tags: None,
                kind: DatasetKind::default(),
                files: vec![a, b],
            })
            .unwrap();

        let replacement = fx.csv("a_v2.csv", "x\n5\n");
        let outcome = fx
            .orchestrator()
            .create_new_version(
                d.id,
                NewVersionRequest {
                    replacement: Some(replacement),
                    ..Default::default()
                },
            )
            .unwrap();

        let clone = &outcome.dataset;
        let dir = fx.storage().dataset_dir(1, clone.id);
        assert!(!dir.join("a.csv").exists());
        assert!(dir.join("a_v2.csv").is_file());
        assert!(dir.join("b.csv").is_file());
        assert_eq!(clone.file_groups[0].files[0].name, "a_v2.csv");
        assert_eq!(clone.file_groups[1].files[0].name, "b.csv");
        for entry in clone.files() {
            assert!(dir.join(&entry.name).is_file(), "{} missing", entry.name);
        }

        let clash = fx.csv("b.csv", "z\n");
        let err = fx
            .orchestrator()
            .create_new_version(
                d.id,
                NewVersionRequest {
                    replacement: Some(clash),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, VersioningError::InvalidDataset(_)));
    }

    #[test]
    fn stale_concept_link_falls_back_to_ledger() {
        let fx = Fixture::new();
        let orch = fx.orchestrator();
        let d = fx.dataset();
        let concept_id = d.version.as_ref().unwrap().concept_id;

        let mut stale = d.clone();
        stale.version.as_mut().unwrap().concept_id = concept_id + 100;

        let concept = orch.resolve_concept(fx.db.conn(), &stale).unwrap();
        assert_eq!(concept.id, concept_id);
        assert_eq!(concept.versions.len(), 1);
    }

    #[test]
    fn resolve_doi_finds_current_and_superseded() {
        let fx = Fixture::new();
        let orch = fx.orchestrator();
        let d = fx.dataset();
        let first = orch.sync_dataset(d.id).unwrap();

        let replacement = fx.csv("sales_v2.csv", "region,total\nsouth,4\n");
        let outcome = orch
            .create_new_version(
                d.id,
                NewVersionRequest {
                    bump_major: true,
                    replacement: Some(replacement),
                    ..Default::default()
                },
            )
            .unwrap();
        let RegistryUpdate::Published { doi: second, .. } = outcome.registry.unwrap() else {
            panic!("expected a publish");
        };

        let old = orch.resolve_doi(&first.doi).unwrap();
        assert_eq!(old.dataset.as_ref().map(|d| d.id), Some(d.id));
        assert_eq!(old.deposition.as_ref().map(|d| d.id), Some(first.deposition_id));
        assert!(old.superseded);

        let current = orch.resolve_doi(&second).unwrap();
        assert_eq!(current.dataset.as_ref().map(|d| d.id), Some(outcome.dataset.id));
        assert!(!current.superseded);

        let unknown: Doi = "10.5281/fakenodo.1000000".parse().unwrap();
        assert!(matches!(
            orch.resolve_doi(&unknown),
            Err(VersioningError::UnknownDoi(_))
        ));
    }

    #[test]
    fn edit_metadata_keeps_doi_and_marks_dirty() {
        let fx = Fixture::new();
        let orch = fx.orchestrator();
        let d = fx.dataset();
        let receipt = orch.sync_dataset(d.id).unwrap();

        let patch = MetadataPatch {
            title: Some("Sales (revised)".to_string()),
            ..Default::default()
        }
        .with_tag_list(["retail", "q3"]);
        let edited = orch.edit_metadata(d.id, &patch).unwrap();

        assert_eq!(edited.metadata.title, "Sales (revised)");
        assert_eq!(edited.metadata.tags.as_deref(), Some("retail,q3"));
        assert_eq!(edited.metadata.dataset_doi.as_ref(), Some(&receipt.doi));

        let dep = fx.registry.store().require(receipt.deposition_id).unwrap();
        assert!(dep.dirty);
        assert_eq!(dep.doi.as_ref(), Some(&receipt.doi));
        assert_eq!(dep.metadata.title.as_deref(), Some("Sales (revised)"));
    }

    #[test]
    fn edit_metadata_rejects_unknown_publication_type() {
        let fx = Fixture::new();
        let d = fx.dataset();

        let patch = MetadataPatch {
            publication_type: Some("poetry".to_string()),
            ..Default::default()
        };
        let err = fx.orchestrator().edit_metadata(d.id, &patch).unwrap_err();
        assert!(matches!(err, VersioningError::InvalidDataset(_)));
    }
}
