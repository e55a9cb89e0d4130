//! Dataset repository
//!
//! Row-level reads and writes for datasets, their metadata and their files.
//! Every method takes a `&Connection`; none of them opens a transaction.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::db::{parse_column, parse_optional_column};
use super::files::FileDigest;
use crate::domain::{
    Dataset, DatasetId, DatasetKind, DatasetMetadata, Doi, FileEntry, FileEntryId, FileGroup,
    FileGroupId, MetadataId, MetadataPatch, OwnerId, TabularPayload, Version, VersionNumber,
};

/// Which datasets a listing returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncFilter {
    #[default]
    All,
    /// Datasets whose metadata carries a registry DOI
    Synced,
    /// Datasets without a registry DOI
    Local,
}

impl SyncFilter {
    fn clause(&self) -> &'static str {
        match self {
            SyncFilter::All => "",
            SyncFilter::Synced => " AND m.dataset_doi IS NOT NULL",
            SyncFilter::Local => " AND m.dataset_doi IS NULL",
        }
    }
}

/// Columns selected by [`version_from_row`], in order
pub(crate) const VERSION_COLUMNS: &str =
    "id, concept_id, dataset_id, major, minor, release_date, changelog";

/// Maps a row selected with [`VERSION_COLUMNS`]
pub(crate) fn version_from_row(row: &Row<'_>) -> rusqlite::Result<Version> {
    Ok(Version {
        id: row.get(0)?,
        concept_id: row.get(1)?,
        dataset_id: row.get(2)?,
        number: VersionNumber::new(row.get(3)?, row.get(4)?),
        release_date: row.get(5)?,
        changelog: row.get(6)?,
    })
}

const DATASET_SELECT: &str = "
    SELECT d.id, d.owner_id, d.created_at, d.kind, d.rows_count, d.schema_json,
           m.id, m.deposition_id, m.title, m.description, m.publication_type,
           m.publication_doi, m.dataset_doi, m.tags, d.downloads
    FROM datasets d
    JOIN dataset_metadata m ON m.id = d.metadata_id";

/// Repository for dataset rows
#[derive(Debug, Clone, Copy, Default)]
pub struct DatasetRepository;

impl DatasetRepository {
    /// Inserts a metadata row; `meta.id` is ignored
    pub fn insert_metadata(
        &self,
        conn: &Connection,
        meta: &DatasetMetadata,
    ) -> rusqlite::Result<MetadataId> {
        conn.execute(
            "INSERT INTO dataset_metadata
                (deposition_id, title, description, publication_type, publication_doi, dataset_doi, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                meta.deposition_id,
                meta.title,
                meta.description,
                meta.publication_type.as_str(),
                meta.publication_doi,
                meta.dataset_doi.as_ref().map(Doi::as_str),
                meta.tags,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Inserts a dataset row pointing at an existing metadata row
    pub fn insert_dataset(
        &self,
        conn: &Connection,
        owner: OwnerId,
        metadata_id: MetadataId,
        kind: &DatasetKind,
        created_at: DateTime<Utc>,
    ) -> rusqlite::Result<DatasetId> {
        let (rows_count, schema_json) = match kind {
            DatasetKind::Tabular(payload) => (payload.rows_count, payload.schema_json.as_deref()),
        };

        conn.execute(
            "INSERT INTO datasets (owner_id, metadata_id, kind, rows_count, schema_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![owner, metadata_id, kind.as_str(), rows_count, schema_json, created_at],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Inserts a file group row; `group.id` and `group.files` are ignored
    pub fn insert_file_group(
        &self,
        conn: &Connection,
        dataset_id: DatasetId,
        group: &FileGroup,
    ) -> rusqlite::Result<FileGroupId> {
        conn.execute(
            "INSERT INTO file_groups
                (dataset_id, csv_filename, title, description, publication_doi, tags, csv_version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                dataset_id,
                group.csv_filename,
                group.title,
                group.description,
                group.publication_doi,
                group.tags,
                group.csv_version,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Inserts a file entry row; `entry.id` is ignored
    pub fn insert_file_entry(
        &self,
        conn: &Connection,
        group_id: FileGroupId,
        entry: &FileEntry,
    ) -> rusqlite::Result<FileEntryId> {
        conn.execute(
            "INSERT INTO file_entries (group_id, name, checksum, size) VALUES (?1, ?2, ?3, ?4)",
            params![group_id, entry.name, entry.checksum, entry.size as i64],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Loads a dataset with its metadata, file groups, files and version
    pub fn get(&self, conn: &Connection, id: DatasetId) -> rusqlite::Result<Option<Dataset>> {
        let sql = format!("{} WHERE d.id = ?1", DATASET_SELECT);
        let dataset = conn
            .query_row(&sql, params![id], dataset_from_row)
            .optional()?;

        match dataset {
            Some(mut dataset) => {
                dataset.file_groups = self.file_groups(conn, dataset.id)?;
                dataset.version = self.version_of(conn, dataset.id)?;
                Ok(Some(dataset))
            }
            None => Ok(None),
        }
    }

    /// Newest dataset whose metadata carries `doi`
    ///
    /// A metadata-only version keeps its source's DOI, so several datasets of
    /// one concept can share it; the most recent one wins.
    pub fn find_by_doi(&self, conn: &Connection, doi: &Doi) -> rusqlite::Result<Option<Dataset>> {
        let sql = format!(
            "{} WHERE m.dataset_doi = ?1 ORDER BY d.id DESC LIMIT 1",
            DATASET_SELECT
        );
        let dataset = conn
            .query_row(&sql, params![doi.as_str()], dataset_from_row)
            .optional()?;

        match dataset {
            Some(mut dataset) => {
                dataset.file_groups = self.file_groups(conn, dataset.id)?;
                dataset.version = self.version_of(conn, dataset.id)?;
                Ok(Some(dataset))
            }
            None => Ok(None),
        }
    }

    /// Bumps a dataset's download counter; returns the new count
    pub fn record_download(&self, conn: &Connection, id: DatasetId) -> rusqlite::Result<Option<u64>> {
        conn.query_row(
            "UPDATE datasets SET downloads = downloads + 1 WHERE id = ?1 RETURNING downloads",
            params![id],
            |row| row.get::<_, i64>(0).map(|n| n as u64),
        )
        .optional()
    }

    /// Returns true if a dataset row exists
    pub fn exists(&self, conn: &Connection, id: DatasetId) -> rusqlite::Result<bool> {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM datasets WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )
    }

    /// Lists an owner's datasets, newest first
    pub fn list_by_owner(
        &self,
        conn: &Connection,
        owner: OwnerId,
        filter: SyncFilter,
    ) -> rusqlite::Result<Vec<Dataset>> {
        let sql = format!(
            "{} WHERE d.owner_id = ?1{} ORDER BY d.created_at DESC, d.id DESC",
            DATASET_SELECT,
            filter.clause()
        );

        let mut stmt = conn.prepare(&sql)?;
        let mut datasets = stmt
            .query_map(params![owner], dataset_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        for dataset in &mut datasets {
            dataset.file_groups = self.file_groups(conn, dataset.id)?;
            dataset.version = self.version_of(conn, dataset.id)?;
        }

        Ok(datasets)
    }

    /// Applies a metadata-only edit; absent fields keep their value
    pub fn update_metadata(
        &self,
        conn: &Connection,
        metadata_id: MetadataId,
        patch: &MetadataPatch,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "UPDATE dataset_metadata SET
                title = COALESCE(?2, title),
                description = COALESCE(?3, description),
                tags = COALESCE(?4, tags),
                publication_type = COALESCE(?5, publication_type),
                publication_doi = COALESCE(?6, publication_doi)
             WHERE id = ?1",
            params![
                metadata_id,
                patch.title,
                patch.description,
                patch.tags,
                patch.publication_type,
                patch.publication_doi,
            ],
        )?;
        Ok(())
    }

    /// Stores the soft back-reference to a registry deposition
    pub fn set_deposition_id(
        &self,
        conn: &Connection,
        metadata_id: MetadataId,
        deposition_id: Option<i64>,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "UPDATE dataset_metadata SET deposition_id = ?2 WHERE id = ?1",
            params![metadata_id, deposition_id],
        )?;
        Ok(())
    }

    /// Stores the registry DOI, filling `publication_doi` only when it is empty
    pub fn set_dataset_doi(
        &self,
        conn: &Connection,
        metadata_id: MetadataId,
        doi: &Doi,
        publication_doi: Option<&str>,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "UPDATE dataset_metadata SET
                dataset_doi = ?2,
                publication_doi = COALESCE(NULLIF(publication_doi, ''), ?3)
             WHERE id = ?1",
            params![metadata_id, doi.as_str(), publication_doi],
        )?;
        Ok(())
    }

    /// Renames a file group's CSV
    pub fn set_group_filename(
        &self,
        conn: &Connection,
        group_id: FileGroupId,
        csv_filename: &str,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "UPDATE file_groups SET csv_filename = ?2 WHERE id = ?1",
            params![group_id, csv_filename],
        )?;
        Ok(())
    }

    /// Points a file entry at new bytes
    pub fn update_file_entry(
        &self,
        conn: &Connection,
        entry_id: FileEntryId,
        name: &str,
        digest: &FileDigest,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "UPDATE file_entries SET name = ?2, checksum = ?3, size = ?4 WHERE id = ?1",
            params![entry_id, name, digest.checksum, digest.size as i64],
        )?;
        Ok(())
    }

    /// Deletes a dataset, its metadata, files rows and version
    ///
    /// A concept left without versions is deleted too. Returns false if the
    /// dataset did not exist.
    pub fn delete(&self, conn: &Connection, id: DatasetId) -> rusqlite::Result<bool> {
        let metadata_id: Option<MetadataId> = conn
            .query_row(
                "SELECT metadata_id FROM datasets WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(metadata_id) = metadata_id else {
            return Ok(false);
        };

        let concept_id: Option<i64> = conn
            .query_row(
                "SELECT concept_id FROM versions WHERE dataset_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        conn.execute("DELETE FROM datasets WHERE id = ?1", params![id])?;
        conn.execute(
            "DELETE FROM dataset_metadata WHERE id = ?1",
            params![metadata_id],
        )?;

        if let Some(concept_id) = concept_id {
            let removed = conn.execute(
                "DELETE FROM concepts WHERE id = ?1
                 AND NOT EXISTS (SELECT 1 FROM versions WHERE concept_id = ?1)",
                params![concept_id],
            )?;
            if removed > 0 {
                debug!(concept_id, "removed concept without versions");
            }
        }

        Ok(true)
    }

    fn file_groups(&self, conn: &Connection, dataset_id: DatasetId) -> rusqlite::Result<Vec<FileGroup>> {
        let mut stmt = conn.prepare(
            "SELECT id, csv_filename, title, description, publication_doi, tags, csv_version
             FROM file_groups WHERE dataset_id = ?1 ORDER BY id",
        )?;
        let mut groups = stmt
            .query_map(params![dataset_id], |row| {
                Ok(FileGroup {
                    id: row.get(0)?,
                    csv_filename: row.get(1)?,
                    title: row.get(2)?,
                    description: row.get(3)?,
                    publication_doi: row.get(4)?,
                    tags: row.get(5)?,
                    csv_version: row.get(6)?,
                    files: Vec::new(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut files_stmt = conn.prepare(
            "SELECT id, name, checksum, size FROM file_entries WHERE group_id = ?1 ORDER BY id",
        )?;
        for group in &mut groups {
            group.files = files_stmt
                .query_map(params![group.id], |row| {
                    Ok(FileEntry {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        checksum: row.get(2)?,
                        size: row.get::<_, i64>(3)? as u64,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
        }

        Ok(groups)
    }

    fn version_of(&self, conn: &Connection, dataset_id: DatasetId) -> rusqlite::Result<Option<Version>> {
        let sql = format!("SELECT {} FROM versions WHERE dataset_id = ?1", VERSION_COLUMNS);
        conn.query_row(&sql, params![dataset_id], version_from_row)
            .optional()
    }
}

fn dataset_from_row(row: &Row<'_>) -> rusqlite::Result<Dataset> {
    let kind_name: String = row.get(3)?;
    let kind = match kind_name.as_str() {
        "tabular" => DatasetKind::Tabular(TabularPayload {
            rows_count: row.get(4)?,
            schema_json: row.get(5)?,
        }),
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown dataset kind '{}'", other).into(),
            ))
        }
    };

    Ok(Dataset {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        created_at: row.get(2)?,
        metadata: DatasetMetadata {
            id: row.get(6)?,
            deposition_id: row.get(7)?,
            title: row.get(8)?,
            description: row.get(9)?,
            publication_type: parse_column(row, 10)?,
            publication_doi: row.get(11)?,
            dataset_doi: parse_optional_column(row, 12)?,
            tags: row.get(13)?,
        },
        kind,
        file_groups: Vec::new(),
        downloads: row.get::<_, i64>(14)? as u64,
        version: None,
    })
}
