//! Deposition state machine
//!
//! States: `draft` (no DOI) and `published` (has DOI). The `dirty` flag is
//! orthogonal and means "metadata changed since the last publish".
//!
//! Every mutation runs in its own transaction on the registry database, so a
//! failed call leaves the deposition exactly as it was.
//!
//! Every DOI ever minted is kept in `deposition_dois`, including ones a later
//! publish superseded and ones whose deposition was deleted. A DOI is never
//! handed out twice.

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{
    Deposition, DepositionId, DepositionMetadata, DepositionStatus, Doi, FileDescriptor,
    MetadataPatch, PublishReceipt, VersionChanges, VersionEntry, VersionNumber,
};
use crate::storage::{parse_column, parse_optional_column};

/// Attempts at drawing a DOI that is not already taken
const MAX_MINT_ATTEMPTS: u32 = 16;

#[derive(Debug, Error)]
pub enum DepositionError {
    #[error("Deposition {0} not found")]
    NotFound(DepositionId),

    #[error("Could not mint an unused DOI after {0} attempts")]
    DoiExhausted(u32),

    #[error("Invalid file name '{0}'")]
    InvalidFileName(String),

    #[error("Failed to store file '{name}': {source}")]
    File {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode metadata bag: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Registry database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, DepositionError>;

const DEPOSITION_COLUMNS: &str = "id, meta_data, status, doi, dirty, created_at, updated_at";

/// Persistent deposition records
pub struct DepositionStore {
    conn: Connection,
    doi_prefix: String,
    max_mint_attempts: u32,
}

impl DepositionStore {
    /// Schema version - bump when schema changes
    const SCHEMA_VERSION: i32 = 2;

    /// Opens (or creates) the registry database at `path`
    pub fn open(path: &Path, doi_prefix: impl Into<String>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(conn, doi_prefix.into())
    }

    /// Opens a private in-memory registry
    pub fn open_in_memory(doi_prefix: impl Into<String>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, doi_prefix.into())
    }

    fn with_connection(conn: Connection, doi_prefix: String) -> Result<Self> {
        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version < 1 {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS depositions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    meta_data TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'draft',
                    doi TEXT UNIQUE,
                    dirty INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                ",
            )?;
        }

        if version < 2 {
            // Backfill from current DOIs and from the DOIs in each bag's history
            conn.execute_batch(&format!(
                "
                CREATE TABLE IF NOT EXISTS deposition_dois (
                    doi TEXT PRIMARY KEY,
                    deposition_id INTEGER NOT NULL,
                    minted_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_deposition_dois_deposition
                    ON deposition_dois(deposition_id);

                INSERT OR IGNORE INTO deposition_dois (doi, deposition_id, minted_at)
                    SELECT doi, id, updated_at FROM depositions WHERE doi IS NOT NULL;
                INSERT OR IGNORE INTO deposition_dois (doi, deposition_id, minted_at)
                    SELECT json_extract(v.value, '$.doi'), d.id,
                           COALESCE(json_extract(v.value, '$.created_at'), d.updated_at)
                    FROM depositions d, json_each(d.meta_data, '$.versions') v
                    WHERE json_extract(v.value, '$.doi') IS NOT NULL;

                PRAGMA user_version = {};
                ",
                Self::SCHEMA_VERSION
            ))?;
        }

        Ok(Self {
            conn,
            doi_prefix,
            max_mint_attempts: MAX_MINT_ATTEMPTS,
        })
    }

    pub fn doi_prefix(&self) -> &str {
        &self.doi_prefix
    }

    /// Inserts a new draft deposition with no DOI
    pub fn create(&self, metadata: DepositionMetadata) -> Result<Deposition> {
        let now = Utc::now();
        let bag = serde_json::to_string(&metadata)?;

        self.conn.execute(
            "INSERT INTO depositions (meta_data, status, doi, dirty, created_at, updated_at)
             VALUES (?1, ?2, NULL, 0, ?3, ?3)",
            params![bag, DepositionStatus::Draft.as_str(), now],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(deposition_id = id, "created deposition");

        Ok(Deposition {
            id,
            metadata,
            status: DepositionStatus::Draft,
            doi: None,
            dirty: false,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get(&self, id: DepositionId) -> Result<Option<Deposition>> {
        load(&self.conn, id)
    }

    /// Like [`get`](Self::get), but a missing id is an error
    pub fn require(&self, id: DepositionId) -> Result<Deposition> {
        self.get(id)?.ok_or(DepositionError::NotFound(id))
    }

    pub fn list(&self) -> Result<Vec<Deposition>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM depositions ORDER BY id",
            DEPOSITION_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], deposition_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Deposition that minted `doi`, current or superseded
    pub fn get_by_doi(&self, doi: &Doi) -> Result<Option<Deposition>> {
        let deposition = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM depositions
                     WHERE id = (SELECT deposition_id FROM deposition_dois WHERE doi = ?1)",
                    DEPOSITION_COLUMNS
                ),
                params![doi.as_str()],
                deposition_from_row,
            )
            .optional()?;
        Ok(deposition)
    }

    /// Appends a file descriptor to the bag
    ///
    /// Never changes the DOI. Attaching to a published deposition marks it
    /// dirty; attaching to a draft does not.
    pub fn attach_file(&self, id: DepositionId, file: FileDescriptor) -> Result<Deposition> {
        self.mutate(id, |dep| {
            debug!(deposition_id = id, file = %file.file_name, "attaching file");
            dep.metadata.files.push(file);
            if dep.is_published() {
                dep.dirty = true;
            }
            Ok(())
        })
        .map(|(dep, ())| dep)
    }

    /// Merges a metadata-only edit and marks the deposition dirty
    pub fn update_metadata(&self, id: DepositionId, patch: &MetadataPatch) -> Result<Deposition> {
        self.mutate(id, |dep| {
            dep.metadata.merge(patch);
            dep.dirty = true;
            Ok(())
        })
        .map(|(dep, ())| dep)
    }

    /// Publishes a deposition
    ///
    /// Every call mints a new DOI, sets the status to published, appends a
    /// history entry and clears the dirty flag. Repeated calls are not
    /// idempotent: each one yields a distinct DOI.
    pub fn publish(&self, id: DepositionId) -> Result<PublishReceipt> {
        let (dep, doi) = self.mutate(id, |dep| {
            let doi = self.mint_unused_doi(id)?;
            let label = dep.metadata.version_label_or_initial();

            dep.status = DepositionStatus::Published;
            dep.doi = Some(doi.clone());
            dep.dirty = false;
            dep.metadata.versions.push(VersionEntry {
                version: label,
                doi: Some(doi.clone()),
                created_at: Utc::now(),
                changes: Some(VersionChanges::published()),
            });

            Ok(doi)
        })?;

        let version_label = dep.metadata.version_label_or_initial();
        info!(deposition_id = id, doi = %doi, version = %version_label, "published deposition");

        Ok(PublishReceipt { doi, version_label })
    }

    /// Sets the bag's version label
    ///
    /// With `append_history`, also records a history entry carrying the
    /// current DOI; no DOI is minted.
    pub fn set_version_label(
        &self,
        id: DepositionId,
        number: VersionNumber,
        append_history: bool,
    ) -> Result<Deposition> {
        self.mutate(id, |dep| {
            let label = number.label();
            dep.metadata.dataset_version = Some(label.clone());

            if append_history {
                dep.metadata.versions.push(VersionEntry {
                    version: label,
                    doi: dep.doi.clone(),
                    created_at: Utc::now(),
                    changes: None,
                });
            }
            Ok(())
        })
        .map(|(dep, ())| dep)
    }

    pub fn version_history(&self, id: DepositionId) -> Result<Vec<VersionEntry>> {
        Ok(self.require(id)?.metadata.versions)
    }

    /// Deletes a deposition; returns false if it did not exist
    pub fn delete(&self, id: DepositionId) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM depositions WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    /// Loads, mutates and saves one deposition inside a transaction
    fn mutate<T>(
        &self,
        id: DepositionId,
        apply: impl FnOnce(&mut Deposition) -> Result<T>,
    ) -> Result<(Deposition, T)> {
        let tx = self.conn.unchecked_transaction()?;

        let mut dep = load(&tx, id)?.ok_or(DepositionError::NotFound(id))?;
        let out = apply(&mut dep)?;
        dep.updated_at = Utc::now();

        tx.execute(
            "UPDATE depositions SET meta_data = ?2, status = ?3, doi = ?4, dirty = ?5, updated_at = ?6
             WHERE id = ?1",
            params![
                id,
                serde_json::to_string(&dep.metadata)?,
                dep.status.as_str(),
                dep.doi.as_ref().map(Doi::as_str),
                dep.dirty,
                dep.updated_at,
            ],
        )?;
        tx.commit()?;

        Ok((dep, out))
    }

    /// Draws DOIs until one can be reserved for `id`
    ///
    /// Runs on the store's connection, so the reservation rolls back with the
    /// surrounding publish.
    fn mint_unused_doi(&self, id: DepositionId) -> Result<Doi> {
        for _ in 0..self.max_mint_attempts {
            let doi = Doi::mint(&self.doi_prefix);
            if self.reserve_doi(id, &doi)? {
                return Ok(doi);
            }
            debug!(doi = %doi, "minted DOI already taken, redrawing");
        }
        Err(DepositionError::DoiExhausted(self.max_mint_attempts))
    }

    /// Records `doi` as minted for `id`; false if it was ever minted before
    fn reserve_doi(&self, id: DepositionId, doi: &Doi) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO deposition_dois (doi, deposition_id, minted_at)
             VALUES (?1, ?2, ?3)",
            params![doi.as_str(), id, Utc::now()],
        )?;
        Ok(inserted == 1)
    }

    #[cfg(test)]
    fn set_mint_attempts(&mut self, attempts: u32) {
        self.max_mint_attempts = attempts;
    }
}

fn load(conn: &Connection, id: DepositionId) -> Result<Option<Deposition>> {
    let deposition = conn
        .query_row(
            &format!("SELECT {} FROM depositions WHERE id = ?1", DEPOSITION_COLUMNS),
            params![id],
            deposition_from_row,
        )
        .optional()?;
    Ok(deposition)
}

fn deposition_from_row(row: &Row<'_>) -> rusqlite::Result<Deposition> {
    let bag: String = row.get(1)?;
    let metadata = serde_json::from_str(&bag).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Deposition {
        id: row.get(0)?,
        metadata,
        status: parse_column(row, 2)?,
        doi: parse_optional_column(row, 3)?,
        dirty: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}
