//! Version ledger
//!
//! Maintains the concept → versions relation. Uniqueness of
//! `(concept, major, minor)` is enforced by the database; a violation
//! surfaces as [`VersioningError::DuplicateVersion`] and is never retried here.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::error::{Result, VersioningError};
use crate::domain::{Concept, ConceptKey, ConceptualId, DatasetId, Version, VersionNumber};
use crate::storage::{parse_column, unique_violation, version_from_row, VERSION_COLUMNS};

/// Attempts at drawing an unused conceptual id
const MAX_CONCEPT_ATTEMPTS: u32 = 4;

/// Version ledger over the metadata database
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionLedger;

impl VersionLedger {
    /// Creates a concept and binds `dataset_id` to its `1.0` version
    ///
    /// Fails with [`VersioningError::ConceptCreation`] if the dataset already
    /// has a version.
    pub fn create_initial_version(
        &self,
        conn: &Connection,
        dataset_id: DatasetId,
        name: &str,
    ) -> Result<Version> {
        if self.version_for_dataset(conn, dataset_id)?.is_some() {
            return Err(VersioningError::ConceptCreation(dataset_id));
        }

        let concept_id = self.insert_concept(conn, name)?;
        let version =
            self.register_version(conn, concept_id, dataset_id, VersionNumber::INITIAL, None)?;

        info!(dataset_id, concept_id, "created initial version 1.0");
        Ok(version)
    }

    /// Computes the number following the concept's latest version
    ///
    /// Strictly numeric: release timestamps play no part.
    pub fn next_version_numbers(&self, concept: &Concept, bump_major: bool) -> VersionNumber {
        concept.next_number(bump_major)
    }

    /// Inserts a version row
    pub fn register_version(
        &self,
        conn: &Connection,
        concept_id: ConceptKey,
        dataset_id: DatasetId,
        number: VersionNumber,
        changelog: Option<&str>,
    ) -> Result<Version> {
        let release_date = Utc::now();

        let inserted = conn.execute(
            "INSERT INTO versions (concept_id, dataset_id, major, minor, changelog, release_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                concept_id,
                dataset_id,
                number.major,
                number.minor,
                changelog,
                release_date
            ],
        );

        if let Err(err) = inserted {
            return Err(match unique_violation(&err) {
                Some(v) if v.involves("versions.dataset_id") => {
                    VersioningError::ConceptCreation(dataset_id)
                }
                Some(_) => VersioningError::DuplicateVersion { concept_id, number },
                None => VersioningError::Storage(err),
            });
        }

        debug!(concept_id, dataset_id, version = %number, "registered version");

        Ok(Version {
            id: conn.last_insert_rowid(),
            concept_id,
            dataset_id,
            number,
            release_date,
            changelog: changelog.map(String::from),
        })
    }

    /// Loads a concept with its versions ordered by `(major, minor)`
    pub fn concept(&self, conn: &Connection, concept_id: ConceptKey) -> Result<Option<Concept>> {
        let concept = conn
            .query_row(
                "SELECT id, conceptual_id, name, created_at FROM concepts WHERE id = ?1",
                params![concept_id],
                |row| {
                    Ok(Concept {
                        id: row.get(0)?,
                        conceptual_id: parse_column(row, 1)?,
                        name: row.get(2)?,
                        created_at: row.get(3)?,
                        versions: Vec::new(),
                    })
                },
            )
            .optional()?;

        let Some(mut concept) = concept else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM versions WHERE concept_id = ?1 ORDER BY major, minor",
            VERSION_COLUMNS
        ))?;
        concept.versions = stmt
            .query_map(params![concept_id], version_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Some(concept))
    }

    /// The version a dataset materializes, if any
    pub fn version_for_dataset(
        &self,
        conn: &Connection,
        dataset_id: DatasetId,
    ) -> Result<Option<Version>> {
        let version = conn
            .query_row(
                &format!("SELECT {} FROM versions WHERE dataset_id = ?1", VERSION_COLUMNS),
                params![dataset_id],
                version_from_row,
            )
            .optional()?;
        Ok(version)
    }

    /// The concept a dataset belongs to, if it was ever versioned
    pub fn concept_for_dataset(
        &self,
        conn: &Connection,
        dataset_id: DatasetId,
    ) -> Result<Option<Concept>> {
        match self.version_for_dataset(conn, dataset_id)? {
            Some(version) => self.concept(conn, version.concept_id),
            None => Ok(None),
        }
    }

    /// Every version of the dataset's concept, ordered by `(major, minor)`
    ///
    /// Empty for datasets that predate versioning.
    pub fn versions_for_dataset(
        &self,
        conn: &Connection,
        dataset_id: DatasetId,
    ) -> Result<Vec<Version>> {
        Ok(self
            .concept_for_dataset(conn, dataset_id)?
            .map(|concept| concept.versions)
            .unwrap_or_default())
    }

    fn insert_concept(&self, conn: &Connection, name: &str) -> Result<ConceptKey> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let created_at = Utc::now();
            let conceptual_id = ConceptualId::new(name, created_at);

            let inserted = conn.execute(
                "INSERT INTO concepts (conceptual_id, name, created_at) VALUES (?1, ?2, ?3)",
                params![conceptual_id.to_string(), name, created_at],
            );

            match inserted {
                Ok(_) => {
                    debug!(conceptual_id = %conceptual_id, "created concept");
                    return Ok(conn.last_insert_rowid());
                }
                Err(err) if unique_violation(&err).is_some() && attempt < MAX_CONCEPT_ATTEMPTS => {
                    debug!(conceptual_id = %conceptual_id, "conceptual id taken, redrawing");
                }
                Err(err) => return Err(VersioningError::Storage(err)),
            }
        }
    }
}
