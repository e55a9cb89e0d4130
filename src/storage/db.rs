//! SQLite metadata database
//!
//! The database sits in `.dshub/hub.db` and is the source of truth for
//! datasets, file groups, concepts and versions. Components below the
//! orchestrator take a `&Connection`, so the caller owns the transaction.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, Transaction};
use tracing::debug;

/// SQLite metadata database
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Schema version - bump when the schema changes
    pub const SCHEMA_VERSION: i32 = 2;

    /// Opens (or creates) the database file at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::with_connection(conn)
    }

    /// Opens a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let db = Self { conn };
        db.ensure_schema()?;
        Ok(db)
    }

    /// Returns the shared connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Starts a transaction on the shared connection
    ///
    /// Dropping the returned guard without committing rolls back.
    pub fn transaction(&self) -> rusqlite::Result<Transaction<'_>> {
        self.conn.unchecked_transaction()
    }

    fn ensure_schema(&self) -> Result<()> {
        let current = self.schema_version()?;

        if current > Self::SCHEMA_VERSION {
            bail!(
                "Database schema version {} is newer than supported version {}",
                current,
                Self::SCHEMA_VERSION
            );
        }

        if current == 0 {
            debug!(to = Self::SCHEMA_VERSION, "creating metadata schema");
            self.create_schema()?;
        } else if current < Self::SCHEMA_VERSION {
            debug!(from = current, to = Self::SCHEMA_VERSION, "migrating metadata schema");
            self.migrate(current)?;
        }

        Ok(())
    }

    fn schema_version(&self) -> Result<i32> {
        let version: Option<i32> = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .optional()?;

        Ok(version.unwrap_or(0))
    }

    fn create_schema(&self) -> Result<()> {
        let tx = self.transaction()?;

        tx.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS dataset_metadata (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                deposition_id INTEGER,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                publication_type TEXT NOT NULL DEFAULT 'none',
                publication_doi TEXT,
                dataset_doi TEXT,
                tags TEXT
            );

            CREATE TABLE IF NOT EXISTS datasets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                metadata_id INTEGER NOT NULL UNIQUE REFERENCES dataset_metadata(id),
                kind TEXT NOT NULL DEFAULT 'tabular',
                rows_count INTEGER,
                schema_json TEXT,
                downloads INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS file_groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dataset_id INTEGER NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
                csv_filename TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                publication_doi TEXT,
                tags TEXT,
                csv_version TEXT
            );

            CREATE TABLE IF NOT EXISTS file_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id INTEGER NOT NULL REFERENCES file_groups(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                checksum TEXT NOT NULL,
                size INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS concepts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conceptual_id TEXT NOT NULL UNIQUE,
                name TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                concept_id INTEGER NOT NULL REFERENCES concepts(id) ON DELETE CASCADE,
                dataset_id INTEGER NOT NULL UNIQUE REFERENCES datasets(id) ON DELETE CASCADE,
                major INTEGER NOT NULL,
                minor INTEGER NOT NULL,
                changelog TEXT,
                release_date TEXT NOT NULL,
                UNIQUE (concept_id, major, minor)
            );

            CREATE INDEX IF NOT EXISTS idx_datasets_owner ON datasets(owner_id);
            CREATE INDEX IF NOT EXISTS idx_file_groups_dataset ON file_groups(dataset_id);
            CREATE INDEX IF NOT EXISTS idx_file_entries_group ON file_entries(group_id);
            CREATE INDEX IF NOT EXISTS idx_metadata_doi ON dataset_metadata(dataset_doi);
            ",
        )?;

        tx.execute_batch(&format!("PRAGMA user_version = {}", Self::SCHEMA_VERSION))?;
        tx.commit()?;

        Ok(())
    }

    /// Upgrades an existing database one version at a time
    fn migrate(&self, from: i32) -> Result<()> {
        let tx = self.transaction()?;

        if from < 2 {
            tx.execute_batch(
                "ALTER TABLE datasets ADD COLUMN downloads INTEGER NOT NULL DEFAULT 0;",
            )?;
        }

        tx.execute_batch(&format!("PRAGMA user_version = {}", Self::SCHEMA_VERSION))?;
        tx.commit()?;

        Ok(())
    }
}

/// Which unique constraint a failed insert hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueViolation {
    /// Constrained columns as reported by SQLite (e.g. `versions.dataset_id`)
    pub columns: String,
}

impl UniqueViolation {
    pub fn involves(&self, column: &str) -> bool {
        self.columns.split(',').any(|c| c.trim() == column)
    }
}

/// Returns the violated unique constraint, if that is what `err` is
pub fn unique_violation(err: &rusqlite::Error) -> Option<UniqueViolation> {
    match err {
        rusqlite::Error::SqliteFailure(e, message)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            let columns = message
                .as_deref()
                .and_then(|m| m.strip_prefix("UNIQUE constraint failed: "))
                .unwrap_or_default()
                .to_string();
            Some(UniqueViolation { columns })
        }
        _ => None,
    }
}

/// Reads a text column and parses it with `FromStr`
pub(crate) fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: T::Err| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

/// Reads an optional text column and parses it with `FromStr`
pub(crate) fn parse_optional_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse().map_err(|e: T::Err| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_creates_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hub.db");
        let db = Database::open(&path).unwrap();

        assert!(path.exists());
        assert_eq!(db.schema_version().unwrap(), Database::SCHEMA_VERSION);

        let tables: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('dataset_metadata', 'datasets', 'file_groups',
                              'file_entries', 'concepts', 'versions')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 6);
    }

    #[test]
    fn reopen_keeps_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hub.db");

        {
            let db = Database::open(&path).unwrap();
            db.conn()
                .execute(
                    "INSERT INTO concepts (conceptual_id, created_at) VALUES ('c-1234567', '2024-01-01')",
                    [],
                )
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM concepts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn version_one_gains_download_counter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hub.db");

        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE datasets (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     owner_id INTEGER NOT NULL,
                     metadata_id INTEGER NOT NULL,
                     kind TEXT NOT NULL DEFAULT 'tabular',
                     rows_count INTEGER,
                     schema_json TEXT,
                     created_at TEXT NOT NULL
                 );
                 INSERT INTO datasets (owner_id, metadata_id, created_at) VALUES (1, 1, '2024-01-01');
                 PRAGMA user_version = 1;",
            )
            .unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.schema_version().unwrap(), Database::SCHEMA_VERSION);

        let downloads: i64 = db
            .conn()
            .query_row("SELECT downloads FROM datasets WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(downloads, 0);
    }

    #[test]
    fn newer_schema_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hub.db");

        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("PRAGMA user_version = 99").unwrap();
        }

        let err = Database::open(&path).err().unwrap();
        assert!(err.to_string().contains("newer"));
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let db = Database::open_in_memory().unwrap();

        {
            let tx = db.transaction().unwrap();
            tx.execute(
                "INSERT INTO concepts (conceptual_id, created_at) VALUES ('c-1234567', '2024-01-01')",
                [],
            )
            .unwrap();
        }

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM concepts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn unique_violation_reports_columns() {
        let db = Database::open_in_memory().unwrap();
        let insert = "INSERT INTO concepts (conceptual_id, created_at) VALUES ('c-1234567', '2024-01-01')";

        db.conn().execute(insert, []).unwrap();
        let err = db.conn().execute(insert, []).unwrap_err();

        let violation = unique_violation(&err).unwrap();
        assert!(violation.involves("concepts.conceptual_id"));
        assert!(!violation.involves("versions.dataset_id"));
    }

    #[test]
    fn other_errors_are_not_unique_violations() {
        let db = Database::open_in_memory().unwrap();
        let err = db.conn().execute("INSERT INTO nope VALUES (1)", []).unwrap_err();

        assert!(unique_violation(&err).is_none());
    }
}
