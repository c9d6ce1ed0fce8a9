//! Database schema and connection management.

use crate::database::{Result, StorageError};
use rusqlite::Connection;
use std::path::Path;

/// Current store schema version. Incremented when the schema changes.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Store database connection and schema manager
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self { conn })
    }

    /// Create a new in-memory database for testing
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self { conn })
    }

    /// Access the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Initialize the store schema
    pub fn initialize_schema(&self) -> Result<()> {
        self.create_store_meta_table()?;
        self.create_records_table()?;
        self.create_snapshots_table()?;
        self.create_profile_table()?;
        self.create_formpack_meta_table()?;
        self.create_indexes()?;
        Ok(())
    }

    /// Verify the schema version row, writing it for a fresh database
    pub fn validate_schema_version(&self) -> Result<()> {
        let found: Option<i32> = self
            .conn
            .query_row("SELECT version FROM store_meta WHERE id = 1", [], |row| {
                row.get(0)
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match found {
            None => {
                self.conn.execute(
                    "INSERT INTO store_meta (id, version) VALUES (1, ?1)",
                    [CURRENT_SCHEMA_VERSION],
                )?;
                Ok(())
            }
            Some(v) if v == CURRENT_SCHEMA_VERSION => Ok(()),
            Some(v) => Err(StorageError::SchemaVersion {
                found: v,
                supported: CURRENT_SCHEMA_VERSION,
            }),
        }
    }

    /// Drop every collection and recreate the schema (full local reset)
    pub fn wipe(&self) -> Result<()> {
        self.conn.execute_batch(
            "DROP TABLE IF EXISTS snapshots;
             DROP TABLE IF EXISTS records;
             DROP TABLE IF EXISTS profile;
             DROP TABLE IF EXISTS formpack_meta;
             DROP TABLE IF EXISTS store_meta;",
        )?;
        self.initialize_schema()?;
        self.validate_schema_version()
    }

    fn create_store_meta_table(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS store_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn create_records_table(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                formpack_id TEXT NOT NULL,
                title TEXT,
                locale TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn create_snapshots_table(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS snapshots (
                id TEXT PRIMARY KEY,
                record_id TEXT NOT NULL,
                label TEXT,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL,
                FOREIGN KEY (record_id) REFERENCES records(id) ON DELETE CASCADE
            )",
            [],
        )?;
        Ok(())
    }

    fn create_profile_table(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS profile (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn create_formpack_meta_table(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS formpack_meta (
                formpack_id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn create_indexes(&self) -> Result<()> {
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_records_formpack ON records(formpack_id)",
            [],
        )?;
        // The snapshot count/list contract relies on this index.
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_record ON snapshots(record_id)",
            [],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize_schema().unwrap();
        db.validate_schema_version().unwrap();
        db
    }

    #[test]
    fn test_initialize_schema_is_idempotent() {
        let db = db();
        db.initialize_schema().unwrap();
        db.validate_schema_version().unwrap();
    }

    #[test]
    fn test_schema_version_mismatch_detected() {
        let db = db();
        db.conn()
            .execute("UPDATE store_meta SET version = 99 WHERE id = 1", [])
            .unwrap();

        assert!(matches!(
            db.validate_schema_version(),
            Err(StorageError::SchemaVersion { found: 99, .. })
        ));
    }

    #[test]
    fn test_snapshot_cascade_on_record_delete() {
        let db = db();
        db.conn()
            .execute(
                "INSERT INTO records (id, formpack_id, locale, data, created_at, updated_at)
                 VALUES ('r1', 'fp', 'en', '{}', 't', 't')",
                [],
            )
            .unwrap();
        db.conn()
            .execute(
                "INSERT INTO snapshots (id, record_id, created_at, data)
                 VALUES ('s1', 'r1', 't', '{}')",
                [],
            )
            .unwrap();

        db.conn()
            .execute("DELETE FROM records WHERE id = 'r1'", [])
            .unwrap();

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_wipe_recreates_empty_schema() {
        let db = db();
        db.conn()
            .execute(
                "INSERT INTO records (id, formpack_id, locale, data, created_at, updated_at)
                 VALUES ('r1', 'fp', 'en', '{}', 't', 't')",
                [],
            )
            .unwrap();

        db.wipe().unwrap();

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
