//! Append-only historical captures of record data.

use crate::crypto::StorageCipher;
use crate::database::models::{iso_timestamp, now_millis, parse_iso_timestamp};
use crate::database::{Database, Snapshot, StorageError};
use crate::{Result, StoreError};
use rusqlite::Row;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Handle to the snapshots collection; cheap to clone
#[derive(Clone)]
pub struct SnapshotStore {
    db: Arc<Mutex<Database>>,
    cipher: StorageCipher,
}

impl SnapshotStore {
    pub(crate) fn new(db: Arc<Mutex<Database>>, cipher: StorageCipher) -> Self {
        Self { db, cipher }
    }

    /// Capture the owning record's current data as a new snapshot
    ///
    /// The stored data is a deep copy; later edits to the record never
    /// reach it.
    pub async fn create(&self, record_id: &str, label: Option<String>) -> Result<Snapshot> {
        let stored: Option<String> = {
            let db = self.db.lock().map_err(|_| StorageError::LockPoisoned)?;
            db.conn()
                .query_row(
                    "SELECT data FROM records WHERE id = ?1",
                    [record_id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })
                .map_err(StorageError::Sqlite)?
        };

        let Some(stored) = stored else {
            return Err(StoreError::NotFound(format!("record {}", record_id)));
        };
        let data = self.cipher.unwrap(&stored)?;

        let snapshot = Snapshot {
            id: Uuid::new_v4().to_string(),
            record_id: record_id.to_string(),
            label,
            created_at: now_millis(),
            data,
        };

        let stored_data = self.cipher.wrap(&snapshot.data)?;
        let db = self.db.lock().map_err(|_| StorageError::LockPoisoned)?;
        db.conn()
            .execute(
                "INSERT INTO snapshots (id, record_id, label, created_at, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    &snapshot.id,
                    &snapshot.record_id,
                    &snapshot.label,
                    iso_timestamp(snapshot.created_at),
                    &stored_data,
                ),
            )
            .map_err(StorageError::Sqlite)?;

        debug!(snapshot_id = %snapshot.id, record_id, "created snapshot");
        Ok(snapshot)
    }

    /// Fetch a snapshot by id (the restore lookup)
    pub async fn get(&self, id: &str) -> Result<Option<Snapshot>> {
        let raw = {
            let db = self.db.lock().map_err(|_| StorageError::LockPoisoned)?;
            let mut stmt = db
                .conn()
                .prepare(
                    "SELECT id, record_id, label, created_at, data
                     FROM snapshots WHERE id = ?1",
                )
                .map_err(StorageError::Sqlite)?;
            let mut rows = stmt
                .query_map([id], raw_snapshot)
                .map_err(StorageError::Sqlite)?;
            rows.next().transpose().map_err(StorageError::Sqlite)?
        };

        raw.map(|raw| self.decode(raw)).transpose()
    }

    /// List a record's snapshots, newest first
    pub async fn list_by_record(&self, record_id: &str) -> Result<Vec<Snapshot>> {
        let raws = {
            let db = self.db.lock().map_err(|_| StorageError::LockPoisoned)?;
            let mut stmt = db
                .conn()
                .prepare(
                    "SELECT id, record_id, label, created_at, data
                     FROM snapshots WHERE record_id = ?1 ORDER BY created_at DESC",
                )
                .map_err(StorageError::Sqlite)?;
            let rows = stmt
                .query_map([record_id], raw_snapshot)
                .map_err(StorageError::Sqlite)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(StorageError::Sqlite)?
        };

        raws.into_iter().map(|raw| self.decode(raw)).collect()
    }

    /// Count a record's snapshots via the `record_id` index
    pub async fn count_by_record(&self, record_id: &str) -> Result<usize> {
        let db = self.db.lock().map_err(|_| StorageError::LockPoisoned)?;
        let count: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM snapshots WHERE record_id = ?1",
                [record_id],
                |row| row.get(0),
            )
            .map_err(StorageError::Sqlite)?;
        Ok(count as usize)
    }

    /// Delete one snapshot
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().map_err(|_| StorageError::LockPoisoned)?;
        let deleted = db
            .conn()
            .execute("DELETE FROM snapshots WHERE id = ?1", [id])
            .map_err(StorageError::Sqlite)?;
        Ok(deleted > 0)
    }

    /// Delete all snapshots of one record, returning how many were removed
    pub async fn clear_by_record(&self, record_id: &str) -> Result<usize> {
        let db = self.db.lock().map_err(|_| StorageError::LockPoisoned)?;
        let deleted = db
            .conn()
            .execute("DELETE FROM snapshots WHERE record_id = ?1", [record_id])
            .map_err(StorageError::Sqlite)?;

        debug!(record_id, deleted, "cleared snapshots");
        Ok(deleted)
    }

    fn decode(&self, raw: RawSnapshot) -> Result<Snapshot> {
        let data = self.cipher.unwrap(&raw.data)?;
        let created_at = parse_iso_timestamp(&raw.created_at)
            .ok_or_else(|| StorageError::Serialization(format!("bad timestamp {:?}", raw.created_at)))?;
        Ok(Snapshot {
            id: raw.id,
            record_id: raw.record_id,
            label: raw.label,
            created_at,
            data,
        })
    }
}

struct RawSnapshot {
    id: String,
    record_id: String,
    label: Option<String>,
    created_at: String,
    data: String,
}

fn raw_snapshot(row: &Row<'_>) -> rusqlite::Result<RawSnapshot> {
    Ok(RawSnapshot {
        id: row.get(0)?,
        record_id: row.get(1)?,
        label: row.get(2)?,
        created_at: row.get(3)?,
        data: row.get(4)?,
    })
}
