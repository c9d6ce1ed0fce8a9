//! CRUD over the per-formpack collection of drafts.

use crate::crypto::StorageCipher;
use crate::database::models::{iso_timestamp, now_millis, parse_iso_timestamp, RecordPatch};
use crate::database::{Database, Record, StorageError};
use crate::{Result, StoreError};
use rusqlite::Row;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Handle to the records collection; cheap to clone
#[derive(Clone)]
pub struct RecordStore {
    db: Arc<Mutex<Database>>,
    cipher: StorageCipher,
}

impl RecordStore {
    pub(crate) fn new(db: Arc<Mutex<Database>>, cipher: StorageCipher) -> Self {
        Self { db, cipher }
    }

    /// Create a new draft. The caller decides whether it becomes active.
    pub async fn create(
        &self,
        formpack_id: &str,
        locale: &str,
        data: Value,
        title: Option<String>,
    ) -> Result<Record> {
        let now = now_millis();
        let record = Record {
            id: Uuid::new_v4().to_string(),
            formpack_id: formpack_id.to_string(),
            title,
            locale: locale.to_string(),
            data,
            created_at: now,
            updated_at: now,
        };

        let stored_data = self.cipher.wrap(&record.data)?;
        let db = self.db.lock().map_err(|_| StorageError::LockPoisoned)?;
        db.conn()
            .execute(
                "INSERT INTO records (id, formpack_id, title, locale, data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                (
                    &record.id,
                    &record.formpack_id,
                    &record.title,
                    &record.locale,
                    &stored_data,
                    iso_timestamp(record.created_at),
                    iso_timestamp(record.updated_at),
                ),
            )
            .map_err(StorageError::Sqlite)?;

        debug!(record_id = %record.id, formpack_id, "created record");
        Ok(record)
    }

    /// Fetch a record by id
    pub async fn get(&self, id: &str) -> Result<Option<Record>> {
        let row = {
            let db = self.db.lock().map_err(|_| StorageError::LockPoisoned)?;
            let mut stmt = db
                .conn()
                .prepare(
                    "SELECT id, formpack_id, title, locale, data, created_at, updated_at
                     FROM records WHERE id = ?1",
                )
                .map_err(StorageError::Sqlite)?;

            let mut rows = stmt
                .query_map([id], raw_record)
                .map_err(StorageError::Sqlite)?;
            rows.next().transpose().map_err(StorageError::Sqlite)?
        };

        row.map(|raw| self.decode(raw)).transpose()
    }

    /// List a formpack's records, newest edit first
    ///
    /// The ordering is a presentation convenience, not a stored invariant.
    pub async fn list(&self, formpack_id: &str) -> Result<Vec<Record>> {
        let raws = {
            let db = self.db.lock().map_err(|_| StorageError::LockPoisoned)?;
            let mut stmt = db
                .conn()
                .prepare(
                    "SELECT id, formpack_id, title, locale, data, created_at, updated_at
                     FROM records WHERE formpack_id = ?1 ORDER BY updated_at DESC",
                )
                .map_err(StorageError::Sqlite)?;

            let rows = stmt
                .query_map([formpack_id], raw_record)
                .map_err(StorageError::Sqlite)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(StorageError::Sqlite)?
        };

        raws.into_iter().map(|raw| self.decode(raw)).collect()
    }

    /// Count a formpack's records
    pub async fn count(&self, formpack_id: &str) -> Result<usize> {
        let db = self.db.lock().map_err(|_| StorageError::LockPoisoned)?;
        let count: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM records WHERE formpack_id = ?1",
                [formpack_id],
                |row| row.get(0),
            )
            .map_err(StorageError::Sqlite)?;
        Ok(count as usize)
    }

    /// Merge a patch into an existing record and bump `updated_at`.
    ///
    /// Returns `None` when the id does not exist. Callers must treat that
    /// as "the draft is gone" - never as a cue to create a fresh record.
    pub async fn update(&self, id: &str, patch: RecordPatch) -> Result<Option<Record>> {
        let Some(mut record) = self.get(id).await? else {
            return Ok(None);
        };

        if let Some(data) = patch.data {
            record.data = data;
        }
        if let Some(locale) = patch.locale {
            record.locale = locale;
        }
        if let Some(title) = patch.title {
            record.title = title;
        }
        record.updated_at = now_millis();

        let stored_data = self.cipher.wrap(&record.data)?;
        let updated = {
            let db = self.db.lock().map_err(|_| StorageError::LockPoisoned)?;
            db.conn()
                .execute(
                    "UPDATE records SET title = ?1, locale = ?2, data = ?3, updated_at = ?4
                     WHERE id = ?5",
                    (
                        &record.title,
                        &record.locale,
                        &stored_data,
                        iso_timestamp(record.updated_at),
                        id,
                    ),
                )
                .map_err(StorageError::Sqlite)?
        };

        // The record can vanish between the read and the write; report
        // that as absence, same as a missing id.
        if updated == 0 {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Delete a record and all of its snapshots
    ///
    /// Protection of the currently active record is the caller's job.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().map_err(|_| StorageError::LockPoisoned)?;

        let snapshots = db
            .conn()
            .execute("DELETE FROM snapshots WHERE record_id = ?1", [id])
            .map_err(StorageError::Sqlite)?;
        let deleted = db
            .conn()
            .execute("DELETE FROM records WHERE id = ?1", [id])
            .map_err(StorageError::Sqlite)?;

        if deleted > 0 {
            debug!(record_id = %id, cascaded_snapshots = snapshots, "deleted record");
        }
        Ok(deleted > 0)
    }

    fn decode(&self, raw: RawRecord) -> Result<Record> {
        let data = self.cipher.unwrap(&raw.data)?;
        Ok(Record {
            id: raw.id,
            formpack_id: raw.formpack_id,
            title: raw.title,
            locale: raw.locale,
            data,
            created_at: parse_timestamp(&raw.created_at)?,
            updated_at: parse_timestamp(&raw.updated_at)?,
        })
    }
}

struct RawRecord {
    id: String,
    formpack_id: String,
    title: Option<String>,
    locale: String,
    data: String,
    created_at: String,
    updated_at: String,
}

fn raw_record(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        formpack_id: row.get(1)?,
        title: row.get(2)?,
        locale: row.get(3)?,
        data: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn parse_timestamp(s: &str) -> std::result::Result<chrono::DateTime<chrono::Utc>, StoreError> {
    parse_iso_timestamp(s)
        .ok_or_else(|| StorageError::Serialization(format!("bad timestamp {:?}", s)).into())
}
