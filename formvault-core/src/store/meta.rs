//! Formpack change-detection fingerprints.
//!
//! One row per known formpack id, written only when a freshly fetched
//! manifest's derived signature differs from the stored one. The
//! background refresher that does the fetching lives outside this crate.

use crate::crypto::StorageCipher;
use crate::database::models::{iso_timestamp, now_millis, parse_iso_timestamp};
use crate::database::{Database, FormpackMeta, StorageError};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Handle to the formpack-meta collection; cheap to clone
#[derive(Clone)]
pub struct FormpackMetaStore {
    db: Arc<Mutex<Database>>,
    cipher: StorageCipher,
}

#[derive(Serialize, Deserialize)]
struct MetaPayload {
    signature: String,
    version: String,
    hash: String,
}

impl FormpackMetaStore {
    pub(crate) fn new(db: Arc<Mutex<Database>>, cipher: StorageCipher) -> Self {
        Self { db, cipher }
    }

    /// Fetch the stored fingerprint for a formpack
    pub async fn get(&self, formpack_id: &str) -> Result<Option<FormpackMeta>> {
        let row: Option<(String, String)> = {
            let db = self.db.lock().map_err(|_| StorageError::LockPoisoned)?;
            db.conn()
                .query_row(
                    "SELECT data, updated_at FROM formpack_meta WHERE formpack_id = ?1",
                    [formpack_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })
                .map_err(StorageError::Sqlite)?
        };

        let Some((stored, updated_at)) = row else {
            return Ok(None);
        };
        let payload: MetaPayload = serde_json::from_value(self.cipher.unwrap(&stored)?)
            .map_err(|e| StorageError::Serialization(format!("bad meta payload: {}", e)))?;
        let updated_at = parse_iso_timestamp(&updated_at).ok_or_else(|| {
            StorageError::Serialization(format!("bad timestamp {:?}", updated_at))
        })?;

        Ok(Some(FormpackMeta {
            formpack_id: formpack_id.to_string(),
            signature: payload.signature,
            version: payload.version,
            hash: payload.hash,
            updated_at,
        }))
    }

    /// Record a fetched manifest's fingerprint.
    ///
    /// Writes only when the derived signature differs from the stored
    /// one; returns whether a change was detected.
    pub async fn observe(&self, formpack_id: &str, version: &str, hash: &str) -> Result<bool> {
        let signature = format!("{}:{}", version, hash);
        if let Some(existing) = self.get(formpack_id).await? {
            if existing.signature == signature {
                return Ok(false);
            }
        }

        let stored = self.cipher.wrap(&json!({
            "signature": signature,
            "version": version,
            "hash": hash,
        }))?;
        {
            let db = self.db.lock().map_err(|_| StorageError::LockPoisoned)?;
            db.conn()
                .execute(
                    "INSERT INTO formpack_meta (formpack_id, data, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(formpack_id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
                    (formpack_id, &stored, iso_timestamp(now_millis())),
                )
                .map_err(StorageError::Sqlite)?;
        }

        debug!(formpack_id, version, "formpack definition changed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::StorageKey;

    fn store() -> FormpackMetaStore {
        let db = Database::in_memory().unwrap();
        db.initialize_schema().unwrap();
        FormpackMetaStore::new(
            Arc::new(Mutex::new(db)),
            StorageCipher::new(&StorageKey::generate()),
        )
    }

    #[tokio::test]
    async fn test_first_observation_is_a_change() {
        let store = store();
        assert!(store.observe("intake-basic", "1.0.0", "abcd").await.unwrap());

        let meta = store.get("intake-basic").await.unwrap().unwrap();
        assert_eq!(meta.version, "1.0.0");
        assert_eq!(meta.hash, "abcd");
        assert_eq!(meta.signature, "1.0.0:abcd");
    }

    #[tokio::test]
    async fn test_same_signature_is_not_rewritten() {
        let store = store();
        store.observe("intake-basic", "1.0.0", "abcd").await.unwrap();
        assert!(!store.observe("intake-basic", "1.0.0", "abcd").await.unwrap());
    }

    #[tokio::test]
    async fn test_changed_hash_is_detected() {
        let store = store();
        store.observe("intake-basic", "1.0.0", "abcd").await.unwrap();
        assert!(store.observe("intake-basic", "1.0.0", "ef01").await.unwrap());
        assert_eq!(
            store.get("intake-basic").await.unwrap().unwrap().hash,
            "ef01"
        );
    }

    #[tokio::test]
    async fn test_unknown_formpack_is_none() {
        assert!(store().get("nope").await.unwrap().is_none());
    }
}
