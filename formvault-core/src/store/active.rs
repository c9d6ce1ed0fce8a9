//! The per-formpack active-record pointer.
//!
//! Which draft is bound to the visible form is client state, not store
//! state: a plain map from formpack id to record id, kept in a small
//! JSON file outside the encrypted database. The pointer may reference
//! a record that no longer exists, so reads validate it against the
//! record store and clear dangling entries.

use crate::database::{Record, StorageError};
use crate::store::RecordStore;
use crate::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// The formpack-id to record-id pointer map; cheap to clone
#[derive(Clone)]
pub struct ActiveRecords {
    path: Option<PathBuf>,
    map: Arc<Mutex<HashMap<String, String>>>,
}

impl ActiveRecords {
    /// Open the pointer file, starting empty when it is absent or
    /// unreadable (the pointers are reconstructible client state)
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let map = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "active-pointer file unreadable, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            path: Some(path),
            map: Arc::new(Mutex::new(map)),
        }
    }

    /// Pointer map with no backing file
    pub fn in_memory() -> Self {
        Self {
            path: None,
            map: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolve the active record for a formpack.
    ///
    /// A pointer to a deleted record, or to a record of another
    /// formpack, is cleared and reported as `None`.
    pub async fn get(&self, formpack_id: &str, records: &RecordStore) -> Result<Option<Record>> {
        let id = {
            let map = self.map.lock().map_err(|_| StorageError::LockPoisoned)?;
            map.get(formpack_id).cloned()
        };
        let Some(id) = id else {
            return Ok(None);
        };

        match records.get(&id).await? {
            Some(record) if record.formpack_id == formpack_id => Ok(Some(record)),
            _ => {
                warn!(formpack_id, record_id = %id, "clearing dangling active pointer");
                self.clear(formpack_id)?;
                Ok(None)
            }
        }
    }

    /// Raw pointer value without validating it against the store
    pub fn peek(&self, formpack_id: &str) -> Result<Option<String>> {
        let map = self.map.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(map.get(formpack_id).cloned())
    }

    /// Point a formpack at a record
    pub fn set(&self, formpack_id: &str, record_id: &str) -> Result<()> {
        let snapshot = {
            let mut map = self.map.lock().map_err(|_| StorageError::LockPoisoned)?;
            map.insert(formpack_id.to_string(), record_id.to_string());
            map.clone()
        };
        self.persist(&snapshot)
    }

    /// Drop one formpack's pointer
    pub fn clear(&self, formpack_id: &str) -> Result<bool> {
        let (removed, snapshot) = {
            let mut map = self.map.lock().map_err(|_| StorageError::LockPoisoned)?;
            let removed = map.remove(formpack_id).is_some();
            (removed, map.clone())
        };
        if removed {
            self.persist(&snapshot)?;
        }
        Ok(removed)
    }

    /// Drop every pointer (full local reset)
    pub fn clear_all(&self) -> Result<()> {
        let snapshot = {
            let mut map = self.map.lock().map_err(|_| StorageError::LockPoisoned)?;
            map.clear();
            map.clone()
        };
        self.persist(&snapshot)
    }

    fn persist(&self, map: &HashMap<String, String>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = serde_json::to_string_pretty(map)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        std::fs::write(path, text)
            .map_err(|e| StorageError::FileIo(format!("write {}: {}", path.display(), e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{StorageCipher, StorageKey};
    use crate::database::Database;
    use serde_json::json;
    use tempfile::TempDir;

    fn record_store() -> RecordStore {
        let db = Database::in_memory().unwrap();
        db.initialize_schema().unwrap();
        RecordStore::new(
            Arc::new(Mutex::new(db)),
            StorageCipher::new(&StorageKey::generate()),
        )
    }

    #[tokio::test]
    async fn test_set_then_get_resolves_record() {
        let records = record_store();
        let record = records
            .create("intake-basic", "en", json!({}), None)
            .await
            .unwrap();

        let active = ActiveRecords::in_memory();
        active.set("intake-basic", &record.id).unwrap();

        let resolved = active.get("intake-basic", &records).await.unwrap().unwrap();
        assert_eq!(resolved.id, record.id);
    }

    #[tokio::test]
    async fn test_dangling_pointer_is_cleared() {
        let records = record_store();
        let active = ActiveRecords::in_memory();
        active.set("intake-basic", "gone").unwrap();

        assert!(active.get("intake-basic", &records).await.unwrap().is_none());
        assert!(active.peek("intake-basic").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pointer_to_other_formpacks_record_is_cleared() {
        let records = record_store();
        let record = records
            .create("other-pack", "en", json!({}), None)
            .await
            .unwrap();

        let active = ActiveRecords::in_memory();
        active.set("intake-basic", &record.id).unwrap();

        assert!(active.get("intake-basic", &records).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pointers_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("active.json");

        let active = ActiveRecords::open(&path);
        active.set("intake-basic", "r1").unwrap();
        drop(active);

        let reopened = ActiveRecords::open(&path);
        assert_eq!(reopened.peek("intake-basic").unwrap().as_deref(), Some("r1"));
    }

    #[test]
    fn test_corrupt_pointer_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("active.json");
        std::fs::write(&path, "not json").unwrap();

        let active = ActiveRecords::open(&path);
        assert!(active.peek("intake-basic").unwrap().is_none());
    }

    #[test]
    fn test_clear_all_empties_the_map() {
        let active = ActiveRecords::in_memory();
        active.set("a", "1").unwrap();
        active.set("b", "2").unwrap();
        active.clear_all().unwrap();
        assert!(active.peek("a").unwrap().is_none());
        assert!(active.peek("b").unwrap().is_none());
    }
}
