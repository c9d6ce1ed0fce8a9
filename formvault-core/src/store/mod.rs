//! Store management - coordinates the crypto and database layers.
//!
//! [`FormStore`] owns the two independently-failing local resources
//! (the encrypted database and the storage key file) plus the
//! active-pointer file, and hands out cheap-clone handles to the four
//! collections. It also carries the draft lifecycle helpers the UI
//! drives: auto-draft on first visit, explicit new drafts, snapshot
//! restore and the full local reset.

pub mod active;
pub mod meta;
pub mod profile;
pub mod records;
pub mod snapshots;

pub use active::ActiveRecords;
pub use meta::FormpackMetaStore;
pub use profile::ProfileStore;
pub use records::RecordStore;
pub use snapshots::SnapshotStore;

use crate::autosave::{AutosaveConfig, AutosaveCoordinator};
use crate::crypto::{KeyProvider, StorageCipher, StorageKey};
use crate::database::{Database, Record, StorageError};
use crate::Result;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

pub const STORE_DB_FILE: &str = "store.db";
pub const STORAGE_KEY_FILE: &str = "storage.key";
pub const ACTIVE_POINTER_FILE: &str = "active.json";

/// Availability of the two independently-failing local resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStatus {
    pub database_present: bool,
    pub key_present: bool,
}

impl StoreStatus {
    /// Data exists but the key to read it is gone. Only a full local
    /// reset recovers from this state.
    pub fn needs_reset(&self) -> bool {
        self.database_present && !self.key_present
    }
}

/// The store facade owning database, cipher and pointer resources
pub struct FormStore {
    db: Arc<Mutex<Database>>,
    cipher: StorageCipher,
    key_provider: Option<KeyProvider>,
    active: ActiveRecords,
    data_dir: Option<PathBuf>,
}

impl FormStore {
    /// Open (or create) the store in a data directory.
    ///
    /// A database file without its key file surfaces as
    /// `CryptoError::KeyMissing` so the caller can offer the full-reset
    /// recovery path instead of generating a key that decrypts nothing.
    pub fn open_in_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| StorageError::FileIo(format!("create data dir: {}", e)))?;

        let db_path = dir.join(STORE_DB_FILE);
        let key_provider = KeyProvider::new(dir.join(STORAGE_KEY_FILE));
        let key = if db_path.exists() {
            key_provider.load()?
        } else {
            key_provider.load_or_generate()?
        };

        let db = Database::open(&db_path)?;
        db.initialize_schema()?;
        db.validate_schema_version()?;

        let active = ActiveRecords::open(dir.join(ACTIVE_POINTER_FILE));
        info!(dir = %dir.display(), "opened form store");

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            cipher: StorageCipher::new(&key),
            key_provider: Some(key_provider),
            active,
            data_dir: Some(dir),
        })
    }

    /// Open the store at the platform data directory
    pub fn open_default() -> Result<Self> {
        Self::open_in_dir(crate::platform::get_data_dir())
    }

    /// In-memory store with a throwaway key, for tests
    pub fn in_memory() -> Result<Self> {
        let db = Database::in_memory()?;
        db.initialize_schema()?;
        db.validate_schema_version()?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            cipher: StorageCipher::new(&StorageKey::generate()),
            key_provider: None,
            active: ActiveRecords::in_memory(),
            data_dir: None,
        })
    }

    /// Handle to the records collection
    ///
    /// Handles issued before a reset keep the old key; re-acquire them
    /// afterwards.
    pub fn records(&self) -> RecordStore {
        RecordStore::new(self.db.clone(), self.cipher.clone())
    }

    /// Handle to the snapshots collection
    pub fn snapshots(&self) -> SnapshotStore {
        SnapshotStore::new(self.db.clone(), self.cipher.clone())
    }

    /// Handle to the profile collection
    pub fn profile(&self) -> ProfileStore {
        ProfileStore::new(self.db.clone(), self.cipher.clone())
    }

    /// Handle to the formpack-meta collection
    pub fn formpack_meta(&self) -> FormpackMetaStore {
        FormpackMetaStore::new(self.db.clone(), self.cipher.clone())
    }

    /// The active-record pointer map
    pub fn active(&self) -> ActiveRecords {
        self.active.clone()
    }

    /// An autosave coordinator writing into this store
    pub fn autosave(&self, config: AutosaveConfig) -> AutosaveCoordinator {
        AutosaveCoordinator::new(self.records(), config)
    }

    /// Resolve the active draft for a formpack, creating the auto-draft
    /// on first visit.
    ///
    /// Idempotent: a reload re-resolves the same record. A dangling
    /// pointer with surviving drafts is re-pointed at the latest draft
    /// instead of quietly growing the record count.
    pub async fn ensure_active_record(&self, formpack_id: &str, locale: &str) -> Result<Record> {
        let records = self.records();
        if let Some(record) = self.active.get(formpack_id, &records).await? {
            return Ok(record);
        }

        if let Some(latest) = records.list(formpack_id).await?.into_iter().next() {
            self.active.set(formpack_id, &latest.id)?;
            return Ok(latest);
        }

        let record = records
            .create(formpack_id, locale, Value::Object(Map::new()), None)
            .await?;
        self.active.set(formpack_id, &record.id)?;
        info!(formpack_id, record_id = %record.id, "created auto-draft");
        Ok(record)
    }

    /// Clone the given form data into a fresh draft and make it active.
    ///
    /// The caller flushes its autosave coordinator before switching the
    /// form over to the new draft.
    pub async fn new_draft(
        &self,
        formpack_id: &str,
        locale: &str,
        data: Value,
        title: Option<String>,
    ) -> Result<Record> {
        let record = self
            .records()
            .create(formpack_id, locale, data, title)
            .await?;
        self.active.set(formpack_id, &record.id)?;
        Ok(record)
    }

    /// Copy a snapshot's data back into its owning record through the
    /// autosave bypass, so no stale debounced write can clobber the
    /// restored value. Never creates a record; returns `None` when the
    /// snapshot is gone.
    pub async fn restore_snapshot(
        &self,
        autosave: &AutosaveCoordinator,
        snapshot_id: &str,
    ) -> Result<Option<Record>> {
        let Some(snapshot) = self.snapshots().get(snapshot_id).await? else {
            return Ok(None);
        };
        autosave.bind(&snapshot.record_id).await?;
        autosave.mark_saved(snapshot.data).await
    }

    /// Availability of this store's local resources
    pub fn status(&self) -> StoreStatus {
        match &self.data_dir {
            Some(dir) => Self::status_of_dir(dir),
            None => StoreStatus {
                database_present: true,
                key_present: true,
            },
        }
    }

    /// Check a data directory without opening the store, usable even
    /// when the database can no longer be decrypted
    pub fn status_of_dir<P: AsRef<Path>>(dir: P) -> StoreStatus {
        let dir = dir.as_ref();
        StoreStatus {
            database_present: dir.join(STORE_DB_FILE).exists(),
            key_present: dir.join(STORAGE_KEY_FILE).exists(),
        }
    }

    /// Wipe every collection, drop the active pointers and rotate the
    /// storage key. The recovery affordance for unreadable data.
    pub fn reset_all_local_data(&mut self) -> Result<()> {
        {
            let db = self.db.lock().map_err(|_| StorageError::LockPoisoned)?;
            db.wipe()?;
        }
        self.active.clear_all()?;

        let key = StorageKey::generate();
        if let Some(provider) = &self.key_provider {
            provider.store(&key)?;
        }
        self.cipher = StorageCipher::new(&key);

        info!("reset all local data");
        Ok(())
    }

    /// Remove the store files without opening them first, for recovery
    /// when the store cannot even be opened
    pub fn reset_dir<P: AsRef<Path>>(dir: P) -> Result<()> {
        let dir = dir.as_ref();
        for name in [STORE_DB_FILE, STORAGE_KEY_FILE, ACTIVE_POINTER_FILE] {
            let path = dir.join(name);
            if path.exists() {
                std::fs::remove_file(&path).map_err(|e| {
                    StorageError::FileIo(format!("remove {}: {}", path.display(), e))
                })?;
            }
        }
        info!(dir = %dir.display(), "removed local store files");
        Ok(())
    }
}
