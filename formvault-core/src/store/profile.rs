//! The single cross-formpack profile bag.
//!
//! Holds reusable identity data (patient name, doctor phone) keyed by
//! semantic profile keys. Saving merges field by field so an empty
//! incoming value never erases a stored one; applying fills only
//! destination fields the user has not already filled in.

use crate::crypto::StorageCipher;
use crate::database::models::{iso_timestamp, now_millis, parse_iso_timestamp};
use crate::database::{Database, Profile, StorageError};
use crate::formpack::Formpack;
use crate::{Result, StoreError};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Handle to the profile collection; cheap to clone
#[derive(Clone)]
pub struct ProfileStore {
    db: Arc<Mutex<Database>>,
    cipher: StorageCipher,
}

impl ProfileStore {
    pub(crate) fn new(db: Arc<Mutex<Database>>, cipher: StorageCipher) -> Self {
        Self { db, cipher }
    }

    /// Load the profile, `None` until the first save
    pub async fn load(&self) -> Result<Option<Profile>> {
        let row: Option<(String, String)> = {
            let db = self.db.lock().map_err(|_| StorageError::LockPoisoned)?;
            db.conn()
                .query_row(
                    "SELECT data, updated_at FROM profile WHERE id = 1",
                    [],
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
        let data = self.cipher.unwrap(&stored)?;
        let updated_at = parse_iso_timestamp(&updated_at).ok_or_else(|| {
            StorageError::Serialization(format!("bad timestamp {:?}", updated_at))
        })?;
        Ok(Some(Profile { data, updated_at }))
    }

    /// Merge a bag of semantic-key fields into the stored profile.
    ///
    /// Only non-empty incoming fields overwrite; a null or blank incoming
    /// value never clobbers a stored one.
    pub async fn merge_save(&self, incoming: &Value) -> Result<Profile> {
        let Some(incoming) = incoming.as_object() else {
            return Err(StoreError::InvalidInput(
                "profile data must be a JSON object".to_string(),
            ));
        };

        let mut bag = match self.load().await? {
            Some(profile) => profile.data,
            None => Value::Object(Map::new()),
        };
        if !bag.is_object() {
            bag = Value::Object(Map::new());
        }
        if let Some(fields) = bag.as_object_mut() {
            for (key, value) in incoming {
                if !is_empty_field(Some(value)) {
                    fields.insert(key.clone(), value.clone());
                }
            }
        }

        let profile = Profile {
            data: bag,
            updated_at: now_millis(),
        };
        let stored = self.cipher.wrap(&profile.data)?;
        {
            let db = self.db.lock().map_err(|_| StorageError::LockPoisoned)?;
            db.conn()
                .execute(
                    "INSERT INTO profile (id, data, updated_at) VALUES (1, ?1, ?2)
                     ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
                    (&stored, iso_timestamp(profile.updated_at)),
                )
                .map_err(StorageError::Sqlite)?;
        }

        debug!("saved profile");
        Ok(profile)
    }

    /// Extract a formpack document's profile-bound fields and merge them
    /// into the stored profile (the "save master data" path).
    pub async fn collect(&self, formpack: &Formpack, document: &Value) -> Result<Profile> {
        let mut bag = Map::new();
        for binding in &formpack.profile_fields {
            if let Some(value) = document.pointer(&binding.pointer) {
                if !is_empty_field(Some(value)) {
                    bag.insert(binding.key.clone(), value.clone());
                }
            }
        }
        self.merge_save(&Value::Object(bag)).await
    }

    /// Map profile fields into a formpack document, filling only
    /// destination fields that are currently empty.
    ///
    /// Returns the filled document and how many fields were applied.
    pub async fn apply_to(&self, formpack: &Formpack, document: &Value) -> Result<(Value, usize)> {
        let Some(profile) = self.load().await? else {
            return Ok((document.clone(), 0));
        };

        let mut result = document.clone();
        let mut filled = 0;
        for binding in &formpack.profile_fields {
            let Some(value) = profile.data.get(&binding.key) else {
                continue;
            };
            if is_empty_field(Some(value)) {
                continue;
            }
            if !is_empty_field(result.pointer(&binding.pointer)) {
                continue;
            }
            let tokens = pointer_tokens(&binding.pointer);
            if set_path(&mut result, &tokens, value.clone()) {
                filled += 1;
            }
        }
        Ok((result, filled))
    }
}

/// Missing, null and blank-string values count as empty
fn is_empty_field(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}

fn pointer_tokens(pointer: &str) -> Vec<String> {
    pointer
        .split('/')
        .skip(1)
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect()
}

/// Write a value at an object path, creating intermediate objects
fn set_path(current: &mut Value, tokens: &[String], value: Value) -> bool {
    let Some((first, rest)) = tokens.split_first() else {
        return false;
    };
    if current.is_null() {
        *current = Value::Object(Map::new());
    }
    let Some(map) = current.as_object_mut() else {
        return false;
    };
    if rest.is_empty() {
        map.insert(first.clone(), value);
        true
    } else {
        set_path(map.entry(first.clone()).or_insert(Value::Null), rest, value)
    }
}
