//! Validation and application of imported export files.
//!
//! An import file is untrusted input. Validation runs in a fixed order
//! and stops at the first failure: JSON well-formedness, optional
//! password-envelope decryption, formpack identity, locale support,
//! schema conformance of the data, then each revision entry. Every
//! rejection carries a specific kind because the corrective action
//! differs (fix the file, re-enter the password, open the right
//! formpack).
//!
//! Schema conformance tolerates partial documents: drafts authored
//! against the current schema legitimately omit fields behind
//! conditional branches, so only present-but-wrong values fail.

use crate::autosave::AutosaveCoordinator;
use crate::crypto::CryptoError;
use crate::database::models::RecordPatch;
use crate::database::Record;
use crate::export::{self, ExportEnvelope, ExportRevision};
use crate::formpack::Formpack;
use crate::schema;
use crate::store::{ActiveRecords, RecordStore};
use crate::{Result, StoreError};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

/// Why an import file was rejected
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("file is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("file does not identify a formpack")]
    UnknownFormpack,

    #[error("file belongs to formpack {found:?}, expected {expected:?}")]
    FormpackMismatch { expected: String, found: String },

    #[error("locale {0:?} is not supported by this formpack")]
    UnsupportedLocale(String),

    #[error("data does not match the formpack schema: {}", .0.join("; "))]
    SchemaMismatch(Vec<String>),

    #[error("invalid revisions: {0}")]
    InvalidRevisions(String),

    #[error("file is password protected")]
    PasswordRequired,

    #[error("wrong password or corrupted file")]
    DecryptFailed,

    #[error("malformed export envelope: {0}")]
    InvalidEnvelope(String),

    #[error("unsupported crypto primitive: {0}")]
    CryptoUnsupported(String),

    #[error("overwrite import requires explicit confirmation")]
    NotConfirmed,

    #[error("no active draft to overwrite")]
    NoActiveRecord,
}

/// How a validated import is written into the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Create a fresh record and make it active
    New,
    /// Replace the active record's data in place, keeping its id
    Overwrite { confirmed: bool },
}

/// The payload of an import file that passed every validation step
#[derive(Debug, Clone)]
pub struct ValidatedImport {
    pub formpack_id: String,
    pub locale: String,
    pub title: Option<String>,
    pub data: Value,
    pub revisions: Vec<ExportRevision>,
}

/// What an applied import did
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub record: Record,
    pub created: bool,
}

/// Validate a raw import file against the currently open formpack.
///
/// `password` is only consulted when the file is a password-protected
/// export envelope.
pub fn validate_import(
    raw: &str,
    formpack: &Formpack,
    password: Option<&str>,
) -> std::result::Result<ValidatedImport, ImportError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ImportError::InvalidJson(e.to_string()))?;

    let value = if export::is_export_envelope(&value) {
        let Some(password) = password else {
            return Err(ImportError::PasswordRequired);
        };
        let envelope: ExportEnvelope = serde_json::from_value(value)
            .map_err(|e| ImportError::InvalidEnvelope(e.to_string()))?;
        export::open_with_password(&envelope, password).map_err(|e| match e {
            CryptoError::DecryptFailed => ImportError::DecryptFailed,
            CryptoError::InvalidEnvelope(msg) => ImportError::InvalidEnvelope(msg),
            CryptoError::Unsupported(msg) | CryptoError::KdfFailed(msg) => {
                ImportError::CryptoUnsupported(msg)
            }
            other => ImportError::InvalidEnvelope(other.to_string()),
        })?
    } else {
        value
    };

    let Some(found_id) = value.pointer("/formpack/id").and_then(Value::as_str) else {
        return Err(ImportError::UnknownFormpack);
    };
    if found_id != formpack.id {
        return Err(ImportError::FormpackMismatch {
            expected: formpack.id.clone(),
            found: found_id.to_string(),
        });
    }

    let locale = value
        .pointer("/record/locale")
        .or_else(|| value.get("locale"))
        .and_then(Value::as_str)
        .unwrap_or("");
    if !formpack.supports_locale(locale) {
        return Err(ImportError::UnsupportedLocale(locale.to_string()));
    }

    let data = match value.get("data") {
        Some(data) => data.clone(),
        None => return Err(ImportError::SchemaMismatch(vec!["$.data: missing".to_string()])),
    };
    let violations = schema::validate(&formpack.schema, &data);
    if !violations.is_empty() {
        return Err(ImportError::SchemaMismatch(
            violations.iter().map(|v| v.to_string()).collect(),
        ));
    }

    let revisions = validate_revisions(&value, formpack)?;
    let title = value
        .pointer("/record/title")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(ValidatedImport {
        formpack_id: formpack.id.clone(),
        locale: locale.to_string(),
        title,
        data,
        revisions,
    })
}

fn validate_revisions(
    value: &Value,
    formpack: &Formpack,
) -> std::result::Result<Vec<ExportRevision>, ImportError> {
    let entries = match value.get("revisions") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return Err(ImportError::InvalidRevisions(
                "revisions is not an array".to_string(),
            ))
        }
    };

    let mut out = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            return Err(ImportError::InvalidRevisions(format!(
                "entry {} is not an object",
                i
            )));
        };
        let Some(label) = obj.get("label").and_then(Value::as_str) else {
            return Err(ImportError::InvalidRevisions(format!(
                "entry {} has no label",
                i
            )));
        };
        let Some(data) = obj.get("data") else {
            return Err(ImportError::InvalidRevisions(format!(
                "entry {:?} has no data",
                label
            )));
        };
        let violations = schema::validate(&formpack.schema, data);
        if let Some(first) = violations.first() {
            return Err(ImportError::InvalidRevisions(format!(
                "entry {:?}: {}",
                label, first
            )));
        }
        out.push(ExportRevision {
            label: label.to_string(),
            data: data.clone(),
        });
    }
    Ok(out)
}

/// Write a validated import into the store.
///
/// `New` creates a fresh record and points the formpack at it.
/// `Overwrite` requires explicit confirmation and a resolvable active
/// record, then writes through the autosave bypass so no stale
/// debounced edit can clobber the imported data. Both preconditions are
/// checked before anything touches storage.
pub async fn apply_import(
    validated: ValidatedImport,
    mode: ImportMode,
    records: &RecordStore,
    active: &ActiveRecords,
    autosave: &AutosaveCoordinator,
) -> Result<ImportOutcome> {
    match mode {
        ImportMode::New => {
            let record = records
                .create(
                    &validated.formpack_id,
                    &validated.locale,
                    validated.data,
                    validated.title,
                )
                .await?;
            active.set(&validated.formpack_id, &record.id)?;
            autosave.bind(&record.id).await?;

            info!(record_id = %record.id, "imported as new draft");
            Ok(ImportOutcome {
                record,
                created: true,
            })
        }
        ImportMode::Overwrite { confirmed } => {
            if !confirmed {
                return Err(ImportError::NotConfirmed.into());
            }
            let Some(current) = active.get(&validated.formpack_id, records).await? else {
                return Err(ImportError::NoActiveRecord.into());
            };

            autosave.bind(&current.id).await?;
            let Some(mut record) = autosave.mark_saved(validated.data).await? else {
                return Err(StoreError::NotFound(format!("record {}", current.id)));
            };

            if record.locale != validated.locale || validated.title.is_some() {
                let patch = RecordPatch {
                    locale: Some(validated.locale),
                    title: validated.title.map(Some),
                    ..Default::default()
                };
                if let Some(patched) = records.update(&record.id, patch).await? {
                    record = patched;
                }
            }

            info!(record_id = %record.id, "import overwrote active draft");
            Ok(ImportOutcome {
                record,
                created: false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autosave::AutosaveConfig;
    use crate::crypto::kdf::KdfParams;
    use crate::export::{seal_with_password_params, ExportDocument};
    use crate::store::FormStore;
    use serde_json::json;
    use std::time::Duration;

    fn formpack() -> Formpack {
        Formpack {
            id: "intake-basic".to_string(),
            version: "1.4.0".to_string(),
            locales: vec!["de".to_string(), "en".to_string()],
            schema: json!({
                "type": "object",
                "properties": {
                    "person": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "age": { "type": "integer" }
                        }
                    }
                }
            }),
            profile_fields: Vec::new(),
        }
    }

    fn payload(data: Value) -> String {
        json!({
            "app": { "id": "formvault", "version": "0.3.0" },
            "formpack": { "id": "intake-basic", "version": "1.4.0" },
            "record": { "id": "r1", "locale": "en", "updatedAt": "2026-08-04T09:00:00.000Z" },
            "locale": "en",
            "exportedAt": "2026-08-04T09:00:00.000Z",
            "data": data
        })
        .to_string()
    }

    #[test]
    fn test_invalid_json_rejected_before_anything_else() {
        // Even the formpack check never runs on a file that does not parse.
        let result = validate_import("{not json", &formpack(), None);
        assert!(matches!(result, Err(ImportError::InvalidJson(_))));
    }

    #[test]
    fn test_missing_formpack_id_is_unknown() {
        let raw = json!({ "data": {} }).to_string();
        assert!(matches!(
            validate_import(&raw, &formpack(), None),
            Err(ImportError::UnknownFormpack)
        ));
    }

    #[test]
    fn test_wrong_formpack_rejected_before_schema() {
        // The data would fail schema validation, but identity wins.
        let raw = json!({
            "formpack": { "id": "other-pack" },
            "locale": "en",
            "data": { "person": { "name": 42 } }
        })
        .to_string();

        assert!(matches!(
            validate_import(&raw, &formpack(), None),
            Err(ImportError::FormpackMismatch { ref found, .. }) if found == "other-pack"
        ));
    }

    #[test]
    fn test_unsupported_locale_rejected() {
        let raw = json!({
            "formpack": { "id": "intake-basic" },
            "record": { "locale": "fr" },
            "data": {}
        })
        .to_string();

        assert!(matches!(
            validate_import(&raw, &formpack(), None),
            Err(ImportError::UnsupportedLocale(ref l)) if l == "fr"
        ));
    }

    #[test]
    fn test_schema_mismatch_rejected() {
        let raw = payload(json!({ "person": { "name": 42 } }));
        assert!(matches!(
            validate_import(&raw, &formpack(), None),
            Err(ImportError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_partial_document_is_accepted() {
        // Conditional branches legitimately omit fields.
        let validated = validate_import(&payload(json!({})), &formpack(), None).unwrap();
        assert_eq!(validated.formpack_id, "intake-basic");
        assert_eq!(validated.locale, "en");
    }

    #[test]
    fn test_malformed_revision_entries_rejected() {
        let mut value: Value = serde_json::from_str(&payload(json!({}))).unwrap();

        value["revisions"] = json!("nope");
        assert!(matches!(
            validate_import(&value.to_string(), &formpack(), None),
            Err(ImportError::InvalidRevisions(_))
        ));

        value["revisions"] = json!([{ "data": {} }]);
        assert!(matches!(
            validate_import(&value.to_string(), &formpack(), None),
            Err(ImportError::InvalidRevisions(_))
        ));

        value["revisions"] = json!([{ "label": "v1", "data": { "person": { "age": "old" } } }]);
        assert!(matches!(
            validate_import(&value.to_string(), &formpack(), None),
            Err(ImportError::InvalidRevisions(_))
        ));
    }

    #[test]
    fn test_valid_revisions_are_carried() {
        let mut value: Value = serde_json::from_str(&payload(json!({}))).unwrap();
        value["revisions"] = json!([{ "label": "v1", "data": { "person": { "name": "Al" } } }]);

        let validated = validate_import(&value.to_string(), &formpack(), None).unwrap();
        assert_eq!(validated.revisions.len(), 1);
        assert_eq!(validated.revisions[0].label, "v1");
    }

    fn sealed_payload(password: &str) -> String {
        let fp = formpack();
        let now = crate::database::models::now_millis();
        let record = Record {
            id: "r1".to_string(),
            formpack_id: fp.id.clone(),
            title: None,
            locale: "en".to_string(),
            data: json!({"person": {"name": "Alice"}}),
            created_at: now,
            updated_at: now,
        };
        let doc = ExportDocument::new(&fp, &record, None);
        let params = KdfParams {
            m_cost: 8_192,
            t_cost: 1,
            p_cost: 1,
        };
        let envelope = seal_with_password_params(&doc, password, params).unwrap();
        serde_json::to_string(&envelope).unwrap()
    }

    #[test]
    fn test_encrypted_import_requires_password() {
        let raw = sealed_payload("hunter2");
        assert!(matches!(
            validate_import(&raw, &formpack(), None),
            Err(ImportError::PasswordRequired)
        ));
    }

    #[test]
    fn test_encrypted_import_wrong_password() {
        let raw = sealed_payload("hunter2");
        assert!(matches!(
            validate_import(&raw, &formpack(), Some("hunter3")),
            Err(ImportError::DecryptFailed)
        ));
    }

    #[test]
    fn test_encrypted_import_roundtrip() {
        let raw = sealed_payload("hunter2");
        let validated = validate_import(&raw, &formpack(), Some("hunter2")).unwrap();
        assert_eq!(validated.data["person"]["name"], "Alice");
    }

    async fn setup() -> (FormStore, AutosaveCoordinator) {
        let store = FormStore::in_memory().unwrap();
        let autosave = store.autosave(AutosaveConfig {
            debounce: Duration::from_millis(20),
        });
        (store, autosave)
    }

    fn validated(data: Value) -> ValidatedImport {
        ValidatedImport {
            formpack_id: "intake-basic".to_string(),
            locale: "en".to_string(),
            title: None,
            data,
            revisions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_import_new_creates_record_and_sets_active() {
        let (store, autosave) = setup().await;

        let outcome = apply_import(
            validated(json!({"person": {"name": "Alice"}})),
            ImportMode::New,
            &store.records(),
            &store.active(),
            &autosave,
        )
        .await
        .unwrap();

        assert!(outcome.created);
        assert_eq!(store.records().count("intake-basic").await.unwrap(), 1);
        assert_eq!(
            store.active().peek("intake-basic").unwrap().as_deref(),
            Some(outcome.record.id.as_str())
        );
    }

    #[tokio::test]
    async fn test_overwrite_without_confirmation_never_mutates() {
        let (store, autosave) = setup().await;
        let record = store
            .new_draft("intake-basic", "en", json!({"person": {"name": "Bob"}}), None)
            .await
            .unwrap();

        let result = apply_import(
            validated(json!({"person": {"name": "Alice"}})),
            ImportMode::Overwrite { confirmed: false },
            &store.records(),
            &store.active(),
            &autosave,
        )
        .await;

        assert!(matches!(
            result,
            Err(StoreError::Import(ImportError::NotConfirmed))
        ));
        let untouched = store.records().get(&record.id).await.unwrap().unwrap();
        assert_eq!(untouched.data["person"]["name"], "Bob");
    }

    #[tokio::test]
    async fn test_overwrite_without_active_record_fails_fast() {
        let (store, autosave) = setup().await;

        let result = apply_import(
            validated(json!({})),
            ImportMode::Overwrite { confirmed: true },
            &store.records(),
            &store.active(),
            &autosave,
        )
        .await;

        assert!(matches!(
            result,
            Err(StoreError::Import(ImportError::NoActiveRecord))
        ));
        assert_eq!(store.records().count("intake-basic").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_data_in_place() {
        let (store, autosave) = setup().await;
        let record = store
            .new_draft("intake-basic", "en", json!({"person": {"name": "Bob"}}), None)
            .await
            .unwrap();
        autosave.bind(&record.id).await.unwrap();

        // A stale debounced edit is in flight when the import lands.
        autosave
            .record_changed(json!({"person": {"name": "Bobby"}}))
            .await;

        let outcome = apply_import(
            validated(json!({"person": {"name": "Alice"}})),
            ImportMode::Overwrite { confirmed: true },
            &store.records(),
            &store.active(),
            &autosave,
        )
        .await
        .unwrap();

        assert!(!outcome.created);
        assert_eq!(outcome.record.id, record.id);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let saved = store.records().get(&record.id).await.unwrap().unwrap();
        assert_eq!(saved.data["person"]["name"], "Alice");
        assert_eq!(store.records().count("intake-basic").await.unwrap(), 1);
    }
}
