//! Export documents and the password-protected export envelope.
//!
//! An export is a downloaded JSON file, never a network transmission.
//! Field names follow the surrounding app's JSON conventions
//! (camelCase, `exportedAt` in JavaScript `toISOString` form). The
//! optional password envelope uses an Argon2id-derived key, distinct
//! from the at-rest storage key; salt and KDF parameters travel inside
//! the envelope.

use crate::crypto::kdf::{derive_export_key, generate_salt, KdfParams};
use crate::crypto::{self, CryptoError};
use crate::database::models::{iso_timestamp, now_millis, parse_iso_timestamp};
use crate::database::{Record, StorageError};
use crate::formpack::Formpack;
use crate::Result;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::Zeroize;

/// Discriminant marking a password-protected export file
pub const EXPORT_ENVELOPE_KIND: &str = "formvault-json-encrypted";

const APP_ID: &str = "formvault";
const EXPORT_CIPHER: &str = "AES-GCM";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInfo {
    pub id: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormpackInfo {
    pub id: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub locale: String,
    pub updated_at: String,
}

/// A named prior version carried alongside the current data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRevision {
    pub label: String,
    pub data: Value,
}

/// The exported JSON document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub app: AppInfo,
    pub formpack: FormpackInfo,
    pub record: RecordInfo,
    pub locale: String,
    pub exported_at: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revisions: Option<Vec<ExportRevision>>,
}

impl ExportDocument {
    pub fn new(
        formpack: &Formpack,
        record: &Record,
        revisions: Option<Vec<ExportRevision>>,
    ) -> Self {
        Self {
            app: AppInfo {
                id: APP_ID.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            formpack: FormpackInfo {
                id: formpack.id.clone(),
                version: formpack.version.clone(),
            },
            record: RecordInfo {
                id: record.id.clone(),
                title: record.title.clone(),
                locale: record.locale.clone(),
                updated_at: iso_timestamp(record.updated_at),
            },
            locale: record.locale.clone(),
            exported_at: iso_timestamp(now_millis()),
            data: record.data.clone(),
            revisions,
        }
    }

    /// `{formpackId}_{recordIdOrTitle}_{yyyy-MM-dd}_{locale}.json`
    pub fn filename(&self) -> String {
        let label = self
            .record
            .title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.record.id);
        let date = parse_iso_timestamp(&self.exported_at)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| self.exported_at.chars().take(10).collect());

        format!(
            "{}_{}_{}_{}.json",
            sanitize(&self.formpack.id),
            sanitize(label),
            date,
            sanitize(&self.locale)
        )
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| StorageError::Serialization(e.to_string()).into())
    }
}

/// Keep filename parts to a safe character set
fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    cleaned.trim_matches('-').chars().take(60).collect()
}

/// Password-protected export wrapper, distinct from the at-rest envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportEnvelope {
    /// Fixed discriminant, [`EXPORT_ENVELOPE_KIND`]
    pub kind: String,
    pub cipher: String,
    /// base64url-encoded 96-bit IV
    pub iv: String,
    /// base64url-encoded KDF salt
    pub salt: String,
    pub kdf: KdfParams,
    /// base64url-encoded ciphertext with the tag appended
    pub ciphertext: String,
}

/// Whether a parsed payload is a password-protected export
pub fn is_export_envelope(value: &Value) -> bool {
    value.get("kind").and_then(Value::as_str) == Some(EXPORT_ENVELOPE_KIND)
}

/// Encrypt an export document under a password
pub fn seal_with_password(
    document: &ExportDocument,
    password: &str,
) -> crypto::Result<ExportEnvelope> {
    seal_with_password_params(document, password, KdfParams::default())
}

pub fn seal_with_password_params(
    document: &ExportDocument,
    password: &str,
    params: KdfParams,
) -> crypto::Result<ExportEnvelope> {
    let salt = generate_salt();
    let mut key = derive_export_key(password, &salt, &params)?;
    let aead = Aes256Gcm::new((&key).into());
    key.zeroize();

    let plaintext = serde_json::to_vec(document)
        .map_err(|e| CryptoError::EncryptFailed(format!("serialize: {}", e)))?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = aead
        .encrypt(&nonce, plaintext.as_slice())
        .map_err(|e| CryptoError::EncryptFailed(format!("{}", e)))?;

    Ok(ExportEnvelope {
        kind: EXPORT_ENVELOPE_KIND.to_string(),
        cipher: EXPORT_CIPHER.to_string(),
        iv: BASE64URL.encode(nonce),
        salt: BASE64URL.encode(salt),
        kdf: params,
        ciphertext: BASE64URL.encode(&ciphertext),
    })
}

/// Decrypt a password-protected export back to its plaintext JSON.
///
/// A wrong password and a corrupted ciphertext are indistinguishable by
/// construction; both fail with `DecryptFailed`.
pub fn open_with_password(envelope: &ExportEnvelope, password: &str) -> crypto::Result<Value> {
    if envelope.kind != EXPORT_ENVELOPE_KIND {
        return Err(CryptoError::InvalidEnvelope(format!(
            "unexpected kind {:?}",
            envelope.kind
        )));
    }
    if envelope.cipher != EXPORT_CIPHER {
        return Err(CryptoError::Unsupported(format!(
            "cipher {:?}",
            envelope.cipher
        )));
    }

    let iv = BASE64URL
        .decode(&envelope.iv)
        .map_err(|e| CryptoError::InvalidEnvelope(format!("bad iv: {}", e)))?;
    if iv.len() != 12 {
        return Err(CryptoError::InvalidEnvelope(format!(
            "iv must be 12 bytes, got {}",
            iv.len()
        )));
    }
    let salt = BASE64URL
        .decode(&envelope.salt)
        .map_err(|e| CryptoError::InvalidEnvelope(format!("bad salt: {}", e)))?;
    let ciphertext = BASE64URL
        .decode(&envelope.ciphertext)
        .map_err(|e| CryptoError::InvalidEnvelope(format!("bad ciphertext: {}", e)))?;

    let mut key = derive_export_key(password, &salt, &envelope.kdf)?;
    let aead = Aes256Gcm::new((&key).into());
    key.zeroize();

    let plaintext = aead
        .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
        .map_err(|_| CryptoError::DecryptFailed)?;

    serde_json::from_slice(&plaintext)
        .map_err(|e| CryptoError::InvalidEnvelope(format!("bad plaintext json: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn formpack() -> Formpack {
        Formpack {
            id: "intake-basic".to_string(),
            version: "1.4.0".to_string(),
            locales: vec!["de".to_string(), "en".to_string()],
            schema: json!({ "type": "object" }),
            profile_fields: Vec::new(),
        }
    }

    fn record(title: Option<&str>) -> Record {
        let now = crate::database::models::now_millis();
        Record {
            id: "6f9619ff-8b86-d011-b42d-00c04fc964ff".to_string(),
            formpack_id: "intake-basic".to_string(),
            title: title.map(str::to_string),
            locale: "de".to_string(),
            data: json!({"person": {"name": "Alice"}}),
            created_at: now,
            updated_at: now,
        }
    }

    fn fast_kdf() -> KdfParams {
        KdfParams {
            m_cost: 8_192,
            t_cost: 1,
            p_cost: 1,
        }
    }

    #[test]
    fn test_filename_uses_title_when_present() {
        let doc = ExportDocument::new(&formpack(), &record(Some("Herr Müller / Intake")), None);
        let date = Utc::now().format("%Y-%m-%d").to_string();
        assert_eq!(
            doc.filename(),
            format!("intake-basic_Herr-M-ller---Intake_{}_de.json", date)
        );
    }

    #[test]
    fn test_filename_falls_back_to_record_id() {
        let doc = ExportDocument::new(&formpack(), &record(None), None);
        assert!(doc
            .filename()
            .starts_with("intake-basic_6f9619ff-8b86-d011-b42d-00c04fc964ff_"));
        assert!(doc.filename().ends_with("_de.json"));
    }

    #[test]
    fn test_document_serializes_camel_case() {
        let doc = ExportDocument::new(&formpack(), &record(Some("T")), None);
        let text = doc.to_json().unwrap();

        assert!(text.contains("\"exportedAt\""));
        assert!(text.contains("\"updatedAt\""));
        assert!(!text.contains("\"exported_at\""));
        // No revisions key at all when none are attached.
        assert!(!text.contains("\"revisions\""));
    }

    #[test]
    fn test_exported_at_round_trips_as_js_iso_string() {
        let doc = ExportDocument::new(&formpack(), &record(None), None);
        let parsed = parse_iso_timestamp(&doc.exported_at).unwrap();
        assert_eq!(iso_timestamp(parsed), doc.exported_at);
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let doc = ExportDocument::new(&formpack(), &record(Some("T")), None);
        let envelope = seal_with_password_params(&doc, "hunter2", fast_kdf()).unwrap();
        assert_eq!(envelope.kind, EXPORT_ENVELOPE_KIND);
        assert_eq!(envelope.cipher, "AES-GCM");

        let value = open_with_password(&envelope, "hunter2").unwrap();
        assert!(is_export_envelope(&serde_json::to_value(&envelope).unwrap()));
        assert_eq!(value["data"]["person"]["name"], "Alice");
        assert_eq!(value["formpack"]["id"], "intake-basic");
    }

    #[test]
    fn test_wrong_password_fails_typed() {
        let doc = ExportDocument::new(&formpack(), &record(None), None);
        let envelope = seal_with_password_params(&doc, "hunter2", fast_kdf()).unwrap();

        assert!(matches!(
            open_with_password(&envelope, "hunter3"),
            Err(CryptoError::DecryptFailed)
        ));
    }

    #[test]
    fn test_unknown_cipher_is_unsupported() {
        let doc = ExportDocument::new(&formpack(), &record(None), None);
        let mut envelope = seal_with_password_params(&doc, "pw", fast_kdf()).unwrap();
        envelope.cipher = "ROT13".to_string();

        assert!(matches!(
            open_with_password(&envelope, "pw"),
            Err(CryptoError::Unsupported(_))
        ));
    }

    #[test]
    fn test_revisions_serialize_with_labels() {
        let revisions = vec![ExportRevision {
            label: "before surgery".to_string(),
            data: json!({"person": {"name": "Al"}}),
        }];
        let doc = ExportDocument::new(&formpack(), &record(None), Some(revisions));
        let value: Value = serde_json::from_str(&doc.to_json().unwrap()).unwrap();
        assert_eq!(value["revisions"][0]["label"], "before surgery");
    }
}
