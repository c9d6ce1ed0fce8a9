//! Formpack manifest data.
//!
//! Fetching and refreshing manifests is an external collaborator's job;
//! the store only consumes the parts it needs: identity, supported
//! locales, the JSON schema for import validation, and the bindings that
//! map profile fields into a formpack's documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A formpack definition as seen by the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formpack {
    pub id: String,
    pub version: String,
    /// Locales this formpack ships translations for
    #[serde(default)]
    pub locales: Vec<String>,
    /// JSON schema for the formpack's documents
    pub schema: Value,
    /// Profile bindings: semantic key -> JSON pointer into the document
    #[serde(default)]
    pub profile_fields: Vec<ProfileBinding>,
}

/// Maps one cross-formpack profile field into this formpack's documents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileBinding {
    /// Semantic profile key, e.g. `patient.name`
    pub key: String,
    /// JSON pointer to the field inside the document, e.g. `/person/name`
    pub pointer: String,
}

impl Formpack {
    pub fn supports_locale(&self, locale: &str) -> bool {
        self.locales.iter().any(|l| l == locale)
    }

    /// Content hash over the schema, for change detection
    pub fn content_hash(&self) -> String {
        let schema_text = self.schema.to_string();
        let digest = Sha256::digest(schema_text.as_bytes());
        hex_prefix(&digest, 16)
    }
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    bytes
        .iter()
        .take(len)
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn formpack() -> Formpack {
        Formpack {
            id: "intake-basic".to_string(),
            version: "1.4.0".to_string(),
            locales: vec!["de".to_string(), "en".to_string()],
            schema: json!({ "type": "object" }),
            profile_fields: vec![ProfileBinding {
                key: "patient.name".to_string(),
                pointer: "/person/name".to_string(),
            }],
        }
    }

    #[test]
    fn test_supports_locale() {
        let fp = formpack();
        assert!(fp.supports_locale("de"));
        assert!(!fp.supports_locale("fr"));
    }

    #[test]
    fn test_content_hash_tracks_schema() {
        let mut fp = formpack();
        let before = fp.content_hash();
        assert_eq!(before, fp.content_hash());

        fp.schema = json!({ "type": "object", "properties": {} });
        assert_ne!(before, fp.content_hash());
    }

    #[test]
    fn test_manifest_deserializes_with_defaults() {
        let fp: Formpack = serde_json::from_value(json!({
            "id": "intake-basic",
            "version": "1.0.0",
            "schema": { "type": "object" }
        }))
        .unwrap();
        assert!(fp.locales.is_empty());
        assert!(fp.profile_fields.is_empty());
    }
}
