//! AES-256-GCM envelope encryption for stored payloads.
//!
//! Every payload written to the records, snapshots, profile and
//! formpack-meta collections is wrapped in an [`Envelope`]:
//! a `kind` discriminant, a fresh random 96-bit IV and the ciphertext
//! (tag appended), both base64url-encoded. Readers that find a payload
//! without the discriminant treat it as legacy plaintext and return it
//! unchanged.

use crate::crypto::{CryptoError, Result, StorageKey};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminant marking a stored payload as an encrypted envelope
pub const STORAGE_ENVELOPE_KIND: &str = "formvault-encrypted";

/// The encrypted-at-rest wrapper around a JSON payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Fixed discriminant, [`STORAGE_ENVELOPE_KIND`]
    pub kind: String,

    /// base64url-encoded 96-bit IV
    pub iv: String,

    /// base64url-encoded ciphertext with the 128-bit tag appended
    pub ciphertext: String,
}

/// Encrypts and decrypts stored payloads with the installation key
#[derive(Clone)]
pub struct StorageCipher {
    cipher: Aes256Gcm,
}

impl StorageCipher {
    pub fn new(key: &StorageKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.as_bytes().into()),
        }
    }

    /// Encrypt a JSON value into an envelope with a fresh IV
    pub fn encrypt(&self, value: &Value) -> Result<Envelope> {
        let plaintext = serde_json::to_vec(value)
            .map_err(|e| CryptoError::EncryptFailed(format!("serialize: {}", e)))?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|e| CryptoError::EncryptFailed(format!("{}", e)))?;

        Ok(Envelope {
            kind: STORAGE_ENVELOPE_KIND.to_string(),
            iv: BASE64URL.encode(nonce),
            ciphertext: BASE64URL.encode(&ciphertext),
        })
    }

    /// Decrypt an envelope back into its JSON value
    ///
    /// Fails with `InvalidEnvelope` for malformed fields and
    /// `DecryptFailed` when the authentication tag does not verify
    /// (wrong key, corruption or tampering).
    pub fn decrypt(&self, envelope: &Envelope) -> Result<Value> {
        if envelope.kind != STORAGE_ENVELOPE_KIND {
            return Err(CryptoError::InvalidEnvelope(format!(
                "unexpected kind {:?}",
                envelope.kind
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

        let ciphertext = BASE64URL
            .decode(&envelope.ciphertext)
            .map_err(|e| CryptoError::InvalidEnvelope(format!("bad ciphertext: {}", e)))?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
            .map_err(|_| CryptoError::DecryptFailed)?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| CryptoError::InvalidEnvelope(format!("bad plaintext json: {}", e)))
    }

    /// Serialize a payload to the stored text form (envelope JSON)
    pub fn wrap(&self, value: &Value) -> Result<String> {
        let envelope = self.encrypt(value)?;
        serde_json::to_string(&envelope)
            .map_err(|e| CryptoError::EncryptFailed(format!("serialize envelope: {}", e)))
    }

    /// Parse a stored text payload, decrypting when it is an envelope
    ///
    /// A JSON object carrying the [`STORAGE_ENVELOPE_KIND`] discriminant
    /// is decrypted; anything else is pre-encryption data and is returned
    /// as-is.
    pub fn unwrap(&self, stored: &str) -> Result<Value> {
        let value: Value = serde_json::from_str(stored)
            .map_err(|e| CryptoError::InvalidEnvelope(format!("stored payload not json: {}", e)))?;

        if Self::is_envelope(&value) {
            let envelope: Envelope = serde_json::from_value(value)
                .map_err(|e| CryptoError::InvalidEnvelope(format!("{}", e)))?;
            self.decrypt(&envelope)
        } else {
            Ok(value)
        }
    }

    fn is_envelope(value: &Value) -> bool {
        value
            .get("kind")
            .and_then(Value::as_str)
            .is_some_and(|kind| kind == STORAGE_ENVELOPE_KIND)
    }
}
