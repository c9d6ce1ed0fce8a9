//! Installation storage key and its on-disk provider.
//!
//! The key lives in a small file of its own, separate from the database,
//! so the two resources fail independently: a present database with a
//! missing key file is the "data unreadable, offer full reset" state, not
//! a generic storage error.

use crate::crypto::{CryptoError, Result};
use aes_gcm::aead::OsRng;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use rand::RngCore;
use std::path::{Path, PathBuf};
use tracing::info;
use zeroize::ZeroizeOnDrop;

/// The per-installation symmetric storage key (32 bytes, AES-256)
///
/// Zeroized on drop; never persisted anywhere except the key file.
#[derive(Clone, ZeroizeOnDrop)]
pub struct StorageKey {
    key: [u8; 32],
}

impl StorageKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Create a key from raw bytes
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Decode a key from its base64url file form
    pub fn from_base64url(encoded: &str) -> Result<Self> {
        let bytes = BASE64URL
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("bad base64url: {}", e)))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", v.len())))?;
        Ok(Self { key })
    }

    /// Encode the key for the key file
    pub fn to_base64url(&self) -> String {
        BASE64URL.encode(self.key)
    }

    /// Raw key bytes (use sparingly)
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

/// Loads and persists the storage key file
pub struct KeyProvider {
    path: PathBuf,
}

impl KeyProvider {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the key file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a key file is present
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the key, failing with `KeyMissing` when the file is absent
    pub fn load(&self) -> Result<StorageKey> {
        if !self.path.exists() {
            return Err(CryptoError::KeyMissing);
        }
        let encoded = std::fs::read_to_string(&self.path)?;
        StorageKey::from_base64url(&encoded)
    }

    /// Load the key, generating and persisting a fresh one on first run
    pub fn load_or_generate(&self) -> Result<StorageKey> {
        match self.load() {
            Ok(key) => Ok(key),
            Err(CryptoError::KeyMissing) => {
                let key = StorageKey::generate();
                self.store(&key)?;
                info!(path = %self.path.display(), "generated new storage key");
                Ok(key)
            }
            Err(e) => Err(e),
        }
    }

    /// Persist a key, creating parent directories as needed
    pub fn store(&self, key: &StorageKey) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, key.to_base64url())?;
        Ok(())
    }

    /// Delete the key file (full local reset)
    pub fn remove(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_key_roundtrip_through_base64url() {
        let key = StorageKey::generate();
        let decoded = StorageKey::from_base64url(&key.to_base64url()).unwrap();
        assert_eq!(key.as_bytes(), decoded.as_bytes());
    }

    #[test]
    fn test_generated_keys_differ() {
        let a = StorageKey::generate();
        let b = StorageKey::generate();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_load_missing_key_is_key_missing() {
        let dir = TempDir::new().unwrap();
        let provider = KeyProvider::new(dir.path().join("storage.key"));
        assert!(matches!(provider.load(), Err(CryptoError::KeyMissing)));
    }

    #[test]
    fn test_load_or_generate_persists() {
        let dir = TempDir::new().unwrap();
        let provider = KeyProvider::new(dir.path().join("storage.key"));

        let first = provider.load_or_generate().unwrap();
        assert!(provider.exists());

        let second = provider.load_or_generate().unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_invalid_key_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.key");
        std::fs::write(&path, "not base64url!!!").unwrap();

        let provider = KeyProvider::new(&path);
        assert!(matches!(provider.load(), Err(CryptoError::InvalidKey(_))));
    }

    #[test]
    fn test_remove_then_load_is_key_missing() {
        let dir = TempDir::new().unwrap();
        let provider = KeyProvider::new(dir.path().join("storage.key"));
        provider.load_or_generate().unwrap();
        provider.remove().unwrap();
        assert!(matches!(provider.load(), Err(CryptoError::KeyMissing)));
    }
}
