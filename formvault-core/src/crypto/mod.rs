//! Cryptographic layer for the local store.
//!
//! This module provides:
//! - The installation storage key and its on-disk provider
//! - AES-256-GCM envelope encryption for stored payloads
//! - Argon2id key derivation for password-protected exports

pub mod cipher;
pub mod kdf;
pub mod keyfile;

pub use cipher::{Envelope, StorageCipher, STORAGE_ENVELOPE_KIND};
pub use kdf::{derive_export_key, KdfParams};
pub use keyfile::{KeyProvider, StorageKey};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
///
/// `KeyMissing` is deliberately its own variant: the caller must route it
/// to the full-local-reset recovery path, not treat it as a transient
/// storage failure.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("storage key is missing - local data cannot be decrypted")]
    KeyMissing,

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("encryption failed: {0}")]
    EncryptFailed(String),

    #[error("decryption failed - wrong key or corrupted data")]
    DecryptFailed,

    #[error("malformed envelope: {0}")]
    InvalidEnvelope(String),

    #[error("key derivation failed: {0}")]
    KdfFailed(String),

    #[error("unsupported crypto primitive: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
