//! SQLite persistence layer for the local store.
//!
//! One database file per installation holds the records, snapshots,
//! profile and formpack-meta collections. Payload columns store the
//! encrypted envelope JSON produced by the crypto layer.

pub mod models;
pub mod schema;

pub use models::{iso_timestamp, parse_iso_timestamp, FormpackMeta, Profile, Record, Snapshot};
pub use schema::{Database, CURRENT_SCHEMA_VERSION};

use thiserror::Error;

/// Errors from the storage engine
///
/// Engine failures are deliberately distinct from `CryptoError::KeyMissing`:
/// a missing key routes to the full-reset recovery path, a storage error
/// does not.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("file IO error: {0}")]
    FileIo(String),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("unsupported store schema version {found}, supported {supported}")]
    SchemaVersion { found: i32, supported: i32 },
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;
