//! Offline store for structured medical paperwork.
//!
//! This library is the persistence core of an offline-first form-filling
//! application: an encrypted, multi-collection local store for form
//! drafts ("records"), point-in-time backups ("snapshots"), a reusable
//! cross-formpack profile, and formpack change-detection metadata,
//! together with the debounced autosave coordinator and the import/export
//! validator that gate data moving in and out of the store.
//!
//! Nothing here talks to a network. The data is encrypted at rest with a
//! per-installation key kept in a separate key file, so a readable
//! database without its key is a recoverable-by-reset state rather than a
//! crash.

pub mod autosave;
pub mod crypto;
pub mod database;
pub mod export;
pub mod formpack;
pub mod import;
pub mod platform;
pub mod schema;
pub mod store;

pub use autosave::{AutosaveConfig, AutosaveCoordinator, AutosaveState};
pub use crypto::{CryptoError, Envelope, KeyProvider, StorageCipher, StorageKey};
pub use database::{FormpackMeta, Profile, Record, Snapshot, StorageError};
pub use database::models::RecordPatch;
pub use export::{ExportDocument, ExportEnvelope, ExportRevision};
pub use formpack::{Formpack, ProfileBinding};
pub use import::{ImportError, ImportMode, ImportOutcome, ValidatedImport};
pub use store::{
    ActiveRecords, FormStore, FormpackMetaStore, ProfileStore, RecordStore, SnapshotStore,
    StoreStatus,
};

use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Top-level error for store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// A record or snapshot that an operation requires does not exist
    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("import rejected: {0}")]
    Import(#[from] ImportError),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
