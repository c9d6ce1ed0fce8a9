//! Models for the stored collections.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One saved draft of a formpack instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Opaque unique identifier, immutable once created
    pub id: String,
    /// Which form schema this record belongs to
    pub formpack_id: String,
    /// Optional display label
    pub title: Option<String>,
    /// Locale the record's text fields were authored in
    pub locale: String,
    /// Draft document; the store treats this as an opaque JSON blob
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied to an existing record
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub data: Option<Value>,
    pub locale: Option<String>,
    pub title: Option<Option<String>>,
}

/// An immutable historical capture of a record's data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    /// Owning record; snapshots are deleted with it
    pub record_id: String,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Deep copy of the record's data at capture time
    pub data: Value,
}

/// The single cross-formpack reusable data bag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub data: Value,
    pub updated_at: DateTime<Utc>,
}

/// Last-seen version/hash fingerprint of a formpack definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormpackMeta {
    pub formpack_id: String,
    /// Derived change-detection signature (`version` + `hash`)
    pub signature: String,
    pub version: String,
    pub hash: String,
    pub updated_at: DateTime<Utc>,
}

/// Format a timestamp the way the surrounding app does: RFC 3339 with
/// millisecond precision and a `Z` suffix, so exported values survive a
/// JavaScript `new Date(x).toISOString()` round trip.
pub fn iso_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored RFC 3339 timestamp
pub fn parse_iso_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Current time truncated to the stored millisecond precision
pub fn now_millis() -> DateTime<Utc> {
    // Round-trips exactly through iso_timestamp/parse_iso_timestamp.
    parse_iso_timestamp(&iso_timestamp(Utc::now())).unwrap_or_else(Utc::now)
}
