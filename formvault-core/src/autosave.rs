//! Debounced write pipeline from form edits to the record store.
//!
//! Each form-data change parks the latest value and (re)starts a
//! debounce timer; when the timer fires the value is committed through
//! `RecordStore::update`. `mark_saved` is the bypass for callers that
//! already hold the authoritative value (reset, import overwrite,
//! snapshot restore, dummy-data fill, draft switch): it cancels the
//! timer and commits immediately so no stale debounced write can land
//! afterwards.
//!
//! A commit that finds its record gone never creates a fresh one, and a
//! failed commit leaves the coordinator usable; the next edit retries
//! through the normal debounce path.

use crate::database::models::RecordPatch;
use crate::database::Record;
use crate::store::RecordStore;
use crate::{Result, StoreError};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Tuning for the autosave pipeline
#[derive(Debug, Clone)]
pub struct AutosaveConfig {
    /// How long to wait after the last edit before committing
    pub debounce: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        // A UX constant; correctness never depends on the exact value.
        Self {
            debounce: Duration::from_millis(400),
        }
    }
}

/// Where the coordinator is in its commit cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutosaveState {
    Idle,
    Pending,
    Committing,
}

/// Debounced, cancellable write pipeline for one bound record at a time
#[derive(Clone)]
pub struct AutosaveCoordinator {
    records: RecordStore,
    config: AutosaveConfig,
    inner: Arc<tokio::sync::Mutex<Inner>>,
    // Every commit holds this across its write, so a bypass commit and a
    // still-in-flight debounced commit can never land out of order.
    commit_gate: Arc<tokio::sync::Mutex<()>>,
}

struct Inner {
    record_id: Option<String>,
    pending: Option<Value>,
    state: AutosaveState,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    last_error: Option<String>,
}

impl Inner {
    /// Invalidate any scheduled or in-flight debounce timer
    fn cancel_timer(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl AutosaveCoordinator {
    pub fn new(records: RecordStore, config: AutosaveConfig) -> Self {
        Self {
            records,
            config,
            inner: Arc::new(tokio::sync::Mutex::new(Inner {
                record_id: None,
                pending: None,
                state: AutosaveState::Idle,
                generation: 0,
                timer: None,
                last_error: None,
            })),
            commit_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Bind to a record, flushing any pending write for the previous one
    /// first so drafts never bleed into each other.
    pub async fn bind(&self, record_id: &str) -> Result<()> {
        self.flush().await?;

        let mut inner = self.inner.lock().await;
        inner.cancel_timer();
        inner.record_id = Some(record_id.to_string());
        inner.pending = None;
        inner.state = AutosaveState::Idle;
        inner.last_error = None;
        Ok(())
    }

    /// Unbind on teardown. Anything still pending is discarded and no
    /// timer fires afterwards.
    pub async fn unbind(&self) {
        let mut inner = self.inner.lock().await;
        inner.cancel_timer();
        inner.record_id = None;
        inner.pending = None;
        inner.state = AutosaveState::Idle;
    }

    /// The record currently bound, if any
    pub async fn bound_record(&self) -> Option<String> {
        self.inner.lock().await.record_id.clone()
    }

    pub async fn state(&self) -> AutosaveState {
        self.inner.lock().await.state
    }

    /// Message of the most recent failed commit, cleared by success
    pub async fn last_error(&self) -> Option<String> {
        self.inner.lock().await.last_error.clone()
    }

    /// Park the latest form value and restart the debounce timer
    pub async fn record_changed(&self, data: Value) {
        let mut inner = self.inner.lock().await;
        if inner.record_id.is_none() {
            warn!("form change with no bound record, dropping");
            return;
        }

        inner.pending = Some(data);
        inner.state = AutosaveState::Pending;
        inner.cancel_timer();

        let generation = inner.generation;
        let debounce = self.config.debounce;
        let coordinator = self.clone();
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            coordinator.commit_debounced(generation).await;
        }));
    }

    /// Commit the authoritative value now, bypassing the debounce.
    ///
    /// Cancels any pending timer first, commits through
    /// `RecordStore::update` and leaves the coordinator idle. Returns
    /// `None` when the bound record no longer exists; it is never
    /// recreated.
    pub async fn mark_saved(&self, data: Value) -> Result<Option<Record>> {
        let record_id = {
            let mut inner = self.inner.lock().await;
            let Some(record_id) = inner.record_id.clone() else {
                return Err(StoreError::InvalidInput(
                    "no bound record to save".to_string(),
                ));
            };
            inner.cancel_timer();
            inner.pending = None;
            inner.state = AutosaveState::Committing;
            record_id
        };

        self.commit_now(record_id, data).await
    }

    /// Commit any pending value immediately (teardown, draft switch)
    pub async fn flush(&self) -> Result<Option<Record>> {
        let taken = {
            let mut inner = self.inner.lock().await;
            inner.cancel_timer();
            match (inner.record_id.clone(), inner.pending.take()) {
                (Some(record_id), Some(data)) => {
                    inner.state = AutosaveState::Committing;
                    Some((record_id, data))
                }
                _ => {
                    inner.state = AutosaveState::Idle;
                    None
                }
            }
        };

        let Some((record_id, data)) = taken else {
            return Ok(None);
        };
        self.commit_now(record_id, data).await
    }

    /// Timer-driven commit; a generation mismatch means the timer was
    /// superseded after its sleep and must not write.
    async fn commit_debounced(&self, generation: u64) {
        let _gate = self.commit_gate.lock().await;

        let (record_id, data) = {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                return;
            }
            let (Some(record_id), Some(data)) = (inner.record_id.clone(), inner.pending.take())
            else {
                return;
            };
            inner.state = AutosaveState::Committing;
            (record_id, data)
        };

        let result = self
            .records
            .update(
                &record_id,
                RecordPatch {
                    data: Some(data),
                    ..Default::default()
                },
            )
            .await;

        let mut inner = self.inner.lock().await;
        match result {
            Ok(Some(record)) => {
                debug!(record_id = %record.id, "autosave committed");
                inner.last_error = None;
            }
            Ok(None) => {
                warn!(record_id = %record_id, "autosave target gone, not recreating");
            }
            Err(e) => {
                warn!(error = %e, "autosave commit failed");
                inner.last_error = Some(e.to_string());
            }
        }
        // A newer edit may have re-entered Pending while we were writing.
        if inner.generation == generation {
            inner.state = AutosaveState::Idle;
        }
    }

    async fn commit_now(&self, record_id: String, data: Value) -> Result<Option<Record>> {
        let _gate = self.commit_gate.lock().await;

        let result = self
            .records
            .update(
                &record_id,
                RecordPatch {
                    data: Some(data),
                    ..Default::default()
                },
            )
            .await;

        let mut inner = self.inner.lock().await;
        if inner.pending.is_none() {
            inner.state = AutosaveState::Idle;
        }
        match result {
            Ok(record) => {
                if record.is_none() {
                    warn!(record_id = %record_id, "save target gone, not recreating");
                }
                inner.last_error = None;
                Ok(record)
            }
            Err(e) => {
                warn!(error = %e, "commit failed");
                inner.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FormStore;
    use serde_json::json;

    fn quick() -> AutosaveConfig {
        AutosaveConfig {
            debounce: Duration::from_millis(20),
        }
    }

    async fn setup() -> (FormStore, Record, AutosaveCoordinator) {
        let store = FormStore::in_memory().unwrap();
        let record = store
            .records()
            .create("intake-basic", "en", json!({}), None)
            .await
            .unwrap();
        let autosave = AutosaveCoordinator::new(store.records(), quick());
        autosave.bind(&record.id).await.unwrap();
        (store, record, autosave)
    }

    #[tokio::test]
    async fn test_debounced_edit_is_committed() {
        let (store, record, autosave) = setup().await;

        autosave
            .record_changed(json!({"person": {"name": "Alice"}}))
            .await;
        assert_eq!(autosave.state().await, AutosaveState::Pending);

        tokio::time::sleep(Duration::from_millis(100)).await;

        let saved = store.records().get(&record.id).await.unwrap().unwrap();
        assert_eq!(saved.data, json!({"person": {"name": "Alice"}}));
        assert_eq!(autosave.state().await, AutosaveState::Idle);
    }

    #[tokio::test]
    async fn test_rapid_edits_commit_the_last_value() {
        let (store, record, autosave) = setup().await;

        for name in ["A", "Al", "Ali", "Alice"] {
            autosave.record_changed(json!({"name": name})).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let saved = store.records().get(&record.id).await.unwrap().unwrap();
        assert_eq!(saved.data, json!({"name": "Alice"}));
        assert_eq!(store.records().count("intake-basic").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_saved_cancels_stale_debounce() {
        let (store, record, autosave) = setup().await;

        autosave.record_changed(json!({"name": "stale"})).await;
        autosave
            .mark_saved(json!({"name": "authoritative"}))
            .await
            .unwrap();
        assert_eq!(autosave.state().await, AutosaveState::Idle);

        // Wait past the debounce window: the cancelled timer must not
        // overwrite the bypass commit.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let saved = store.records().get(&record.id).await.unwrap().unwrap();
        assert_eq!(saved.data, json!({"name": "authoritative"}));
    }

    #[tokio::test]
    async fn test_bind_flushes_previous_record() {
        let (store, first, autosave) = setup().await;
        let second = store
            .records()
            .create("intake-basic", "en", json!({}), None)
            .await
            .unwrap();

        autosave.record_changed(json!({"name": "first-edit"})).await;
        autosave.bind(&second.id).await.unwrap();

        // The pending edit landed on the first record before the switch.
        let saved = store.records().get(&first.id).await.unwrap().unwrap();
        assert_eq!(saved.data, json!({"name": "first-edit"}));

        // And nothing bled into the second record.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let untouched = store.records().get(&second.id).await.unwrap().unwrap();
        assert_eq!(untouched.data, json!({}));
        assert_eq!(store.records().count("intake-basic").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_vanished_record_is_not_recreated() {
        let (store, record, autosave) = setup().await;
        store.records().delete(&record.id).await.unwrap();

        autosave.record_changed(json!({"name": "ghost"})).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.records().count("intake-basic").await.unwrap(), 0);
        assert_eq!(autosave.state().await, AutosaveState::Idle);
    }

    #[tokio::test]
    async fn test_unbind_discards_pending() {
        let (store, record, autosave) = setup().await;

        autosave.record_changed(json!({"name": "discarded"})).await;
        autosave.unbind().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let saved = store.records().get(&record.id).await.unwrap().unwrap();
        assert_eq!(saved.data, json!({}));
    }

    #[tokio::test]
    async fn test_mark_saved_without_binding_is_invalid() {
        let store = FormStore::in_memory().unwrap();
        let autosave = AutosaveCoordinator::new(store.records(), quick());

        assert!(matches!(
            autosave.mark_saved(json!({})).await,
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_flush_with_nothing_pending_is_a_noop() {
        let (_store, _record, autosave) = setup().await;
        assert!(autosave.flush().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_changes_without_binding_are_dropped() {
        let store = FormStore::in_memory().unwrap();
        let autosave = AutosaveCoordinator::new(store.records(), quick());

        autosave.record_changed(json!({"name": "nowhere"})).await;
        assert_eq!(autosave.state().await, AutosaveState::Idle);
    }
}
