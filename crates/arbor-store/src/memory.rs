//! In-process row store.
//!
//! Rows live in an insertion-ordered map behind a `parking_lot` lock.
//! Snapshots are sent while the write lock is held, so subscribers see
//! them in commit order. Useful for tests and for running without a
//! database; the failure hooks simulate an unreachable backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use arbor_types::{NoteId, Row, RowPatch};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

use crate::backend::{RowSnapshot, RowStore, merge_upsert};
use crate::error::{StoreError, StoreResult};

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Row store held entirely in memory.
pub struct MemoryStore {
    rows: RwLock<IndexMap<NoteId, Row>>,
    event_tx: broadcast::Sender<RowSnapshot>,
    ready: AtomicBool,
    /// Number of upcoming calls that fail with `Unavailable`.
    failures: AtomicU32,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// A store whose subscribers buffer up to `capacity` snapshots.
    pub fn with_capacity(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            rows: RwLock::new(IndexMap::new()),
            event_tx,
            ready: AtomicBool::new(true),
            failures: AtomicU32::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// A store pre-loaded with `rows`. No snapshot is emitted.
    pub fn seeded(rows: impl IntoIterator<Item = Row>) -> Self {
        let store = Self::new();
        {
            let mut map = store.rows.write();
            for row in rows {
                map.insert(row.id.clone(), row);
            }
        }
        store
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Fail the next `count` calls with [`StoreError::Unavailable`].
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Committed upserts and deletes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Live receivers from [`RowStore::subscribe_row_changes`].
    pub fn subscriber_count(&self) -> usize {
        self.event_tx.receiver_count()
    }

    pub fn get(&self, id: &NoteId) -> Option<Row> {
        self.rows.read().get(id).cloned()
    }

    pub fn rows(&self) -> Vec<Row> {
        self.rows.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn check(&self) -> StoreResult<()> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }

    fn emit(&self, rows: &IndexMap<NoteId, Row>) {
        let snapshot: RowSnapshot = Arc::new(rows.values().cloned().collect());
        // No subscribers is fine.
        let _ = self.event_tx.send(snapshot);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn upsert_row(&self, patch: RowPatch) -> StoreResult<()> {
        self.check()?;
        let mut rows = self.rows.write();
        let id = patch.id.clone();
        let row = merge_upsert(rows.get(&id).cloned(), patch)?;
        trace!(id = %id, "upsert row");
        rows.insert(id, row);
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.emit(&rows);
        Ok(())
    }

    async fn delete_row(&self, id: &NoteId) -> StoreResult<()> {
        self.check()?;
        let mut rows = self.rows.write();
        if rows.shift_remove(id).is_some() {
            trace!(id = %id, "delete row");
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.emit(&rows);
        }
        Ok(())
    }

    async fn query_all_rows(&self) -> StoreResult<Vec<Row>> {
        self.check()?;
        Ok(self.rows())
    }

    fn subscribe_row_changes(&self) -> broadcast::Receiver<RowSnapshot> {
        self.event_tx.subscribe()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
