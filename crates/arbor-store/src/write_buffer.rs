//! Debounced write-behind queue between the reconciler and a [`RowStore`].
//!
//! The reconciler enqueues [`RowChange`]s as the forest changes and never
//! waits on the store. Per id, the buffer keeps at most one pending write
//! and at most one in-flight write:
//!
//! ```text
//!   enqueue ──▶ pending (merged per id, due after debounce)
//!                  │ flush
//!                  ▼
//!               in flight ──▶ store ──ok──▶ done
//!                  │ transient error
//!                  ├── newer pending write?  fold into it (superseded)
//!                  └── else  back to pending with backoff, until max_attempts
//! ```
//!
//! Writes for one id go out in enqueue order: an id with a write in flight
//! is skipped until that write settles, and only one flush runs at a time.
//! While writes are pending or in flight, [`WriteBuffer::overlay`] replays
//! them over incoming store snapshots so echoes of older state cannot undo
//! newer local edits.

use std::sync::Arc;

use arbor_tree::RowChange;
use arbor_types::{NoteId, Row, RowPatch};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, trace, warn};

use crate::backend::RowStore;
use crate::config::ArborConfig;
use crate::error::StoreResult;

/// A queued write for one id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingWrite {
    Upsert(RowPatch),
    Delete,
}

/// What one flush pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    /// Failed writes put back with a backoff delay.
    pub retried: usize,
    /// Failed writes folded into a newer pending write for the same id.
    pub superseded: usize,
    /// Writes given up on.
    pub dropped: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl std::ops::AddAssign for FlushReport {
    fn add_assign(&mut self, other: Self) {
        self.written += other.written;
        self.retried += other.retried;
        self.superseded += other.superseded;
        self.dropped += other.dropped;
    }
}

struct Entry {
    write: PendingWrite,
    seq: u64,
    due: Instant,
    attempts: u32,
}

struct Flight {
    id: NoteId,
    write: PendingWrite,
    seq: u64,
    attempts: u32,
}

#[derive(Default)]
struct Queue {
    pending: IndexMap<NoteId, Entry>,
    in_flight: IndexMap<NoteId, (u64, PendingWrite)>,
    next_seq: u64,
}

impl Queue {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// Cloneable handle to a shared write queue.
#[derive(Clone)]
pub struct WriteBuffer {
    queue: Arc<Mutex<Queue>>,
    flush_lock: Arc<tokio::sync::Mutex<()>>,
    config: Arc<ArborConfig>,
}

impl WriteBuffer {
    pub fn new(config: &ArborConfig) -> Self {
        Self {
            queue: Arc::new(Mutex::new(Queue::default())),
            flush_lock: Arc::new(tokio::sync::Mutex::new(())),
            config: Arc::new(config.clone()),
        }
    }

    /// Queue a row change. Upserts are stamped with the current time and
    /// merged into any pending upsert for the same id; a delete replaces
    /// whatever is pending. Either way the debounce restarts.
    pub fn enqueue(&self, change: RowChange) {
        let due = Instant::now() + self.config.debounce();
        let mut queue = self.queue.lock();
        let seq = queue.bump();
        let (id, write) = match change {
            RowChange::Upsert(patch) => {
                let patch = patch.with_updated_at(arbor_types::now());
                let id = patch.id.clone();
                let write = match queue.pending.shift_remove(&id) {
                    Some(Entry {
                        write: PendingWrite::Upsert(mut earlier),
                        ..
                    }) => {
                        earlier.merge(patch);
                        PendingWrite::Upsert(earlier)
                    }
                    _ => PendingWrite::Upsert(patch),
                };
                (id, write)
            }
            RowChange::Delete(id) => {
                queue.pending.shift_remove(&id);
                (id, PendingWrite::Delete)
            }
        };
        trace!(id = %id, seq, "write queued");
        queue.pending.insert(
            id,
            Entry {
                write,
                seq,
                due,
                attempts: 0,
            },
        );
    }

    pub fn enqueue_all(&self, changes: impl IntoIterator<Item = RowChange>) {
        for change in changes {
            self.enqueue(change);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.queue.lock().pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.queue.lock().in_flight.len()
    }

    /// Nothing pending and nothing in flight.
    pub fn is_idle(&self) -> bool {
        let queue = self.queue.lock();
        queue.pending.is_empty() && queue.in_flight.is_empty()
    }

    /// The write currently queued for `id`, if any.
    pub fn pending(&self, id: &NoteId) -> Option<PendingWrite> {
        self.queue.lock().pending.get(id).map(|entry| entry.write.clone())
    }

    /// Replay in-flight then pending writes, oldest first, over `rows`.
    ///
    /// Only an upsert that carries full create fields may add a row. A
    /// field edit for a row missing from `rows` means the note was deleted
    /// elsewhere: the edit is skipped, and if it is still pending it is
    /// discarded so the flush does not bring the note back.
    pub fn overlay(&self, rows: &mut Vec<Row>) {
        let mut queue = self.queue.lock();
        let mut writes: Vec<(u64, NoteId, PendingWrite)> = queue
            .in_flight
            .iter()
            .map(|(id, (seq, write))| (*seq, id.clone(), write.clone()))
            .chain(
                queue
                    .pending
                    .iter()
                    .map(|(id, entry)| (entry.seq, id.clone(), entry.write.clone())),
            )
            .collect();
        writes.sort_by_key(|(seq, _, _)| *seq);

        let mut orphaned = Vec::new();
        for (seq, id, write) in writes {
            let position = rows.iter().position(|row| row.id == id);
            match (write, position) {
                (PendingWrite::Upsert(patch), Some(index)) => rows[index].apply_patch(patch),
                (PendingWrite::Upsert(patch), None) if patch.is_create() => {
                    rows.push(Row::from_patch(patch))
                }
                (PendingWrite::Upsert(_), None) => orphaned.push((seq, id)),
                (PendingWrite::Delete, Some(index)) => {
                    rows.remove(index);
                }
                (PendingWrite::Delete, None) => {}
            }
        }

        for (seq, id) in orphaned {
            if queue.pending.get(&id).is_some_and(|entry| entry.seq == seq) {
                queue.pending.shift_remove(&id);
                debug!(id = %id, "note deleted elsewhere, discarding pending edit");
            }
        }
    }

    /// Send the writes whose debounce has elapsed.
    pub async fn flush_due(&self, store: &dyn RowStore) -> FlushReport {
        self.flush(store, false).await
    }

    /// Send every pending write now, ignoring debounce and backoff.
    pub async fn flush_now(&self, store: &dyn RowStore) -> FlushReport {
        self.flush(store, true).await
    }

    /// Flush until the buffer is empty, waiting out the backoff between
    /// passes. Used at shutdown, when nothing will flush again later.
    ///
    /// Each failing write uses up one attempt per pass, so after
    /// `max_attempts` passes every write is settled. Anything still queued
    /// then is counted as dropped.
    pub async fn drain(&self, store: &dyn RowStore) -> FlushReport {
        let passes = self.config.max_attempts.max(1);
        let mut report = FlushReport::default();
        for pass in 1..=passes {
            report += self.flush_now(store).await;
            if self.is_idle() {
                return report;
            }
            if pass < passes {
                tokio::time::sleep(self.config.backoff(pass)).await;
            }
        }

        let mut queue = self.queue.lock();
        for (id, entry) in queue.pending.drain(..) {
            error!(id = %id, attempts = entry.attempts, "write still queued at shutdown, dropping");
            report.dropped += 1;
        }
        report
    }

    async fn flush(&self, store: &dyn RowStore, force: bool) -> FlushReport {
        let _serial = self.flush_lock.lock().await;
        let mut report = FlushReport::default();
        for flight in self.take(force) {
            let result = match &flight.write {
                PendingWrite::Upsert(patch) => store.upsert_row(patch.clone()).await,
                PendingWrite::Delete => store.delete_row(&flight.id).await,
            };
            self.settle(flight, result, &mut report);
        }
        report
    }

    /// Move ready entries from pending to in flight.
    fn take(&self, force: bool) -> Vec<Flight> {
        let now = Instant::now();
        let mut queue = self.queue.lock();
        let ready: Vec<NoteId> = queue
            .pending
            .iter()
            .filter(|(id, entry)| (force || entry.due <= now) && !queue.in_flight.contains_key(*id))
            .map(|(id, _)| id.clone())
            .collect();

        let mut flights = Vec::with_capacity(ready.len());
        for id in ready {
            if let Some(entry) = queue.pending.shift_remove(&id) {
                queue
                    .in_flight
                    .insert(id.clone(), (entry.seq, entry.write.clone()));
                flights.push(Flight {
                    id,
                    write: entry.write,
                    seq: entry.seq,
                    attempts: entry.attempts,
                });
            }
        }
        flights
    }

    fn settle(&self, flight: Flight, result: StoreResult<()>, report: &mut FlushReport) {
        let mut queue = self.queue.lock();
        queue.in_flight.shift_remove(&flight.id);

        let err = match result {
            Ok(()) => {
                report.written += 1;
                return;
            }
            Err(err) => err,
        };

        if !err.is_transient() {
            warn!(id = %flight.id, error = %err, "write rejected, not retrying");
            report.dropped += 1;
            return;
        }

        let attempts = flight.attempts + 1;
        match queue.pending.get_mut(&flight.id) {
            Some(newer) => {
                if let (PendingWrite::Upsert(failed), PendingWrite::Upsert(later)) =
                    (flight.write, &mut newer.write)
                {
                    let mut merged = failed;
                    merged.merge(later.clone());
                    *later = merged;
                }
                debug!(id = %flight.id, error = %err, "failed write superseded by newer write");
                report.superseded += 1;
            }
            None if attempts >= self.config.max_attempts => {
                error!(id = %flight.id, attempts, error = %err, "giving up on write");
                report.dropped += 1;
            }
            None => {
                let delay = self.config.backoff(attempts);
                warn!(id = %flight.id, attempts, ?delay, error = %err, "write failed, will retry");
                queue.pending.insert(
                    flight.id,
                    Entry {
                        write: flight.write,
                        seq: flight.seq,
                        due: Instant::now() + delay,
                        attempts,
                    },
                );
                report.retried += 1;
            }
        }
    }

    /// Flush due writes every `flush_tick` until `stop` fires or its
    /// sender is dropped.
    pub fn spawn_worker(
        &self,
        store: Arc<dyn RowStore>,
        mut stop: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        let buffer = self.clone();
        let tick = self.config.flush_tick();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = interval.tick() => {
                        let report = buffer.flush_due(store.as_ref()).await;
                        if !report.is_empty() {
                            trace!(?report, "flush");
                        }
                    }
                }
            }
            debug!("flush worker stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use std::time::Duration;

    fn config() -> ArborConfig {
        ArborConfig {
            debounce_ms: 100,
            max_attempts: 3,
            backoff_base_ms: 50,
            ..ArborConfig::default()
        }
    }

    fn text(id: &str, text: &str) -> RowChange {
        let mut patch = RowPatch::new(id.into());
        patch.text = Some(text.into());
        RowChange::Upsert(patch)
    }

    fn children(id: &str, ids: &[&str]) -> RowChange {
        let mut patch = RowPatch::new(id.into());
        patch.child_ids = Some(ids.iter().copied().map(NoteId::from).collect());
        RowChange::Upsert(patch)
    }

    #[test]
    fn test_pending_upserts_merge() {
        let buffer = WriteBuffer::new(&config());
        buffer.enqueue(text("a", "one"));
        buffer.enqueue(children("a", &["b"]));
        buffer.enqueue(text("a", "two"));

        assert_eq!(buffer.pending_len(), 1);
        let Some(PendingWrite::Upsert(patch)) = buffer.pending(&"a".into()) else {
            panic!("expected pending upsert");
        };
        assert_eq!(patch.text.as_deref(), Some("two"));
        assert_eq!(patch.child_ids, Some(vec![NoteId::from("b")]));
        assert!(patch.updated_at.is_some());
    }

    #[test]
    fn test_delete_replaces_pending_upsert() {
        let buffer = WriteBuffer::new(&config());
        buffer.enqueue(text("a", "one"));
        buffer.enqueue(RowChange::Delete("a".into()));
        assert_eq!(buffer.pending(&"a".into()), Some(PendingWrite::Delete));
    }

    #[test]
    fn test_overlay_replays_in_order() {
        let buffer = WriteBuffer::new(&config());
        let mut rows = vec![
            Row::from_patch(RowPatch::new("a".into())),
            Row::from_patch(RowPatch::new("b".into())),
        ];
        buffer.enqueue(text("a", "edited"));
        buffer.enqueue(RowChange::Delete("b".into()));
        let mut created = Row::from_patch(RowPatch::new("c".into()));
        created.text = "new".into();
        buffer.enqueue(RowChange::Upsert(RowPatch::from_row(created)));

        buffer.overlay(&mut rows);
        let ids: Vec<&str> = rows.iter().map(|row| row.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(rows[0].text, "edited");
        assert_eq!(rows[1].text, "new");
    }

    #[test]
    fn test_overlay_discards_edit_of_missing_row() {
        let buffer = WriteBuffer::new(&config());
        buffer.enqueue(text("gone", "edited"));

        let mut rows = vec![Row::from_patch(RowPatch::new("a".into()))];
        buffer.overlay(&mut rows);
        let ids: Vec<&str> = rows.iter().map(|row| row.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
        assert!(buffer.pending(&"gone".into()).is_none());
        assert!(buffer.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_holds_writes() {
        let store = MemoryStore::new();
        let buffer = WriteBuffer::new(&config());
        buffer.enqueue(text("a", "one"));

        assert!(buffer.flush_due(&store).await.is_empty());
        assert!(store.is_empty());

        tokio::time::advance(Duration::from_millis(150)).await;
        let report = buffer.flush_due(&store).await;
        assert_eq!(report.written, 1);
        assert_eq!(store.get(&"a".into()).unwrap().text, "one");
        assert!(buffer.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_backoff_then_succeed() {
        let store = MemoryStore::new();
        let buffer = WriteBuffer::new(&config());
        buffer.enqueue(text("a", "one"));

        store.fail_next(1);
        let report = buffer.flush_now(&store).await;
        assert_eq!(report.retried, 1);
        assert_eq!(buffer.pending_len(), 1);

        // Backoff not elapsed yet.
        assert!(buffer.flush_due(&store).await.is_empty());

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(buffer.flush_due(&store).await.written, 1);
        assert_eq!(store.get(&"a".into()).unwrap().text, "one");
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let store = MemoryStore::new();
        let buffer = WriteBuffer::new(&config());
        buffer.enqueue(text("a", "one"));
        store.fail_next(10);

        let mut dropped = 0;
        for _ in 0..3 {
            dropped += buffer.flush_now(&store).await.dropped;
        }
        assert_eq!(dropped, 1);
        assert!(buffer.is_idle());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_retries_until_written() {
        let store = MemoryStore::new();
        let buffer = WriteBuffer::new(&config());
        buffer.enqueue(text("a", "one"));
        store.fail_next(2);

        let report = buffer.drain(&store).await;
        assert_eq!(report.written, 1);
        assert_eq!(report.retried, 2);
        assert_eq!(report.dropped, 0);
        assert!(buffer.is_idle());
        assert_eq!(store.get(&"a".into()).unwrap().text, "one");
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_reports_unsaved_writes() {
        let store = MemoryStore::new();
        let buffer = WriteBuffer::new(&config());
        buffer.enqueue(text("a", "one"));
        buffer.enqueue(text("b", "two"));
        store.fail_next(100);

        let report = buffer.drain(&store).await;
        assert_eq!(report.written, 0);
        assert_eq!(report.dropped, 2);
        assert!(buffer.is_idle());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_folds_into_newer() {
        let store = MemoryStore::new();
        let buffer = WriteBuffer::new(&config());
        buffer.enqueue(text("a", "one"));

        let flights = buffer.take(true);
        assert_eq!(buffer.in_flight_len(), 1);
        buffer.enqueue(children("a", &["b"]));

        let mut report = FlushReport::default();
        for flight in flights {
            buffer.settle(flight, Err(crate::StoreError::Unavailable), &mut report);
        }
        assert_eq!(report.superseded, 1);

        assert_eq!(buffer.flush_now(&store).await.written, 1);
        let row = store.get(&"a".into()).unwrap();
        assert_eq!(row.text, "one");
        assert_eq!(row.child_ids, vec![NoteId::from("b")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_id_waits() {
        let buffer = WriteBuffer::new(&config());
        buffer.enqueue(text("a", "one"));
        let first = buffer.take(true);
        buffer.enqueue(text("a", "two"));
        assert!(buffer.take(true).is_empty());

        let mut rows = vec![Row::from_patch(RowPatch::new("a".into()))];
        buffer.overlay(&mut rows);
        assert_eq!(rows[0].text, "two");

        let mut report = FlushReport::default();
        for flight in first {
            buffer.settle(flight, Ok(()), &mut report);
        }
        assert_eq!(buffer.take(true).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_is_not_retried() {
        let store = MemoryStore::new();
        let mut newer = RowPatch::new("a".into());
        newer.text = Some("remote".into());
        let far_future = arbor_types::DateTime::from_timestamp(4_000_000_000, 0).unwrap();
        store.upsert_row(newer.with_updated_at(far_future)).await.unwrap();

        let buffer = WriteBuffer::new(&config());
        buffer.enqueue(text("a", "local"));
        let report = buffer.flush_now(&store).await;
        assert_eq!(report.dropped, 1);
        assert!(buffer.is_idle());
        assert_eq!(store.get(&"a".into()).unwrap().text, "remote");
    }
}
