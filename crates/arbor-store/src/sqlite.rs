//! SQLite row store.
//!
//! One table, one row per note. Id lists are stored as JSON arrays and
//! timestamps as RFC 3339 text. Rows come back in insertion order.

use std::path::Path;
use std::sync::Arc;

use arbor_types::{DateTime, NoteId, Row, RowPatch, Utc};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::backend::{RowSnapshot, RowStore, merge_upsert};
use crate::error::{StoreError, StoreResult};

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS notes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    text TEXT NOT NULL DEFAULT '',
    parent_ids TEXT NOT NULL DEFAULT '[]',
    child_ids TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_notes_created ON notes(created_at);
"#;

const SELECT_COLUMNS: &str = "SELECT id, text, parent_ids, child_ids, created_at, updated_at FROM notes";

/// Columns as stored, before JSON and timestamp decoding.
struct RawRow {
    id: String,
    text: String,
    parent_ids: String,
    child_ids: String,
    created_at: String,
    updated_at: Option<String>,
}

impl RawRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            text: row.get(1)?,
            parent_ids: row.get(2)?,
            child_ids: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn decode(self) -> StoreResult<Row> {
        let parent_ids: Vec<NoteId> = serde_json::from_str(&self.parent_ids)?;
        let child_ids: Vec<NoteId> = serde_json::from_str(&self.child_ids)?;
        let created_at = parse_timestamp(&self.id, &self.created_at)?;
        let updated_at = self
            .updated_at
            .as_deref()
            .map(|ts| parse_timestamp(&self.id, ts))
            .transpose()?;
        Ok(Row {
            id: NoteId::from(self.id),
            text: self.text,
            parent_ids,
            child_ids,
            created_at,
            updated_at,
        })
    }
}

fn parse_timestamp(id: &str, value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(id, e))
}

/// Row store backed by a SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    event_tx: broadcast::Sender<RowSnapshot>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::open_with_capacity(path, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Like [`open`](Self::open), with subscribers buffering up to
    /// `capacity` snapshots before they lag.
    pub fn open_with_capacity<P: AsRef<Path>>(path: P, capacity: usize) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), capacity, "opened note database");
        Self::with_connection(conn, capacity)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        Self::in_memory_with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn in_memory_with_capacity(capacity: usize) -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, capacity)
    }

    fn with_connection(conn: Connection, capacity: usize) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Ok(Self {
            conn: Mutex::new(conn),
            event_tx,
        })
    }

    fn select_all(conn: &Connection) -> StoreResult<Vec<Row>> {
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY seq"))?;
        let raw = stmt
            .query_map([], RawRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(RawRow::decode).collect()
    }

    fn select_one(conn: &Connection, id: &NoteId) -> StoreResult<Option<Row>> {
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
        stmt.query_row(params![id.as_str()], RawRow::read)
            .optional()?
            .map(RawRow::decode)
            .transpose()
    }

    /// Send the current row set to subscribers. Called with the connection
    /// locked so snapshots go out in commit order.
    fn emit(&self, conn: &Connection) -> StoreResult<()> {
        let rows = Self::select_all(conn)?;
        let _ = self.event_tx.send(Arc::new(rows));
        Ok(())
    }
}

#[async_trait]
impl RowStore for SqliteStore {
    async fn upsert_row(&self, patch: RowPatch) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let id = patch.id.clone();
        let row = merge_upsert(Self::select_one(&tx, &id)?, patch)?;
        tx.execute(
            "INSERT INTO notes (id, text, parent_ids, child_ids, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                text = excluded.text,
                parent_ids = excluded.parent_ids,
                child_ids = excluded.child_ids,
                updated_at = excluded.updated_at",
            params![
                row.id.as_str(),
                row.text,
                serde_json::to_string(&row.parent_ids)?,
                serde_json::to_string(&row.child_ids)?,
                row.created_at.to_rfc3339(),
                row.updated_at.map(|ts| ts.to_rfc3339()),
            ],
        )?;
        tx.commit()?;
        trace!(id = %id, "upsert row");
        self.emit(&conn)
    }

    async fn delete_row(&self, id: &NoteId) -> StoreResult<()> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM notes WHERE id = ?1", params![id.as_str()])?;
        if removed > 0 {
            trace!(id = %id, "delete row");
            self.emit(&conn)?;
        }
        Ok(())
    }

    async fn query_all_rows(&self) -> StoreResult<Vec<Row>> {
        let conn = self.conn.lock();
        Self::select_all(&conn)
    }

    fn subscribe_row_changes(&self) -> broadcast::Receiver<RowSnapshot> {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn full_row(id: &str, parent: Option<&str>, children: &[&str], secs: i64) -> RowPatch {
        RowPatch::from_row(Row {
            id: id.into(),
            text: format!("note {id}"),
            parent_ids: parent.into_iter().map(NoteId::from).collect(),
            child_ids: children.iter().copied().map(NoteId::from).collect(),
            created_at: at(secs),
            updated_at: None,
        })
    }

    #[tokio::test]
    async fn test_row_crud() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_row(full_row("a", None, &["b"], 1)).await.unwrap();
        store.upsert_row(full_row("b", Some("a"), &[], 2)).await.unwrap();

        let rows = store.query_all_rows().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id.as_str(), "a");
        assert_eq!(rows[0].child_ids, vec![NoteId::from("b")]);
        assert_eq!(rows[1].parent_id(), Some(&NoteId::from("a")));
        assert_eq!(rows[1].created_at, at(2));

        store.delete_row(&"b".into()).await.unwrap();
        store.delete_row(&"b".into()).await.unwrap();
        assert_eq!(store.query_all_rows().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_upsert_merges() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_row(full_row("a", None, &[], 1)).await.unwrap();

        let mut patch = RowPatch::new("a".into()).with_updated_at(at(9));
        patch.text = Some("renamed".into());
        store.upsert_row(patch).await.unwrap();

        let rows = store.query_all_rows().await.unwrap();
        assert_eq!(rows[0].text, "renamed");
        assert_eq!(rows[0].created_at, at(1));
        assert_eq!(rows[0].updated_at, Some(at(9)));
    }

    #[tokio::test]
    async fn test_stale_write_conflicts() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .upsert_row(full_row("a", None, &[], 1).with_updated_at(at(10)))
            .await
            .unwrap();

        let mut stale = RowPatch::new("a".into()).with_updated_at(at(5));
        stale.text = Some("old".into());
        assert!(matches!(
            store.upsert_row(stale).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.query_all_rows().await.unwrap()[0].text, "note a");
    }

    #[tokio::test]
    async fn test_changes_emit_snapshots() {
        let store = SqliteStore::in_memory().unwrap();
        let mut rx = store.subscribe_row_changes();
        store.upsert_row(full_row("a", None, &[], 1)).await.unwrap();
        store.delete_row(&"missing".into()).await.unwrap();
        store.delete_row(&"a".into()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().len(), 1);
        assert!(rx.recv().await.unwrap().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_channel_capacity_bounds_backlog() {
        let config = crate::ArborConfig::from_ron_str("(change_channel_capacity: 2)").unwrap();
        let store = SqliteStore::in_memory_with_capacity(config.change_channel_capacity).unwrap();
        let mut rx = store.subscribe_row_changes();
        for (i, id) in ["a", "b", "c"].into_iter().enumerate() {
            store.upsert_row(full_row(id, None, &[], i as i64)).await.unwrap();
        }

        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(1))
        ));
        assert_eq!(rx.try_recv().unwrap().len(), 2);
        assert_eq!(rx.try_recv().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_reopen_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_row(full_row("a", None, &[], 1)).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let rows = store.query_all_rows().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text, "note a");
    }
}
