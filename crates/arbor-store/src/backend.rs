//! The row persistence seam.
//!
//! A [`RowStore`] holds one [`Row`] per note and tells subscribers about
//! every change by emitting the full row set. Local writes and writes from
//! other replicas look the same to a subscriber.

use std::sync::Arc;

use arbor_types::{NoteId, Row, RowPatch};
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{StoreError, StoreResult};

/// Every row in a store at one moment, in store order.
pub type RowSnapshot = Arc<Vec<Row>>;

/// Adjacency-row persistence.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Create-or-merge. An unknown id creates a row with defaults for
    /// the fields the patch leaves out.
    async fn upsert_row(&self, patch: RowPatch) -> StoreResult<()>;

    /// Remove a row. Deleting an absent id succeeds.
    async fn delete_row(&self, id: &NoteId) -> StoreResult<()>;

    /// Every row, in store order.
    async fn query_all_rows(&self) -> StoreResult<Vec<Row>>;

    /// Row snapshots emitted after each committed change.
    ///
    /// The subscription ends when the receiver is dropped.
    fn subscribe_row_changes(&self) -> broadcast::Receiver<RowSnapshot>;

    /// False until the store can serve reads.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Merge `patch` over the stored row under last-write-wins.
///
/// A patch stamped earlier than the stored row's `updated_at` loses.
pub(crate) fn merge_upsert(existing: Option<Row>, patch: RowPatch) -> StoreResult<Row> {
    match existing {
        None => Ok(Row::from_patch(patch)),
        Some(mut row) => {
            if let (Some(incoming), Some(stored)) = (patch.updated_at, row.updated_at)
                && incoming < stored
            {
                return Err(StoreError::Conflict(patch.id));
            }
            row.apply_patch(patch);
            Ok(row)
        }
    }
}
