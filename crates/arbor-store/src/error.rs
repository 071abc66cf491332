//! Store and reconciler error types.

use std::path::PathBuf;

use arbor_types::NoteId;
use thiserror::Error;

/// Errors from a [`RowStore`](crate::RowStore) or the reconciler actor.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store is not ready for reads or writes.
    #[error("row store unavailable")]
    Unavailable,

    /// A write lost a last-write-wins race against a newer stored row.
    #[error("write for {0} is older than the stored row")]
    Conflict(NoteId),

    /// A stored row could not be decoded.
    #[error("corrupt row {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The reconciler actor has stopped.
    #[error("reconciler shut down")]
    Shutdown,
}

impl StoreError {
    pub fn corrupt(id: impl Into<String>, reason: impl ToString) -> Self {
        Self::Corrupt {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether a failed write is worth retrying.
    ///
    /// Conflicts and corrupt rows will fail the same way again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable | Self::Sqlite(_))
    }
}

/// Errors loading an [`ArborConfig`](crate::ArborConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] ron::error::SpannedError),
}

/// Store result type.
pub type StoreResult<T> = Result<T, StoreError>;
