//! Error types for path and forest operations.

use arbor_types::NoteId;
use thiserror::Error;

/// Errors from path algebra and forest validation.
///
/// None of these are fatal to an editing session. Callers that sit on the
/// interactive path absorb them into a no-op.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The path string does not follow the `index(.children.index)*` shape.
    #[error("invalid path {path:?}: bad segment {segment:?}")]
    InvalidPath { path: String, segment: String },

    /// Some segment of the path walks off the forest.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// The final index is outside the addressed sequence.
    #[error("index {index} out of range for sequence of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// The path names a sequence where a note or slot was required, or a
    /// slot where a note was required.
    #[error("path does not address a note: {0}")]
    NotAddressable(String),

    /// The same id occurs twice in the forest.
    #[error("duplicate note id: {0:?}")]
    DuplicateId(NoteId),

    /// A note's `parent_id` disagrees with its position in the tree.
    #[error("note {id:?} has parent_id {found:?}, expected {expected:?}")]
    ParentMismatch {
        id: NoteId,
        expected: Option<NoteId>,
        found: Option<NoteId>,
    },

    /// The tree is deeper than the traversal circuit breaker allows.
    #[error("forest exceeds maximum depth {0}")]
    TooDeep(usize),
}
