//! Shared note, row, and identifier types for arbor.
//!
//! This is the leaf crate: two representations of the same outline and the
//! ids that tie them together. No arbor dependencies.
//!
//! ```text
//! Note (in memory)                 Row (persisted)
//!     id ───────────────────────────── id
//!     text ─────────────────────────── text
//!     parent_id: Option<NoteId> ────── parentIds: [0..1]
//!     children: Vec<Note> ──────────── childIds: [NoteId]
//!     created_at ───────────────────── createdAt
//!                                      updatedAt?
//! ```
//!
//! # Key Types
//!
//! |------------------|---------------------------------------------|
//! | Type             | Purpose                                     |
//! |------------------|---------------------------------------------|
//! | [`NoteId`]       | Opaque, globally unique note id             |
//! | [`IdGenerator`]  | Mints fresh ids (UUIDv7 by default)         |
//! | [`Note`]         | Forest node, owns its children              |
//! | [`NotePatch`]    | Changed fields of a note update             |
//! | [`Row`]          | Flat persisted note                         |
//! | [`RowPatch`]     | Partial row for create-or-merge writes      |
//! |------------------|---------------------------------------------|

pub mod ids;
pub mod note;
pub mod row;

pub use ids::{IdGenerator, NoteId, SequentialIds, UuidV7Ids};
pub use note::{Note, NotePatch};
pub use row::{Row, RowPatch};

pub use chrono::{DateTime, Utc};

/// Current wall-clock time. Used by constructors throughout the crate.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
