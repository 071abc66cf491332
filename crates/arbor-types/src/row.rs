//! The flat, adjacency-list-shaped persisted form of a note.
//!
//! Serialized with camelCase keys and RFC 3339 timestamps:
//!
//! ```text
//! { id, text, parentIds: [0..1], childIds: [..], createdAt, updatedAt? }
//! ```
//!
//! `parentIds` holds at most one id. The list shape leaves room for
//! multiple parents, but the forest is a single-parent tree and any extra
//! entries are ignored on hydration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Note, NoteId, NotePatch};

/// One persisted note.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub id: NoteId,
    pub text: String,
    #[serde(default)]
    pub parent_ids: Vec<NoteId>,
    #[serde(default)]
    pub child_ids: Vec<NoteId>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Row {
    /// Row for a single note; children contribute only their ids.
    pub fn from_note(note: &Note) -> Self {
        Self {
            id: note.id.clone(),
            text: note.text.clone(),
            parent_ids: note.parent_id.iter().cloned().collect(),
            child_ids: note.child_ids(),
            created_at: note.created_at,
            updated_at: None,
        }
    }

    /// Create a row from a patch for an id that has no row yet.
    ///
    /// Missing fields take defaults: empty text, no parent, no children,
    /// `created_at = now`.
    pub fn from_patch(patch: RowPatch) -> Self {
        let mut row = Self {
            id: patch.id.clone(),
            text: String::new(),
            parent_ids: Vec::new(),
            child_ids: Vec::new(),
            created_at: patch.created_at.unwrap_or_else(crate::now),
            updated_at: None,
        };
        row.apply_patch(patch);
        row
    }

    /// The single structural parent, if any.
    pub fn parent_id(&self) -> Option<&NoteId> {
        self.parent_ids.first()
    }

    /// Merge the fields present in `patch` into this row.
    ///
    /// `id` and `created_at` are identity fields and are never overwritten.
    pub fn apply_patch(&mut self, patch: RowPatch) {
        if let Some(text) = patch.text {
            self.text = text;
        }
        if let Some(parent_ids) = patch.parent_ids {
            self.parent_ids = parent_ids;
        }
        if let Some(child_ids) = patch.child_ids {
            self.child_ids = child_ids;
        }
        if patch.updated_at.is_some() {
            self.updated_at = patch.updated_at;
        }
    }
}

/// `Partial<Row> & { id }`, the upsert payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowPatch {
    pub id: NoteId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_ids: Option<Vec<NoteId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_ids: Option<Vec<NoteId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RowPatch {
    /// An empty patch for `id`.
    pub fn new(id: NoteId) -> Self {
        Self {
            id,
            text: None,
            parent_ids: None,
            child_ids: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// A patch carrying every field of `row`.
    pub fn from_row(row: Row) -> Self {
        Self {
            id: row.id,
            text: Some(row.text),
            parent_ids: Some(row.parent_ids),
            child_ids: Some(row.child_ids),
            created_at: Some(row.created_at),
            updated_at: row.updated_at,
        }
    }

    /// Map a note-level patch onto row fields.
    ///
    /// `children` becomes `childIds`, `parentId` becomes `parentIds`
    /// (`[]` for a root).
    pub fn from_note_patch(id: NoteId, patch: &NotePatch) -> Self {
        Self {
            text: patch.text.clone(),
            parent_ids: patch
                .parent_id
                .as_ref()
                .map(|parent| parent.iter().cloned().collect()),
            child_ids: patch.children.clone(),
            ..Self::new(id)
        }
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    /// True when only `id` (and possibly `updated_at`) is set.
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.parent_ids.is_none()
            && self.child_ids.is_none()
            && self.created_at.is_none()
    }

    /// True when the patch carries the structural fields a new row needs.
    ///
    /// Field edits of an existing note leave `created_at` or `parent_ids`
    /// unset and must not be turned into a fresh row.
    pub fn is_create(&self) -> bool {
        self.created_at.is_some() && self.parent_ids.is_some()
    }

    /// Fold a later patch for the same id over this one; later fields win.
    pub fn merge(&mut self, later: RowPatch) {
        debug_assert_eq!(self.id, later.id);
        if later.text.is_some() {
            self.text = later.text;
        }
        if later.parent_ids.is_some() {
            self.parent_ids = later.parent_ids;
        }
        if later.child_ids.is_some() {
            self.child_ids = later.child_ids;
        }
        if self.created_at.is_none() {
            self.created_at = later.created_at;
        }
        if later.updated_at.is_some() {
            self.updated_at = later.updated_at;
        }
    }
}
