//! The in-memory forest node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::NoteId;

/// One node of the outline forest.
///
/// A note exclusively owns its `children`. `parent_id` is a denormalized
/// back-reference kept in step with the structure by whoever mutates the
/// forest; it is never used to walk the tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    pub text: String,
    pub parent_id: Option<NoteId>,
    #[serde(default)]
    pub children: Vec<Note>,
    pub created_at: DateTime<Utc>,
}

impl Note {
    /// A fresh childless note stamped with the current time.
    pub fn new(id: NoteId, text: impl Into<String>, parent_id: Option<NoteId>) -> Self {
        Self {
            id,
            text: text.into(),
            parent_id,
            children: Vec::new(),
            created_at: crate::now(),
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Append `child`, pointing its `parent_id` at this note.
    pub fn push_child(&mut self, mut child: Note) {
        child.parent_id = Some(self.id.clone());
        self.children.push(child);
    }

    /// Builder form of [`push_child`](Self::push_child).
    pub fn with_child(mut self, child: Note) -> Self {
        self.push_child(child);
        self
    }

    /// Ids of the direct children, in order.
    pub fn child_ids(&self) -> Vec<NoteId> {
        self.children.iter().map(|c| c.id.clone()).collect()
    }

    /// Number of notes in this subtree, including this one.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(Note::subtree_len).sum::<usize>()
    }
}

/// The changed-fields-only view of a note update.
///
/// `parent_id: Some(None)` means "moved to the root level", distinct from
/// `None` (parent unchanged).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NotePatch {
    pub text: Option<String>,
    pub parent_id: Option<Option<NoteId>>,
    pub children: Option<Vec<NoteId>>,
}

impl NotePatch {
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.parent_id.is_none() && self.children.is_none()
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn children(children: Vec<NoteId>) -> Self {
        Self {
            children: Some(children),
            ..Self::default()
        }
    }

    pub fn parent(parent_id: Option<NoteId>) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Self::default()
        }
    }
}
