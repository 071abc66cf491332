//! The versioned in-memory forest.
//!
//! A [`Forest`] is a value: mutation happens through [`Forest::evolve`],
//! which applies a closure to a copy of the roots and yields a successor
//! with a bumped version. The original is never touched, so a failed or
//! no-op step leaves nothing half-applied.

use std::collections::HashSet;

use arbor_types::{Note, NoteId};

use crate::algebra::locate;
use crate::path::NotePath;
use crate::{MAX_TREE_DEPTH, Result, TreeError};

/// Ordered sequence of root notes plus a version counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Forest {
    roots: Vec<Note>,
    version: u64,
}

impl Forest {
    /// A forest at version 0.
    pub fn new(roots: Vec<Note>) -> Self {
        Self { roots, version: 0 }
    }

    pub fn roots(&self) -> &[Note] {
        &self.roots
    }

    /// Bumped on every successful evolution.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Total number of notes across all subtrees.
    pub fn node_count(&self) -> usize {
        self.roots.iter().map(Note::subtree_len).sum()
    }

    /// Resolve a path, treating any miss as `None`.
    pub fn get(&self, path: &NotePath) -> Option<&Note> {
        locate(path, &self.roots).ok()
    }

    /// Find a note and its current path by id. Linear in forest size.
    pub fn find_by_id(&self, id: &NoteId) -> Option<(NotePath, &Note)> {
        self.iter_dfs()
            .find(|(_, _, note)| note.id == *id)
            .map(|(_, path, note)| (path, note))
    }

    /// Iterate notes in pre-order.
    ///
    /// Yields `(depth, path, note)` with depth 0 for roots. Stops descending
    /// past `MAX_TREE_DEPTH`.
    pub fn iter_dfs(&self) -> impl Iterator<Item = (usize, NotePath, &Note)> {
        DfsIterator::new(&self.roots)
    }

    /// Derive a successor from a mutated copy of the roots.
    ///
    /// `step` returns `Ok(Some(value))` to commit the copy as version + 1,
    /// `Ok(None)` to discard it (nothing changed), or an error which also
    /// discards it.
    pub fn evolve<T, E>(
        &self,
        step: impl FnOnce(&mut Vec<Note>) -> std::result::Result<Option<T>, E>,
    ) -> std::result::Result<Option<(Forest, T)>, E> {
        let mut roots = self.roots.clone();
        Ok(step(&mut roots)?.map(|value| (self.successor(roots), value)))
    }

    /// A forest holding `roots` at the next version.
    pub fn successor(&self, roots: Vec<Note>) -> Forest {
        Forest {
            roots,
            version: self.version + 1,
        }
    }

    /// Check the structural invariants: unique ids, no parent on roots, and
    /// every child's `parent_id` naming its structural parent.
    pub fn validate(&self) -> Result<()> {
        validate_roots(&self.roots)
    }
}

/// [`Forest::validate`] on a bare root sequence.
pub fn validate_roots(roots: &[Note]) -> Result<()> {
    let mut seen = HashSet::new();
    let mut stack: Vec<(usize, Option<&NoteId>, &Note)> =
        roots.iter().rev().map(|note| (0, None, note)).collect();

    while let Some((depth, expected, note)) = stack.pop() {
        if depth > MAX_TREE_DEPTH {
            return Err(TreeError::TooDeep(MAX_TREE_DEPTH));
        }
        if !seen.insert(&note.id) {
            return Err(TreeError::DuplicateId(note.id.clone()));
        }
        if note.parent_id.as_ref() != expected {
            return Err(TreeError::ParentMismatch {
                id: note.id.clone(),
                expected: expected.cloned(),
                found: note.parent_id.clone(),
            });
        }
        for child in note.children.iter().rev() {
            stack.push((depth + 1, Some(&note.id), child));
        }
    }
    Ok(())
}

/// Rewrite every `parent_id` in `notes` from structure, treating them as
/// children of `parent` (`None` for the root sequence).
pub fn repair_parent_ids(notes: &mut [Note], parent: Option<&NoteId>) {
    for note in notes {
        note.parent_id = parent.cloned();
        let id = note.id.clone();
        repair_parent_ids(&mut note.children, Some(&id));
    }
}

/// Pre-order iterator over a root sequence.
struct DfsIterator<'a> {
    stack: Vec<(usize, NotePath, &'a Note)>,
}

impl<'a> DfsIterator<'a> {
    fn new(roots: &'a [Note]) -> Self {
        // Push roots in reverse order to process first root first
        let stack = roots
            .iter()
            .enumerate()
            .rev()
            .map(|(i, note)| (0, NotePath::root_index(i), note))
            .collect();
        Self { stack }
    }
}

impl<'a> Iterator for DfsIterator<'a> {
    type Item = (usize, NotePath, &'a Note);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, path, note) = self.stack.pop()?;
        if depth >= MAX_TREE_DEPTH {
            tracing::warn!("DFS iterator hit MAX_TREE_DEPTH ({MAX_TREE_DEPTH}) at {path}, not descending");
        } else {
            for (i, child) in note.children.iter().enumerate().rev() {
                self.stack.push((depth + 1, path.child(i), child));
            }
        }
        Some((depth, path, note))
    }
}
