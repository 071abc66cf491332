//! Locate, insert, replace, and remove notes by path.
//!
//! Every operation takes the root sequence directly. Mutations are applied
//! in place; callers that need snapshot semantics clone first (see
//! [`Forest::evolve`](crate::Forest::evolve)).
//!
//! Insert and remove are idempotent so a retried intent is harmless:
//! a second insert of the same id, or a second remove of an id that is no
//! longer at the position, reports [`Applied::AlreadyApplied`].

use arbor_types::{Note, NoteId};

use crate::path::{NotePath, Position, Segment};
use crate::{Result, TreeError};

/// Whether a mutation changed the forest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Changed,
    AlreadyApplied,
}

impl Applied {
    pub fn changed(self) -> bool {
        self == Applied::Changed
    }
}

/// The sequence a path lives in (or the sequence a container path names).
pub fn container<'a>(path: &NotePath, roots: &'a [Note]) -> Result<&'a [Note]> {
    let container = path.container();
    let mut seq = roots;
    for pair in container.segments().chunks(2) {
        let [Segment::Index(i), Segment::Children] = pair else {
            return Err(TreeError::PathNotFound(path.to_string()));
        };
        seq = &seq
            .get(*i)
            .ok_or_else(|| TreeError::PathNotFound(path.to_string()))?
            .children;
    }
    Ok(seq)
}

/// Mutable form of [`container`].
pub fn container_mut<'a>(path: &NotePath, roots: &'a mut Vec<Note>) -> Result<&'a mut Vec<Note>> {
    let container = path.container();
    let mut seq = roots;
    for pair in container.segments().chunks(2) {
        let [Segment::Index(i), Segment::Children] = pair else {
            return Err(TreeError::PathNotFound(path.to_string()));
        };
        seq = &mut seq
            .get_mut(*i)
            .ok_or_else(|| TreeError::PathNotFound(path.to_string()))?
            .children;
    }
    Ok(seq)
}

/// Resolve a note path to its note.
pub fn locate<'a>(path: &NotePath, roots: &'a [Note]) -> Result<&'a Note> {
    let index = path
        .last_index()
        .ok_or_else(|| TreeError::NotAddressable(path.to_string()))?;
    container(path, roots)?
        .get(index)
        .ok_or_else(|| TreeError::PathNotFound(path.to_string()))
}

/// Mutable form of [`locate`].
pub fn locate_mut<'a>(path: &NotePath, roots: &'a mut Vec<Note>) -> Result<&'a mut Note> {
    let index = path
        .last_index()
        .ok_or_else(|| TreeError::NotAddressable(path.to_string()))?;
    container_mut(path, roots)?
        .get_mut(index)
        .ok_or_else(|| TreeError::PathNotFound(path.to_string()))
}

/// Id of the note owning the sequence `path` lives in; `None` at root level.
pub fn owner_id(path: &NotePath, roots: &[Note]) -> Result<Option<NoteId>> {
    match path.owner() {
        None => Ok(None),
        Some(owner) => locate(&owner, roots).map(|note| Some(note.id.clone())),
    }
}

/// Insert `note` at an index or append slot.
///
/// An index past the end appends. If a note with the same id is already in
/// the target sequence nothing changes.
pub fn insert(path: &NotePath, note: Note, roots: &mut Vec<Note>) -> Result<Applied> {
    let (_, position) = path
        .split_last()
        .ok_or_else(|| TreeError::NotAddressable(path.to_string()))?;
    let seq = container_mut(path, roots)?;

    if seq.iter().any(|existing| existing.id == note.id) {
        return Ok(Applied::AlreadyApplied);
    }

    match position {
        Position::Append => seq.push(note),
        Position::Index(i) => seq.insert(i.min(seq.len()), note),
    }
    Ok(Applied::Changed)
}

/// Overwrite the note at `path`.
///
/// Fails with [`TreeError::IndexOutOfRange`] without touching the forest
/// when the index is past the end.
pub fn replace(path: &NotePath, note: Note, roots: &mut Vec<Note>) -> Result<Applied> {
    let index = path
        .last_index()
        .ok_or_else(|| TreeError::NotAddressable(path.to_string()))?;
    let seq = container_mut(path, roots)?;
    let len = seq.len();
    let slot = seq
        .get_mut(index)
        .ok_or(TreeError::IndexOutOfRange { index, len })?;

    if *slot == note {
        return Ok(Applied::AlreadyApplied);
    }
    *slot = note;
    Ok(Applied::Changed)
}

/// Remove the note at `path` if, and only if, its id is `expected`.
///
/// Returns the removed subtree, or `None` when the position is empty or
/// holds a different note (the removal already happened).
pub fn remove(path: &NotePath, expected: &NoteId, roots: &mut Vec<Note>) -> Result<Option<Note>> {
    let index = path
        .last_index()
        .ok_or_else(|| TreeError::NotAddressable(path.to_string()))?;
    let seq = container_mut(path, roots)?;

    match seq.get(index) {
        Some(note) if note.id == *expected => Ok(Some(seq.remove(index))),
        _ => Ok(None),
    }
}
