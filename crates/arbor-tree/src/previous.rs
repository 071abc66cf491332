//! Reading-order navigation: which note comes before (or after) a path.
//!
//! "Previous" is the pre-order predecessor, except that the first child of
//! a note is preceded by that note itself. That is what backspacing out of
//! an empty first child should land on. For any other note the previous
//! note is the deepest last descendant of the preceding sibling.
//!
//! Everything here is total: malformed paths and misses yield `None`.

use arbor_types::Note;

use crate::algebra::locate;
use crate::path::NotePath;
use crate::MAX_TREE_DEPTH;

/// Path of the note before `path` in reading order.
pub fn previous_path(path: &NotePath, roots: &[Note]) -> Option<NotePath> {
    if !path.is_note() || path.is_first_root() {
        return None;
    }

    if path.is_first_child() {
        let parent = path.parent()?;
        locate(&parent, roots).ok()?;
        return Some(parent);
    }

    let mut current = path.previous_sibling()?;
    let mut note = locate(&current, roots).ok()?;
    while let Some(last) = note.children.len().checked_sub(1) {
        if current.depth() >= MAX_TREE_DEPTH {
            tracing::warn!("previous_path hit MAX_TREE_DEPTH ({MAX_TREE_DEPTH}) at {current}");
            break;
        }
        current = current.child(last);
        note = &note.children[last];
    }
    Some(current)
}

/// The note before the note at `path`, or `None` for the very first note,
/// a malformed path, or a path that does not resolve.
pub fn find_previous<'a>(path: &str, roots: &'a [Note]) -> Option<&'a Note> {
    let path = NotePath::parse(path).ok()?;
    let previous = previous_path(&path, roots)?;
    locate(&previous, roots).ok()
}

/// Path of the note after `path` in reading order (plain pre-order).
pub fn next_path(path: &NotePath, roots: &[Note]) -> Option<NotePath> {
    let note = locate(path, roots).ok()?;
    if !note.children.is_empty() {
        return Some(path.child(0));
    }

    let mut current = path.clone();
    loop {
        let sibling = current.next_sibling()?;
        if locate(&sibling, roots).is_ok() {
            return Some(sibling);
        }
        current = current.parent()?;
    }
}

/// The note after the note at `path`, if any.
pub fn find_next<'a>(path: &str, roots: &'a [Note]) -> Option<&'a Note> {
    let path = NotePath::parse(path).ok()?;
    let next = next_path(&path, roots)?;
    locate(&next, roots).ok()
}
