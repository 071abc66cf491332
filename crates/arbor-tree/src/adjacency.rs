//! Conversion between the nested forest and flat persisted rows.
//!
//! `to_rows` flattens depth-first. `from_rows` hydrates in two passes: the
//! first builds childless notes by id, the second attaches each note to its
//! parent (or to the root list) in row-iteration order. Row order therefore
//! *is* sibling order; [`order_rows`] produces a suitable order from
//! `childIds`, creation time, and the forest being replaced.
//!
//! Row sets arriving from replication may be partial. A row whose parent
//! row is missing, or that sits on a parent cycle, is left out of the
//! forest rather than failing hydration.

use std::collections::{HashMap, HashSet, VecDeque};

use arbor_types::{Note, NoteId, NotePatch, Row, RowPatch};
use tracing::debug;

use crate::MAX_TREE_DEPTH;

/// Flatten a forest into rows, pre-order.
pub fn to_rows(roots: &[Note]) -> Vec<Row> {
    let mut rows = Vec::new();
    let mut stack: Vec<&Note> = roots.iter().rev().collect();
    while let Some(note) = stack.pop() {
        rows.push(Row::from_note(note));
        stack.extend(note.children.iter().rev());
    }
    rows
}

/// Rebuild a forest from rows.
///
/// Only the first `parentIds` entry is honoured. When an id occurs twice
/// the first row wins.
pub fn from_rows(rows: &[Row]) -> Vec<Note> {
    // Pass 1: childless notes by id.
    let mut hydrated: HashMap<NoteId, Note> = HashMap::with_capacity(rows.len());
    let mut unique: Vec<&Row> = Vec::with_capacity(rows.len());
    for row in rows {
        if hydrated.contains_key(&row.id) {
            debug!(id = %row.id, "duplicate row ignored during hydration");
            continue;
        }
        if row.parent_ids.len() > 1 {
            debug!(id = %row.id, parents = row.parent_ids.len(), "extra parent ids ignored");
        }
        hydrated.insert(
            row.id.clone(),
            Note {
                id: row.id.clone(),
                text: row.text.clone(),
                parent_id: row.parent_id().cloned(),
                children: Vec::new(),
                created_at: row.created_at,
            },
        );
        unique.push(row);
    }

    // Pass 2: attach to parents in row order.
    let mut root_ids: Vec<NoteId> = Vec::new();
    let mut child_order: HashMap<NoteId, Vec<NoteId>> = HashMap::new();
    for row in &unique {
        match row.parent_id() {
            None => root_ids.push(row.id.clone()),
            Some(parent) if hydrated.contains_key(parent) => {
                child_order
                    .entry(parent.clone())
                    .or_default()
                    .push(row.id.clone());
            }
            Some(parent) => {
                debug!(id = %row.id, parent = %parent, "parent row missing, note held out of forest");
            }
        }
    }

    let roots: Vec<Note> = root_ids
        .iter()
        .filter_map(|id| assemble(id, &mut hydrated, &child_order, 0))
        .collect();

    if !hydrated.is_empty() {
        debug!(
            count = hydrated.len(),
            "rows unreachable from any root (orphaned or cyclic)"
        );
    }
    roots
}

/// Move `id` and its descendants out of `hydrated` into a nested note.
///
/// Removing from the map as we go means every note is placed at most once,
/// which also breaks parent cycles.
fn assemble(
    id: &NoteId,
    hydrated: &mut HashMap<NoteId, Note>,
    child_order: &HashMap<NoteId, Vec<NoteId>>,
    depth: usize,
) -> Option<Note> {
    let mut note = hydrated.remove(id)?;
    if depth >= MAX_TREE_DEPTH {
        tracing::warn!("hydration hit MAX_TREE_DEPTH ({MAX_TREE_DEPTH}) at {id}, truncating");
        return Some(note);
    }
    if let Some(children) = child_order.get(id) {
        note.children = children
            .iter()
            .filter_map(|child| assemble(child, hydrated, child_order, depth + 1))
            .collect();
    }
    Some(note)
}

/// Order rows so that [`from_rows`] reproduces the intended sibling order.
///
/// - Roots come first: those present in `hint` (the forest being replaced)
///   keep their relative order, the rest follow by `(createdAt, id)`.
/// - Each parent's children follow its `childIds`; children it does not
///   list follow by `(createdAt, id)`.
/// - Rows not reachable from a root keep their input order at the end.
pub fn order_rows(rows: Vec<Row>, hint: Option<&[Note]>) -> Vec<Row> {
    let order = placement_order(&rows, hint);
    let mut slots: Vec<Option<Row>> = rows.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

/// Indices into `rows` in the order [`order_rows`] emits them.
fn placement_order(rows: &[Row], hint: Option<&[Note]>) -> Vec<usize> {
    let root_rank: HashMap<&NoteId, usize> = hint
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(i, note)| (&note.id, i))
        .collect();

    let mut index_of: HashMap<&NoteId, usize> = HashMap::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        index_of.entry(&row.id).or_insert(i);
    }

    let mut roots: Vec<usize> = Vec::new();
    let mut children_of: HashMap<&NoteId, Vec<usize>> = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
        if index_of.get(&row.id) != Some(&i) {
            continue;
        }
        match row.parent_id() {
            None => roots.push(i),
            Some(parent) => children_of.entry(parent).or_default().push(i),
        }
    }

    roots.sort_by(|&a, &b| {
        let rank = |i: usize| root_rank.get(&rows[i].id).copied().unwrap_or(usize::MAX);
        rank(a)
            .cmp(&rank(b))
            .then(rows[a].created_at.cmp(&rows[b].created_at))
            .then(rows[a].id.cmp(&rows[b].id))
    });

    for (parent, children) in children_of.iter_mut() {
        let listed: HashMap<&NoteId, usize> = index_of
            .get(parent)
            .map(|&p| {
                rows[p]
                    .child_ids
                    .iter()
                    .enumerate()
                    .map(|(pos, id)| (id, pos))
                    .collect()
            })
            .unwrap_or_default();
        children.sort_by(|&a, &b| {
            let rank = |i: usize| listed.get(&rows[i].id).copied().unwrap_or(usize::MAX);
            rank(a)
                .cmp(&rank(b))
                .then(rows[a].created_at.cmp(&rows[b].created_at))
                .then(rows[a].id.cmp(&rows[b].id))
        });
    }

    // Breadth-first from the roots; from_rows only needs per-parent order.
    let mut order: Vec<usize> = Vec::with_capacity(rows.len());
    let mut placed: HashSet<usize> = HashSet::with_capacity(rows.len());
    let mut queue: VecDeque<usize> = roots.into_iter().collect();
    while let Some(i) = queue.pop_front() {
        if !placed.insert(i) {
            continue;
        }
        order.push(i);
        if let Some(children) = children_of.get(&rows[i].id) {
            queue.extend(children.iter().copied());
        }
    }
    for i in 0..rows.len() {
        if !placed.contains(&i) {
            order.push(i);
        }
    }
    order
}

/// One persisted-row change derived from two forest states.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RowChange {
    /// Create-or-merge. New rows carry every field; existing rows carry
    /// only the fields that changed.
    Upsert(RowPatch),
    Delete(NoteId),
}

/// The row writes that take the persisted form of `before` to `after`.
///
/// Upserts come in `after` pre-order (parents before children), deletes
/// follow in `before` pre-order.
pub fn row_delta(before: &[Note], after: &[Note]) -> Vec<RowChange> {
    let old: HashMap<NoteId, Row> = to_rows(before)
        .into_iter()
        .map(|row| (row.id.clone(), row))
        .collect();
    let new_rows = to_rows(after);
    let live: HashSet<&NoteId> = new_rows.iter().map(|row| &row.id).collect();

    let mut changes = Vec::new();
    for row in &new_rows {
        match old.get(&row.id) {
            None => changes.push(RowChange::Upsert(RowPatch::from_row(row.clone()))),
            Some(prev) => {
                let patch = NotePatch {
                    text: (prev.text != row.text).then(|| row.text.clone()),
                    parent_id: (prev.parent_ids != row.parent_ids)
                        .then(|| row.parent_id().cloned()),
                    children: (prev.child_ids != row.child_ids).then(|| row.child_ids.clone()),
                };
                if !patch.is_empty() {
                    changes.push(RowChange::Upsert(RowPatch::from_note_patch(
                        row.id.clone(),
                        &patch,
                    )));
                }
            }
        }
    }

    for row in to_rows(before) {
        if !live.contains(&row.id) {
            changes.push(RowChange::Delete(row.id));
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{abcd, note, outline, ts};
    use crate::forest::validate_roots;
    use rand::seq::SliceRandom;

    fn row(id: &str, parent: Option<&str>, children: &[&str], n: i64) -> Row {
        Row {
            id: id.into(),
            text: id.to_string(),
            parent_ids: parent.into_iter().map(NoteId::from).collect(),
            child_ids: children.iter().map(|c| NoteId::from(*c)).collect(),
            created_at: ts(n),
            updated_at: None,
        }
    }

    #[test]
    fn test_to_rows_layout() {
        let rows = to_rows(&outline());
        assert_eq!(rows.len(), 10);

        let first = &rows[0];
        assert_eq!(first.id.as_str(), "123xyz");
        assert!(first.parent_ids.is_empty());
        assert_eq!(first.child_ids, vec![NoteId::from("321abc"), NoteId::from("434gts")]);

        let deep = rows.iter().find(|r| r.id.as_str() == "111ggg").unwrap();
        assert_eq!(deep.parent_ids, vec![NoteId::from("434gts")]);
        assert!(deep.child_ids.is_empty());

        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "123xyz", "321abc", "434gts", "111ggg", "456def", "654fed", "789ghi", "123abc",
                "128abc", "126abc"
            ]
        );
    }

    #[test]
    fn test_round_trip() {
        for forest in [outline(), abcd(), Vec::new()] {
            assert_eq!(from_rows(&to_rows(&forest)), forest);
        }
    }

    #[test]
    fn test_from_rows_hydrates_nested() {
        let rows = to_rows(&outline());
        let roots = from_rows(&rows);
        assert!(validate_roots(&roots).is_ok());
        assert_eq!(roots[1].children[2].children[1].id.as_str(), "126abc");
        assert_eq!(roots[1].children[2].children[1].parent_id, Some(NoteId::from("123abc")));
    }

    #[test]
    fn test_from_rows_follows_row_order() {
        // Sibling order comes from row order, not from childIds.
        let rows = vec![
            row("p", None, &["a", "b"], 1),
            row("b", Some("p"), &[], 3),
            row("a", Some("p"), &[], 2),
        ];
        let roots = from_rows(&rows);
        let children: Vec<&str> = roots[0].children.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(children, vec!["b", "a"]);
    }

    #[test]
    fn test_from_rows_holds_out_orphans_and_cycles() {
        let rows = vec![
            row("root", None, &[], 1),
            row("orphan", Some("missing"), &[], 2),
            row("x", Some("y"), &[], 3),
            row("y", Some("x"), &[], 4),
        ];
        let roots = from_rows(&rows);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id.as_str(), "root");
        assert!(roots[0].children.is_empty());
    }

    #[test]
    fn test_from_rows_first_duplicate_wins() {
        let mut second = row("a", None, &[], 2);
        second.text = "second".into();
        let roots = from_rows(&[row("a", None, &[], 1), second]);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].text, "a");
    }

    #[test]
    fn test_from_rows_ignores_extra_parents() {
        let mut child = row("c", Some("p1"), &[], 3);
        child.parent_ids.push(NoteId::from("p2"));
        let rows = vec![row("p1", None, &["c"], 1), row("p2", None, &[], 2), child];
        let roots = from_rows(&rows);
        assert_eq!(roots[0].children.len(), 1);
        assert!(roots[1].children.is_empty());
    }

    #[test]
    fn test_order_rows_restores_shuffled_store_order() {
        let forest = outline();
        let mut rows = to_rows(&forest);
        rows.shuffle(&mut rand::thread_rng());
        assert_eq!(from_rows(&order_rows(rows, None)), forest);
    }

    #[test]
    fn test_order_rows_uses_child_ids_then_created_at() {
        let rows = vec![
            row("late", Some("p"), &[], 9),
            row("p", None, &["second", "first"], 1),
            row("first", Some("p"), &[], 2),
            row("second", Some("p"), &[], 3),
            row("early", Some("p"), &[], 4),
        ];
        let roots = from_rows(&order_rows(rows, None));
        let children: Vec<&str> = roots[0].children.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(children, vec!["second", "first", "early", "late"]);
    }

    #[test]
    fn test_order_rows_keeps_hinted_root_order() {
        // A root inserted between two others has no row recording its
        // position; the forest being replaced supplies it.
        let hint = vec![note("a", "", 1), note("mid", "", 9), note("b", "", 2)];
        let rows = vec![
            row("b", None, &[], 2),
            row("new", None, &[], 5),
            row("mid", None, &[], 9),
            row("a", None, &[], 1),
        ];
        let roots = from_rows(&order_rows(rows, Some(&hint)));
        let ids: Vec<&str> = roots.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "mid", "b", "new"]);
    }

    #[test]
    fn test_row_delta_identical_is_empty() {
        assert!(row_delta(&outline(), &outline()).is_empty());
    }

    #[test]
    fn test_row_delta_text_edit() {
        let before = outline();
        let mut after = outline();
        after[1].children[1].text = "edited".into();
        assert_eq!(
            row_delta(&before, &after),
            vec![RowChange::Upsert(RowPatch::from_note_patch(
                "789ghi".into(),
                &NotePatch::text("edited")
            ))]
        );
    }

    #[test]
    fn test_row_delta_new_child_touches_parent() {
        let before = abcd();
        let mut after = abcd();
        after[0].children[0].push_child(note("E", "e", 5));

        let changes = row_delta(&before, &after);
        assert_eq!(changes.len(), 2);
        assert_eq!(
            changes[0],
            RowChange::Upsert(RowPatch::from_note_patch(
                "B".into(),
                &NotePatch::children(vec!["E".into()])
            ))
        );
        let RowChange::Upsert(created) = &changes[1] else {
            panic!("expected upsert, got {:?}", changes[1]);
        };
        assert_eq!(created.id.as_str(), "E");
        assert_eq!(created.parent_ids, Some(vec![NoteId::from("B")]));
        assert_eq!(created.text.as_deref(), Some("e"));
        assert_eq!(created.created_at, Some(ts(5)));
    }

    #[test]
    fn test_row_delta_removed_subtree() {
        let before = abcd();
        let mut after = abcd();
        after[0].children.remove(1);

        let changes = row_delta(&before, &after);
        assert_eq!(
            changes,
            vec![
                RowChange::Upsert(RowPatch::from_note_patch(
                    "A".into(),
                    &NotePatch::children(vec!["B".into()])
                )),
                RowChange::Delete("C".into()),
                RowChange::Delete("D".into()),
            ]
        );
    }

    #[test]
    fn test_row_delta_reparent() {
        let before = abcd();
        let mut after = abcd();
        let mut c = after[0].children.remove(1);
        c.parent_id = None;
        after.push(c);

        let changes = row_delta(&before, &after);
        assert!(changes.contains(&RowChange::Upsert(RowPatch::from_note_patch(
            "C".into(),
            &NotePatch::parent(None)
        ))));
        assert!(changes.contains(&RowChange::Upsert(RowPatch::from_note_patch(
            "A".into(),
            &NotePatch::children(vec!["B".into()])
        ))));
        assert_eq!(changes.len(), 2);
    }
}
