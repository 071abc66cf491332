//! Shared test forests.

use arbor_types::{DateTime, Note, NoteId, Utc};

pub(crate) fn ts(n: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + n, 0).unwrap()
}

pub(crate) fn note(id: &str, text: &str, n: i64) -> Note {
    Note::new(NoteId::from(id), text, None).with_created_at(ts(n))
}

/// Two roots, three levels:
///
/// ```text
/// 0  123xyz First Note
///      0  321abc Child of First Note
///      1  434gts Second Child of First Note
///           0  111ggg Final child of first note
/// 1  456def Second Note
///      0  654fed Child of Second Note
///      1  789ghi Another Child of Second Note
///      2  123abc Here is the text!
///           0  128abc Another text!
///           1  126abc A text!
/// ```
pub(crate) fn outline() -> Vec<Note> {
    vec![
        note("123xyz", "First Note", 1)
            .with_child(note("321abc", "Child of First Note", 2))
            .with_child(
                note("434gts", "Second Child of First Note", 3)
                    .with_child(note("111ggg", "Final child of first note", 4)),
            ),
        note("456def", "Second Note", 5)
            .with_child(note("654fed", "Child of Second Note", 6))
            .with_child(note("789ghi", "Another Child of Second Note", 7))
            .with_child(
                note("123abc", "Here is the text!", 8)
                    .with_child(note("128abc", "Another text!", 9))
                    .with_child(note("126abc", "A text!", 10)),
            ),
    ]
}

/// `A[B, C[D]]`
pub(crate) fn abcd() -> Vec<Note> {
    vec![
        note("A", "a", 1)
            .with_child(note("B", "b", 2))
            .with_child(note("C", "c", 3).with_child(note("D", "d", 4))),
    ]
}
