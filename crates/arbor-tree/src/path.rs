//! Positional paths into the forest.
//!
//! A path is a dotted string that alternates sequence indices with the
//! literal `children`:
//!
//! ```text
//! ""                         the root sequence
//! "1"                        second root
//! "1.children"               the children sequence of the second root
//! "1.children.2"             third child of the second root
//! "1.children.[]"            append slot at the end of that sequence
//! ```
//!
//! Paths identify positions, not notes. They are only meaningful against
//! the forest snapshot they were computed from.

use std::fmt;
use std::str::FromStr;

use crate::TreeError;

/// Literal segment separating a note from its child sequence.
pub const CHILDREN: &str = "children";

/// Final-segment marker meaning "one past the end".
pub const APPEND: &str = "[]";

/// One parsed path segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Segment {
    Index(usize),
    Children,
    Append,
}

/// Where within a sequence an insertion lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Position {
    Index(usize),
    Append,
}

/// A validated path.
///
/// Three shapes exist: a *note path* ends in an index, a *container path*
/// is empty or ends in `children`, and an *append path* ends in `[]`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct NotePath {
    segments: Vec<Segment>,
}

impl NotePath {
    /// The root sequence (empty path).
    pub fn root() -> Self {
        Self::default()
    }

    /// The `index`-th root note.
    pub fn root_index(index: usize) -> Self {
        Self {
            segments: vec![Segment::Index(index)],
        }
    }

    /// Parse and validate a dotted path string.
    pub fn parse(path: &str) -> Result<Self, TreeError> {
        if path.is_empty() {
            return Ok(Self::root());
        }

        let parts: Vec<&str> = path.split('.').collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());

        for (pos, part) in parts.iter().enumerate() {
            let segment = if pos % 2 == 1 {
                (*part == CHILDREN).then_some(Segment::Children)
            } else if *part == APPEND {
                (pos == last).then_some(Segment::Append)
            } else if !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) {
                part.parse().ok().map(Segment::Index)
            } else {
                None
            };

            match segment {
                Some(segment) => segments.push(segment),
                None => {
                    return Err(TreeError::InvalidPath {
                        path: path.to_string(),
                        segment: part.to_string(),
                    });
                }
            }
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True for the empty path.
    pub fn is_root_sequence(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when the path names a sequence rather than a note.
    pub fn is_container(&self) -> bool {
        matches!(self.segments.last(), None | Some(Segment::Children))
    }

    /// True when the path names a single note.
    pub fn is_note(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Index(_)))
    }

    /// The final index, when the path names a note.
    pub fn last_index(&self) -> Option<usize> {
        match self.segments.last() {
            Some(Segment::Index(i)) => Some(*i),
            _ => None,
        }
    }

    /// Number of ancestors of the addressed note (0 for roots).
    pub fn depth(&self) -> usize {
        self.segments.len().saturating_sub(1) / 2
    }

    /// `0` exactly: the first note of the whole forest.
    pub fn is_first_root(&self) -> bool {
        self.segments == [Segment::Index(0)]
    }

    /// Ends in `.children.0`: the first child of some note.
    pub fn is_first_child(&self) -> bool {
        self.segments.len() >= 3 && self.segments.last() == Some(&Segment::Index(0))
    }

    /// Path of the `index`-th note in this sequence, or of this note's
    /// `index`-th child when `self` names a note.
    pub fn child(&self, index: usize) -> Self {
        let mut segments = self.children().segments;
        segments.push(Segment::Index(index));
        Self { segments }
    }

    /// The child sequence of the addressed note. Container paths are
    /// returned unchanged.
    pub fn children(&self) -> Self {
        let mut segments = self.segments.clone();
        match segments.last() {
            Some(Segment::Index(_)) => segments.push(Segment::Children),
            Some(Segment::Append) => {
                segments.pop();
            }
            _ => {}
        }
        Self { segments }
    }

    /// The append slot of this sequence (or of this note's children).
    pub fn append(&self) -> Self {
        let mut segments = self.children().segments;
        segments.push(Segment::Append);
        Self { segments }
    }

    /// The sequence containing the addressed note or slot.
    pub fn container(&self) -> Self {
        match self.segments.last() {
            Some(Segment::Index(_) | Segment::Append) => Self {
                segments: self.segments[..self.segments.len() - 1].to_vec(),
            },
            _ => self.clone(),
        }
    }

    /// Split into `(container, position)`. `None` for container paths.
    pub fn split_last(&self) -> Option<(Self, Position)> {
        let position = match self.segments.last()? {
            Segment::Index(i) => Position::Index(*i),
            Segment::Append => Position::Append,
            Segment::Children => return None,
        };
        Some((self.container(), position))
    }

    /// Path of the note owning this note's sequence. `None` for roots,
    /// containers, and append slots.
    pub fn parent(&self) -> Option<Self> {
        if !self.is_note() || self.segments.len() < 3 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 2].to_vec(),
        })
    }

    /// Path of the note owning the sequence this path lives in. `None`
    /// when that sequence is the root sequence.
    pub fn owner(&self) -> Option<Self> {
        let container = self.container();
        let len = container.segments.len();
        if len == 0 {
            return None;
        }
        Some(Self {
            segments: container.segments[..len - 1].to_vec(),
        })
    }

    /// Same container, different final index.
    pub fn with_last_index(&self, index: usize) -> Option<Self> {
        self.last_index()?;
        let mut segments = self.segments.clone();
        if let Some(last) = segments.last_mut() {
            *last = Segment::Index(index);
        }
        Some(Self { segments })
    }

    /// The preceding sibling's path, if this is not the first in its sequence.
    pub fn previous_sibling(&self) -> Option<Self> {
        let index = self.last_index()?;
        self.with_last_index(index.checked_sub(1)?)
    }

    /// The following sibling's path (which may not exist in the forest).
    pub fn next_sibling(&self) -> Option<Self> {
        let index = self.last_index()?;
        self.with_last_index(index + 1)
    }
}

impl fmt::Display for NotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (pos, segment) in self.segments.iter().enumerate() {
            if pos > 0 {
                f.write_str(".")?;
            }
            match segment {
                Segment::Index(i) => write!(f, "{i}")?,
                Segment::Children => f.write_str(CHILDREN)?,
                Segment::Append => f.write_str(APPEND)?,
            }
        }
        Ok(())
    }
}

impl FromStr for NotePath {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for NotePath {
    type Error = TreeError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}
