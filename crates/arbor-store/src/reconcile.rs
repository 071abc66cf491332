//! The reconciliation core: sole owner of the authoritative forest.
//!
//! Every mutation runs in two phases. The local phase evolves the current
//! [`Forest`] through the path algebra and swaps the successor in before
//! returning, so the next read sees it. The durability phase is the row
//! delta between the two forests, handed to the [`WriteBuffer`] and written
//! later. Keeping both phases behind one `&mut self` is what serializes
//! mutations; the actor in [`crate::actor`] provides the queue in front.
//!
//! Path problems never surface as errors. They come back as
//! [`Outcome::NoOp`] with a reason and the forest is left untouched.

use std::sync::Arc;

use arbor_tree::{
    Forest, NotePath, TreeError, from_rows, insert, locate, order_rows, owner_id, previous_path,
    remove, repair_parent_ids, replace, row_delta, validate_roots,
};
use arbor_types::{IdGenerator, Note, NoteId, Row, UuidV7Ids};
use tracing::{debug, info, trace};

use crate::write_buffer::WriteBuffer;

/// Why a mutation changed nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoOpReason {
    /// The store has not been hydrated yet.
    NotReady,
    /// The path is malformed or walks off the forest.
    PathNotFound,
    /// The final index is past the end of its sequence.
    IndexOutOfRange,
    /// The change is already reflected in the forest.
    AlreadyApplied,
    /// The path resolves, but not to something this operation accepts.
    InvalidTarget,
}

impl From<TreeError> for NoOpReason {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::InvalidPath { .. }
            | TreeError::PathNotFound(_)
            | TreeError::NotAddressable(_) => Self::PathNotFound,
            TreeError::IndexOutOfRange { .. } => Self::IndexOutOfRange,
            TreeError::DuplicateId(_) | TreeError::ParentMismatch { .. } | TreeError::TooDeep(_) => {
                Self::InvalidTarget
            }
        }
    }
}

/// Result of a reconciler operation.
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T = ()> {
    Applied(T),
    NoOp(NoOpReason),
}

impl<T> Outcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            Self::Applied(value) => Some(value),
            Self::NoOp(_) => None,
        }
    }

    pub fn reason(&self) -> Option<NoOpReason> {
        match self {
            Self::Applied(_) => None,
            Self::NoOp(reason) => Some(*reason),
        }
    }
}

/// Where in a container a new note goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Anchor {
    /// End of the container.
    Append,
    /// Front of the container.
    Start,
    /// Immediately after the note at this index. Past the end appends.
    After(usize),
}

/// A request to create a note.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddRequest {
    pub text: String,
    /// The sequence to insert into: `""` for the roots, `"0.children"` for
    /// the children of root 0.
    pub container: NotePath,
    pub anchor: Anchor,
}

impl AddRequest {
    pub fn append(container: NotePath, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            container,
            anchor: Anchor::Append,
        }
    }

    /// Insert right after the note at `path`, in the same sequence.
    pub fn after(path: &NotePath, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            container: path.container(),
            anchor: path.last_index().map_or(Anchor::Append, Anchor::After),
        }
    }
}

type Step<T> = Result<Option<(Forest, T)>, NoOpReason>;

/// Owns the forest, the id generator, and the outbound write queue.
pub struct Reconciler<G = UuidV7Ids> {
    forest: Arc<Forest>,
    ids: G,
    writes: WriteBuffer,
    ready: bool,
}

impl<G: IdGenerator> Reconciler<G> {
    /// An empty, not-yet-ready reconciler.
    pub fn new(ids: G, writes: WriteBuffer) -> Self {
        Self {
            forest: Arc::new(Forest::default()),
            ids,
            writes,
            ready: false,
        }
    }

    /// The current forest. Cheap to clone and safe to hold across
    /// later mutations.
    pub fn forest(&self) -> Arc<Forest> {
        Arc::clone(&self.forest)
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn writes(&self) -> &WriteBuffer {
        &self.writes
    }

    /// Load the initial row set and start accepting mutations.
    pub fn hydrate(&mut self, rows: Vec<Row>) {
        self.fold_rows(rows);
        self.ready = true;
        info!(
            notes = self.forest.node_count(),
            version = self.forest.version(),
            "hydrated forest"
        );
    }

    /// Replace the forest with one rebuilt from a store snapshot.
    ///
    /// Local writes not yet confirmed by the store are replayed over the
    /// snapshot first. Returns whether the forest changed.
    pub fn apply_remote(&mut self, rows: &[Row]) -> bool {
        let changed = self.fold_rows(rows.to_vec());
        if changed {
            debug!(version = self.forest.version(), "folded remote snapshot");
        }
        changed
    }

    fn fold_rows(&mut self, mut rows: Vec<Row>) -> bool {
        self.writes.overlay(&mut rows);
        let ordered = order_rows(rows, Some(self.forest.roots()));
        let roots = from_rows(&ordered);
        if roots.as_slice() == self.forest.roots() {
            return false;
        }
        self.forest = Arc::new(self.forest.successor(roots));
        true
    }

    /// Create a note with a fresh id. Returns the id.
    pub fn add(&mut self, request: AddRequest) -> Outcome<NoteId> {
        let step = self.try_add(request);
        self.settle("add", step)
    }

    /// Replace the note at `path` with `note`, which must carry the same id.
    ///
    /// `parent_id`s in the replacement are rewritten from its position.
    pub fn update(&mut self, note: Note, path: &NotePath) -> Outcome {
        let step = self.try_update(note, path);
        self.settle("update", step)
    }

    /// Remove `note` and its subtree from `path`.
    ///
    /// Returns the id of the note that preceded it in reading order, taken
    /// before the removal, as the place to move focus.
    pub fn delete(&mut self, note: &Note, path: &NotePath) -> Outcome<Option<NoteId>> {
        let step = self.try_delete(note, path);
        self.settle("delete", step)
    }

    /// Move `note` to the end of `previous`'s children. `previous` must be
    /// the sibling immediately before `path`.
    pub fn nest(&mut self, note: &Note, previous: &Note, path: &NotePath) -> Outcome {
        let step = self.try_nest(note, previous, path);
        self.settle("nest", step)
    }

    /// The note before `path` in reading order.
    pub fn find_previous(&self, path: &NotePath) -> Option<Note> {
        let previous = previous_path(path, self.forest.roots())?;
        self.forest.get(&previous).cloned()
    }

    fn ensure_ready(&self) -> Result<(), NoOpReason> {
        if self.ready {
            Ok(())
        } else {
            Err(NoOpReason::NotReady)
        }
    }

    fn try_add(&self, request: AddRequest) -> Step<NoteId> {
        self.ensure_ready()?;
        let AddRequest {
            text,
            container,
            anchor,
        } = request;
        if !container.is_container() {
            return Err(NoOpReason::InvalidTarget);
        }

        let parent_id = owner_id(&container, self.forest.roots())?;
        let target = match anchor {
            Anchor::Append => container.append(),
            Anchor::Start => container.child(0),
            Anchor::After(index) => container.child(index.saturating_add(1)),
        };
        let note = Note::new(self.ids.new_id(), text, parent_id);
        let id = note.id.clone();

        self.forest
            .evolve(|roots| -> Result<Option<NoteId>, NoOpReason> {
                Ok(insert(&target, note, roots)?.changed().then_some(id))
            })
    }

    fn try_update(&self, note: Note, path: &NotePath) -> Step<()> {
        self.ensure_ready()?;
        let roots = self.forest.roots();
        if locate(path, roots)?.id != note.id {
            return Err(NoOpReason::InvalidTarget);
        }

        let mut note = note;
        note.parent_id = owner_id(path, roots)?;
        let id = note.id.clone();
        repair_parent_ids(&mut note.children, Some(&id));

        self.forest
            .evolve(|roots| -> Result<Option<()>, NoOpReason> {
                if !replace(path, note, roots)?.changed() {
                    return Ok(None);
                }
                validate_roots(roots)?;
                Ok(Some(()))
            })
    }

    fn try_delete(&self, note: &Note, path: &NotePath) -> Step<Option<NoteId>> {
        self.ensure_ready()?;
        let roots = self.forest.roots();
        let focus = previous_path(path, roots)
            .and_then(|previous| locate(&previous, roots).ok())
            .map(|previous| previous.id.clone());

        self.forest
            .evolve(|roots| -> Result<Option<Option<NoteId>>, NoOpReason> {
                Ok(remove(path, &note.id, roots)?.map(|_| focus))
            })
    }

    fn try_nest(&self, note: &Note, previous: &Note, path: &NotePath) -> Step<()> {
        self.ensure_ready()?;
        let target = path.previous_sibling().ok_or(NoOpReason::InvalidTarget)?;

        self.forest
            .evolve(|roots| -> Result<Option<()>, NoOpReason> {
                let Some(moved) = remove(path, &note.id, roots)? else {
                    return Ok(None);
                };
                let mut parent = locate(&target, roots)?.clone();
                if parent.id != previous.id {
                    return Err(NoOpReason::InvalidTarget);
                }
                parent.push_child(moved);
                replace(&target, parent, roots)?;
                Ok(Some(()))
            })
    }

    fn settle<T>(&mut self, op: &'static str, step: Step<T>) -> Outcome<T> {
        match step {
            Ok(Some((next, value))) => {
                self.commit(next);
                Outcome::Applied(value)
            }
            Ok(None) => {
                debug!(op, "already applied");
                Outcome::NoOp(NoOpReason::AlreadyApplied)
            }
            Err(reason) => {
                debug!(op, ?reason, "mutation absorbed");
                Outcome::NoOp(reason)
            }
        }
    }

    fn commit(&mut self, next: Forest) {
        let changes = row_delta(self.forest.roots(), next.roots());
        trace!(version = next.version(), rows = changes.len(), "commit");
        self.writes.enqueue_all(changes);
        self.forest = Arc::new(next);
    }
}
