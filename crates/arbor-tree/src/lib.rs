//! Path addressing, navigation, and adjacency conversion for the arbor
//! outline forest.
//!
//! Everything in this crate is pure: no I/O, no clocks, no async. The
//! reconciliation layer in `arbor-store` drives it.
//!
//! # Components
//!
//! - **Path algebra** ([`path`], [`algebra`]): dotted positional paths such as
//!   `0.children.1.children.2`, and `locate` / `insert` / `replace` / `remove`
//!   against the root sequence.
//! - **Previous-node finder** ([`previous`]): the note before a path in
//!   reading order, with the parent standing in for a missing preceding
//!   sibling.
//! - **Forest model** ([`Forest`]): a versioned value evolved by cloning,
//!   never mutated in place.
//! - **Adjacency converter** ([`adjacency`]): lossless mapping between the
//!   nested forest and flat `parentIds` / `childIds` rows.

pub mod adjacency;
pub mod algebra;
mod error;
pub mod forest;
pub mod path;
pub mod previous;

#[cfg(test)]
mod fixtures;

pub use adjacency::{RowChange, from_rows, order_rows, row_delta, to_rows};
pub use algebra::{Applied, container, insert, locate, owner_id, remove, replace};
pub use error::TreeError;
pub use forest::{Forest, repair_parent_ids, validate_roots};
pub use path::{NotePath, Position, Segment};
pub use previous::{find_next, find_previous, next_path, previous_path};

/// Result type for tree operations.
pub type Result<T> = std::result::Result<T, TreeError>;

/// Maximum expected tree depth. Traversal code uses this as a circuit breaker.
///
/// Outlines nest a handful of levels deep in practice. Exceeding 512 almost
/// certainly means corrupted input.
pub const MAX_TREE_DEPTH: usize = 512;
