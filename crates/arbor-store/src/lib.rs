//! Reconciliation and row persistence for arbor.
//!
//! This crate is where the outline meets I/O. The pure algorithms live in
//! `arbor-tree`; here they are driven by a single owner of the forest that
//! keeps it in step with a flat row store.
//!
//! ```text
//!   caller ──▶ ReconcilerHandle ──▶ Reconciler ──▶ WriteBuffer ──▶ RowStore
//!                    ▲                  │                             │
//!                    └── Arc<Forest> ◀──┴──── apply_remote ◀── snapshots
//! ```
//!
//! # Key Types
//!
//! |------------------------|------------------------------------------------|
//! | Type                   | Purpose                                        |
//! |------------------------|------------------------------------------------|
//! | [`Reconciler`]         | Owns the forest; mutations and remote folding  |
//! | [`ReconcilerHandle`]   | Async, cloneable front end to the actor        |
//! | [`WriteBuffer`]        | Debounced per-id write-behind queue            |
//! | [`RowStore`]           | Persistence seam (upsert/delete/query/watch)   |
//! | [`MemoryStore`]        | In-process store with failure injection        |
//! | [`SqliteStore`]        | SQLite-backed store                            |
//! | [`ArborConfig`]        | Debounce, retry, and channel tuning (RON)      |
//! |------------------------|------------------------------------------------|

pub mod actor;
pub mod backend;
pub mod config;
pub mod error;
pub mod memory;
pub mod reconcile;
pub mod sqlite;
pub mod write_buffer;

pub use actor::{ReconcilerHandle, spawn_reconciler};
pub use backend::{RowSnapshot, RowStore};
pub use config::ArborConfig;
pub use error::{ConfigError, StoreError, StoreResult};
pub use memory::MemoryStore;
pub use reconcile::{AddRequest, Anchor, NoOpReason, Outcome, Reconciler};
pub use sqlite::SqliteStore;
pub use write_buffer::{FlushReport, PendingWrite, WriteBuffer};
