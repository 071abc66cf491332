//! Actor that owns a [`Reconciler`] and serializes access to it.
//!
//! ```text
//!   ReconcilerHandle (Clone)    mpsc     ReconcilerActor (tokio task)
//!   ┌────────────────────┐  ───────▶  ┌──────────────────────────────┐
//!   │ .add() .update()   │            │ Reconciler (forest + queue)  │
//!   │ .delete() .nest()  │  ◀───────  │ store subscription           │
//!   │ .flush()           │  oneshot   │ flush worker                 │
//!   └────────────────────┘            └──────────────────────────────┘
//!            ▲                                     │
//!            └──────── watch<Arc<Forest>> ─────────┘
//! ```
//!
//! Commands run one at a time in arrival order, and store snapshots are
//! folded between commands, so every mutation sees the effects of the
//! ones before it. Each new forest is published on the watch channel
//! before the command's reply is sent: once an `add` returns, `snapshot()`
//! already shows the note.
//!
//! Until the store can be read the actor polls it, and mutations come back
//! as `NoOp(NotReady)`. The store subscription lives inside the actor task
//! and is dropped when it stops, whether by [`ReconcilerHandle::shutdown`]
//! or because every handle was dropped.

use std::sync::Arc;
use std::time::Duration;

use arbor_tree::{Forest, NotePath, find_next};
use arbor_types::{IdGenerator, Note, NoteId};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backend::{RowSnapshot, RowStore};
use crate::config::ArborConfig;
use crate::error::{StoreError, StoreResult};
use crate::reconcile::{AddRequest, Outcome, Reconciler};
use crate::write_buffer::{FlushReport, WriteBuffer};

// ============================================================================
// Commands (internal)
// ============================================================================

enum Command {
    Add {
        request: AddRequest,
        reply: oneshot::Sender<Outcome<NoteId>>,
    },
    Update {
        note: Note,
        path: NotePath,
        reply: oneshot::Sender<Outcome>,
    },
    Delete {
        note: Note,
        path: NotePath,
        reply: oneshot::Sender<Outcome<Option<NoteId>>>,
    },
    Nest {
        note: Note,
        previous: Note,
        path: NotePath,
        reply: oneshot::Sender<Outcome>,
    },
    Flush {
        reply: oneshot::Sender<FlushReport>,
    },
    Shutdown {
        reply: oneshot::Sender<FlushReport>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Add { .. } => "add",
            Command::Update { .. } => "update",
            Command::Delete { .. } => "delete",
            Command::Nest { .. } => "nest",
            Command::Flush { .. } => "flush",
            Command::Shutdown { .. } => "shutdown",
        }
    }
}

// ============================================================================
// ReconcilerHandle (public API)
// ============================================================================

/// Cloneable handle to a running reconciler.
///
/// Mutations return `Err(StoreError::Shutdown)` only when the actor is gone.
/// Path problems are reported in the [`Outcome`].
#[derive(Clone)]
pub struct ReconcilerHandle {
    tx: mpsc::Sender<Command>,
    forest: watch::Receiver<Arc<Forest>>,
    ready: watch::Receiver<bool>,
}

impl ReconcilerHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> StoreResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| StoreError::Shutdown)?;
        rx.await.map_err(|_| StoreError::Shutdown)
    }

    /// Create a note. Yields the new id.
    pub async fn add(&self, request: AddRequest) -> StoreResult<Outcome<NoteId>> {
        self.request(|reply| Command::Add { request, reply }).await
    }

    /// Replace the note at `path`.
    pub async fn update(&self, note: Note, path: NotePath) -> StoreResult<Outcome> {
        self.request(|reply| Command::Update { note, path, reply })
            .await
    }

    /// Remove the note at `path`. Yields the id to move focus to.
    pub async fn delete(&self, note: Note, path: NotePath) -> StoreResult<Outcome<Option<NoteId>>> {
        self.request(|reply| Command::Delete { note, path, reply })
            .await
    }

    /// Move the note at `path` under its preceding sibling `previous`.
    pub async fn nest(
        &self,
        note: Note,
        previous: Note,
        path: NotePath,
    ) -> StoreResult<Outcome> {
        self.request(|reply| Command::Nest {
            note,
            previous,
            path,
            reply,
        })
        .await
    }

    /// Write every queued change now.
    pub async fn flush(&self) -> StoreResult<FlushReport> {
        self.request(|reply| Command::Flush { reply }).await
    }

    /// Stop the actor after flushing every queued change.
    ///
    /// Writes the store still refuses after the configured attempts are
    /// counted in [`FlushReport::dropped`].
    pub async fn shutdown(&self) -> StoreResult<FlushReport> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    /// The most recently published forest.
    pub fn snapshot(&self) -> Arc<Forest> {
        self.forest.borrow().clone()
    }

    /// A receiver notified on every new forest.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Forest>> {
        self.forest.clone()
    }

    /// The note before `path` in the current snapshot.
    pub fn find_previous(&self, path: &str) -> Option<Note> {
        let forest = self.snapshot();
        arbor_tree::find_previous(path, forest.roots()).cloned()
    }

    /// The note after `path` in the current snapshot.
    pub fn find_next(&self, path: &str) -> Option<Note> {
        let forest = self.snapshot();
        find_next(path, forest.roots()).cloned()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait until the store has been hydrated.
    pub async fn wait_ready(&self) -> StoreResult<()> {
        let mut ready = self.ready.clone();
        ready
            .wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| StoreError::Shutdown)
    }
}

/// Start a reconciler over `store` on the current tokio runtime.
pub fn spawn_reconciler<G>(
    store: Arc<dyn RowStore>,
    ids: G,
    config: &ArborConfig,
) -> (ReconcilerHandle, JoinHandle<()>)
where
    G: IdGenerator + 'static,
{
    let (tx, rx) = mpsc::channel(config.command_queue_depth.max(1));
    let reconciler = Reconciler::new(ids, WriteBuffer::new(config));
    let (forest_tx, forest) = watch::channel(reconciler.forest());
    let (ready_tx, ready) = watch::channel(false);

    let actor = ReconcilerActor {
        reconciler,
        store,
        forest_tx,
        ready_tx,
        hydrate_retry: config.hydrate_retry(),
    };
    let task = tokio::spawn(actor.run(rx));
    (ReconcilerHandle { tx, forest, ready }, task)
}

// ============================================================================
// ReconcilerActor (internal)
// ============================================================================

struct ReconcilerActor<G> {
    reconciler: Reconciler<G>,
    store: Arc<dyn RowStore>,
    forest_tx: watch::Sender<Arc<Forest>>,
    ready_tx: watch::Sender<bool>,
    hydrate_retry: Duration,
}

/// Next emission from the store, or never when not subscribed.
async fn next_snapshot(
    changes: &mut Option<broadcast::Receiver<RowSnapshot>>,
) -> Result<RowSnapshot, RecvError> {
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Skip ahead to the newest snapshot already queued.
fn latest(rx: &mut broadcast::Receiver<RowSnapshot>, mut snapshot: RowSnapshot) -> RowSnapshot {
    loop {
        match rx.try_recv() {
            Ok(newer) => snapshot = newer,
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => return snapshot,
        }
    }
}

impl<G: IdGenerator> ReconcilerActor<G> {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let (stop_tx, stop_rx) = oneshot::channel();
        let worker = self
            .reconciler
            .writes()
            .spawn_worker(Arc::clone(&self.store), stop_rx);

        let mut changes: Option<broadcast::Receiver<RowSnapshot>> = None;
        let mut retry = tokio::time::interval(self.hydrate_retry);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_reply = None;

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => {
                        debug!("all handles dropped");
                        break;
                    }
                },
                received = next_snapshot(&mut changes) => match received {
                    Ok(snapshot) => {
                        if let Some(rx) = changes.as_mut() {
                            let snapshot = latest(rx, snapshot);
                            self.fold(&snapshot);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "row change stream lagged");
                    }
                    Err(RecvError::Closed) => {
                        info!("row change stream closed");
                        changes = None;
                    }
                },
                _ = retry.tick(), if !self.reconciler.is_ready() => {
                    changes = self.try_hydrate().await;
                }
            }
        }

        drop(changes);
        let _ = stop_tx.send(());
        if let Err(err) = worker.await {
            warn!(error = %err, "flush worker ended abnormally");
        }
        let report = self.reconciler.writes().drain(self.store.as_ref()).await;
        info!(?report, "reconciler stopped");
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(report);
        }
    }

    /// Read the full row set and subscribe. The subscription is taken
    /// first so no change between the two is missed.
    async fn try_hydrate(&mut self) -> Option<broadcast::Receiver<RowSnapshot>> {
        if !self.store.is_ready() {
            debug!("row store not ready");
            return None;
        }
        let changes = self.store.subscribe_row_changes();
        match self.store.query_all_rows().await {
            Ok(rows) => {
                self.reconciler.hydrate(rows);
                self.publish();
                self.ready_tx.send_replace(true);
                Some(changes)
            }
            Err(err) => {
                warn!(error = %err, "hydration failed, will retry");
                None
            }
        }
    }

    fn fold(&mut self, snapshot: &RowSnapshot) {
        if self.reconciler.apply_remote(snapshot) {
            self.publish();
        }
    }

    fn publish(&self) {
        let forest = self.reconciler.forest();
        self.forest_tx.send_if_modified(|current| {
            if current.version() == forest.version() {
                return false;
            }
            *current = forest;
            true
        });
    }

    #[tracing::instrument(level = "debug", skip_all, fields(op = command.name()))]
    async fn handle(&mut self, command: Command) {
        match command {
            Command::Add { request, reply } => {
                let outcome = self.reconciler.add(request);
                self.publish();
                let _ = reply.send(outcome);
            }
            Command::Update { note, path, reply } => {
                let outcome = self.reconciler.update(note, &path);
                self.publish();
                let _ = reply.send(outcome);
            }
            Command::Delete { note, path, reply } => {
                let outcome = self.reconciler.delete(&note, &path);
                self.publish();
                let _ = reply.send(outcome);
            }
            Command::Nest {
                note,
                previous,
                path,
                reply,
            } => {
                let outcome = self.reconciler.nest(&note, &previous, &path);
                self.publish();
                let _ = reply.send(outcome);
            }
            Command::Flush { reply } => {
                let report = self.reconciler.writes().flush_now(self.store.as_ref()).await;
                let _ = reply.send(report);
            }
            Command::Shutdown { reply } => {
                // The run loop intercepts shutdown; answer anyway.
                let _ = reply.send(FlushReport::default());
            }
        }
    }
}
