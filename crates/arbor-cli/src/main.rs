//! arbor command-line outliner.
//!
//! Every command opens the database, hydrates the forest, applies one
//! change, and flushes before exiting.
//!
//! ```bash
//! arbor show
//! arbor add "Groceries"
//! arbor add --under 0 "Milk"
//! arbor add --after 0.children.0 "Eggs"
//! arbor edit 0.children.1 "Free-range eggs"
//! arbor nest 1
//! arbor prev 0.children.0
//! arbor delete 0.children.1
//! ```
//!
//! Logging goes to stderr; set `RUST_LOG=arbor_store=debug` to watch the
//! reconciler.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use arbor_store::{
    AddRequest, ArborConfig, Outcome, ReconcilerHandle, SqliteStore, spawn_reconciler,
};
use arbor_tree::{NotePath, to_rows};
use arbor_types::{Note, UuidV7Ids};

/// Outline notes stored in a local SQLite file.
#[derive(Parser, Debug)]
#[command(name = "arbor")]
#[command(about = "Command-line outliner")]
struct Args {
    /// Database file
    #[arg(long, default_value = "arbor.db")]
    db: PathBuf,

    /// RON config file for write tuning
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the outline with each note's path
    Show {
        /// Also print note ids
        #[arg(long)]
        ids: bool,
    },
    /// Add a note (appended at the top level by default)
    Add {
        text: String,
        /// Append as the last child of the note at this path
        #[arg(long, conflicts_with = "after")]
        under: Option<String>,
        /// Insert right after the note at this path
        #[arg(long)]
        after: Option<String>,
    },
    /// Replace a note's text
    Edit { path: String, text: String },
    /// Delete a note and everything under it
    Delete { path: String },
    /// Make a note the last child of its previous sibling
    Nest { path: String },
    /// Show the note before a path in reading order
    Prev { path: String },
    /// Show the note after a path in reading order
    Next { path: String },
    /// Dump the stored rows as JSON
    Export,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ArborConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ArborConfig::default(),
    };

    let store = SqliteStore::open_with_capacity(&args.db, config.change_channel_capacity)
        .with_context(|| format!("opening {}", args.db.display()))?;
    let (handle, task) = spawn_reconciler(Arc::new(store), UuidV7Ids, &config);
    handle.wait_ready().await?;
    tracing::debug!(db = %args.db.display(), "outline loaded");

    let result = run(&handle, args.command).await;

    let report = handle.shutdown().await?;
    task.await?;
    if report.dropped > 0 {
        bail!("{} change(s) could not be saved", report.dropped);
    }
    result
}

async fn run(handle: &ReconcilerHandle, command: Command) -> Result<()> {
    match command {
        Command::Show { ids } => {
            let forest = handle.snapshot();
            if forest.is_empty() {
                println!("(empty)");
            }
            for (depth, path, note) in forest.iter_dfs() {
                let indent = depth * 2;
                if ids {
                    println!("{:indent$}{}  [{path}] {}", "", note.text, note.id.short());
                } else {
                    println!("{:indent$}{}  [{path}]", "", note.text);
                }
            }
        }
        Command::Add { text, under, after } => {
            let request = match (under, after) {
                (Some(under), _) => AddRequest::append(parse(&under)?.children(), text),
                (None, Some(after)) => AddRequest::after(&parse(&after)?, text),
                (None, None) => AddRequest::append(NotePath::root(), text),
            };
            let id = applied(handle.add(request).await?)?;
            println!("{id}");
        }
        Command::Edit { path, text } => {
            let path = parse(&path)?;
            let mut note = note_at(handle, &path)?;
            note.text = text;
            applied(handle.update(note, path).await?)?;
        }
        Command::Delete { path } => {
            let path = parse(&path)?;
            let note = note_at(handle, &path)?;
            if let Some(focus) = applied(handle.delete(note, path).await?)? {
                tracing::debug!(focus = %focus, "focus moves to previous note");
            }
        }
        Command::Nest { path } => {
            let path = parse(&path)?;
            let note = note_at(handle, &path)?;
            let previous_path = path
                .previous_sibling()
                .with_context(|| format!("{path} has no previous sibling"))?;
            let previous = note_at(handle, &previous_path)?;
            applied(handle.nest(note, previous, path).await?)?;
        }
        Command::Prev { path } => match handle.find_previous(&path) {
            Some(note) => println!("{}", note.text),
            None => println!("(none)"),
        },
        Command::Next { path } => match handle.find_next(&path) {
            Some(note) => println!("{}", note.text),
            None => println!("(none)"),
        },
        Command::Export => {
            let rows = to_rows(handle.snapshot().roots());
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}

fn parse(path: &str) -> Result<NotePath> {
    NotePath::parse(path).with_context(|| format!("bad path {path:?}"))
}

fn note_at(handle: &ReconcilerHandle, path: &NotePath) -> Result<Note> {
    handle
        .snapshot()
        .get(path)
        .cloned()
        .with_context(|| format!("no note at {path}"))
}

fn applied<T>(outcome: Outcome<T>) -> Result<T> {
    match outcome {
        Outcome::Applied(value) => Ok(value),
        Outcome::NoOp(reason) => bail!("nothing changed ({reason:?})"),
    }
}
