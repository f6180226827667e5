//! SQLite-backed aggregate store.
//!
//! The connection lives on its own OS thread. Async callers hand it closures
//! through [`Database::execute`] and await the result on a oneshot, so every
//! statement against the file runs in submission order.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use tokio::sync::oneshot;

pub mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use models::{AggregateSnapshot, CategoryTotals, DayStats};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const IN_MEMORY: &str = ":memory:";

/// How long a statement waits on a file locked by another process (a second
/// CLI invocation, say) before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum WorkerMessage {
    Run(Job),
    Stop,
}

/// Owns the worker thread; the last [`Database`] clone to go stops it.
struct Worker {
    jobs: mpsc::Sender<WorkerMessage>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let thread = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(thread) = thread else {
            return;
        };

        if self.jobs.send(WorkerMessage::Stop).is_err() {
            log_warn!("stats worker already gone at shutdown");
        }
        if let Err(panic) = thread.join() {
            log_error!("stats worker panicked: {panic:?}");
        }
    }
}

fn is_in_memory(path: &Path) -> bool {
    path.as_os_str() == IN_MEMORY
}

/// Opens the file, sets the journal up and brings the schema current.
fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open stats database {}", path.display()))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;

    // WAL has no meaning for a private in-memory database.
    if !is_in_memory(path) {
        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            log_warn!("staying on the default journal, WAL unavailable: {err}");
        }
    }

    migrations::run_migrations(&mut conn).context("failed to migrate stats schema")?;
    Ok(conn)
}

fn worker_main(
    path: PathBuf,
    ready: mpsc::Sender<Result<()>>,
    messages: mpsc::Receiver<WorkerMessage>,
) {
    let mut conn = match open_connection(&path) {
        Ok(conn) => conn,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    let mut jobs_run: u64 = 0;
    while let Ok(message) = messages.recv() {
        match message {
            WorkerMessage::Run(job) => {
                job(&mut conn);
                jobs_run += 1;
            }
            WorkerMessage::Stop => break,
        }
    }
    log_info!("stats worker stopping after {jobs_run} jobs");
}

/// Observation totals. Clones share one connection and one worker thread.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    path: Arc<PathBuf>,
}

impl Database {
    /// Opens (or creates) the database at `path`, creating parent directories.
    /// Returns once the schema is migrated, or with the reason it could not be.
    pub fn new(path: PathBuf) -> Result<Self> {
        if !is_in_memory(&path) {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }

        let (jobs_tx, jobs_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let worker_path = path.clone();
        let thread = thread::Builder::new()
            .name("reelwatch-db".into())
            .spawn(move || worker_main(worker_path, ready_tx, jobs_rx))
            .context("failed to spawn stats worker thread")?;

        ready_rx
            .recv()
            .context("stats worker exited during startup")??;
        log_info!("stats database ready at {}", path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                jobs: jobs_tx,
                thread: Mutex::new(Some(thread)),
            }),
            path: Arc::new(path),
        })
    }

    /// Private database that disappears with the last clone.
    pub fn in_memory() -> Result<Self> {
        Self::new(PathBuf::from(IN_MEMORY))
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Runs `task` on the worker thread and waits for its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            // The caller may have been cancelled while queued.
            let _ = reply_tx.send(task(conn));
        });

        self.worker
            .jobs
            .send(WorkerMessage::Run(job))
            .map_err(|_| anyhow!("stats worker is not running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("stats worker stopped before replying"))?
    }
}
