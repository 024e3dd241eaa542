use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

/// Writers waiting on a WAL checkpoint retry for this long before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Message {
    Run(Job),
    Close,
}

/// Handle to the thread that owns the connection. Closing happens when the
/// last `Database` clone goes away.
struct Worker {
    jobs: mpsc::Sender<Message>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(handle) = handle else { return };

        if let Err(err) = self.jobs.send(Message::Close) {
            error!("Alarm store worker already gone at shutdown: {err}");
        }
        if let Err(join_err) = handle.join() {
            error!("Alarm store worker panicked: {join_err:?}");
        }
    }
}

/// SQLite-backed local alarm store. All statements run on a dedicated
/// worker thread that owns the connection; callers await the reply.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (jobs_tx, jobs_rx) = mpsc::channel::<Message>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let path = db_path.clone();

        let thread = thread::Builder::new()
            .name("wakeproof-db".into())
            .spawn(move || {
                let mut conn = match open_connection(&path) {
                    Ok(conn) => conn,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }
                serve(&mut conn, jobs_rx);
            })
            .context("failed to spawn alarm store worker")?;

        ready_rx
            .recv()
            .context("alarm store worker exited before it was ready")??;

        info!("Alarm store opened at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                jobs: jobs_tx,
                thread: Mutex::new(Some(thread)),
            }),
        })
    }

    /// Run `task` on the worker thread and wait for its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            // The caller may have been cancelled; the work is done regardless.
            let _ = reply_tx.send(task(conn));
        });

        self.worker
            .jobs
            .send(Message::Run(job))
            .map_err(|_| anyhow!("alarm store worker is not running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("alarm store worker stopped before replying"))?
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database {}", path.display()))?;

    // Not fatal: the store still works in rollback-journal mode.
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!("Failed to enable WAL mode: {err}");
    }
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;

    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

fn serve(conn: &mut Connection, jobs: mpsc::Receiver<Message>) {
    for message in jobs {
        match message {
            Message::Run(job) => job(conn),
            Message::Close => break,
        }
    }
    info!("Alarm store worker stopped");
}
