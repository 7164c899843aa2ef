use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Request {
    Run(Job),
    Stop,
}

/// The thread that owns the SQLite connection. Stopped and joined when the
/// last `Database` clone goes away.
struct StoreThread {
    requests: mpsc::Sender<Request>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreThread {
    fn drop(&mut self) {
        let handle = self
            .handle
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(handle) = handle else {
            return;
        };

        if self.requests.send(Request::Stop).is_err() {
            debug!("record store thread already gone");
        }
        if handle.join().is_err() {
            error!("record store thread panicked");
        }
    }
}

/// Record store handle. Clones share one SQLite connection living on a
/// dedicated thread, so queries never block the async runtime.
#[derive(Clone)]
pub struct Database {
    store: Arc<StoreThread>,
    path: Arc<PathBuf>,
}

impl Database {
    /// Opens (or creates) the database at `path` and brings its schema up to
    /// date before returning.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create {}", dir.display()))?;
        }

        let (requests, inbox) = mpsc::channel::<Request>();
        let (opened_tx, opened_rx) = mpsc::sync_channel::<Result<()>>(1);
        let thread_path = path.clone();

        let handle = thread::Builder::new()
            .name("weighlog-db".into())
            .spawn(move || {
                let mut conn = match open_connection(&thread_path) {
                    Ok(conn) => {
                        let _ = opened_tx.send(Ok(()));
                        conn
                    }
                    Err(err) => {
                        let _ = opened_tx.send(Err(err));
                        return;
                    }
                };

                for request in inbox {
                    match request {
                        Request::Run(job) => job(&mut conn),
                        Request::Stop => break,
                    }
                }
                debug!("record store thread stopped");
            })
            .context("cannot start the record store thread")?;

        opened_rx
            .recv()
            .map_err(|_| anyhow!("record store thread died while opening"))??;
        info!("record store ready at {}", path.display());

        Ok(Self {
            store: Arc::new(StoreThread {
                requests,
                handle: Mutex::new(Some(handle)),
            }),
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `job` against the connection on the store thread.
    pub async fn execute<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, outcome) = oneshot::channel();
        let request = Request::Run(Box::new(move |conn| {
            // The caller may have been cancelled; the result is simply dropped.
            let _ = reply.send(job(conn));
        }));

        self.store
            .requests
            .send(request)
            .map_err(|_| anyhow!("record store thread is not running"))?;

        outcome
            .await
            .map_err(|_| anyhow!("record store thread stopped before replying"))?
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("cannot open database {}", path.display()))?;

    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        error!("WAL journal unavailable, keeping default: {err}");
    }
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("cannot set SQLite busy timeout")?;
    run_migrations(&mut conn).context("database migration failed")?;
    Ok(conn)
}
