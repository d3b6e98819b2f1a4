/*!
 * SQLite connection shared by the job repository.
 *
 * One connection sits behind a mutex. Async callers hop onto the blocking
 * pool so a slow statement never stalls the runtime driving the pipelines.
 */

use anyhow::{Context, Result};
use log::{debug, info};
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::models::JobStatus;
use super::schema;

/// Shared handle to the job database
#[derive(Clone)]
pub struct DatabaseConnection {
    db_path: PathBuf,
    connection: Arc<Mutex<Connection>>,
}

impl DatabaseConnection {
    /// Open (creating when needed) the database file and bring its schema up to date
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {}", parent.display()))?;
        }

        info!("Opening job database at {}", db_path.display());
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
        Self::from_connection(conn, db_path)
    }

    /// Private in-memory database, gone when the last handle drops
    pub fn new_in_memory() -> Result<Self> {
        debug!("Opening in-memory job database");
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn, PathBuf::from(":memory:"))
    }

    fn from_connection(conn: Connection, db_path: PathBuf) -> Result<Self> {
        schema::migrate(&conn)?;
        Ok(Self {
            db_path,
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Run `f` against the connection on the calling thread
    pub fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.connection.lock();
        f(&conn)
    }

    /// Run `f` against the connection on the blocking pool
    pub async fn execute_async<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let connection = self.connection.clone();
        tokio::task::spawn_blocking(move || {
            let conn = connection.lock();
            f(&conn)
        })
        .await
        .context("Database task panicked")?
    }

    /// Run `f` inside a transaction on the blocking pool; commits only when `f` succeeds
    pub async fn transaction_async<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let connection = self.connection.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = connection.lock();
            let tx = conn.transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
        .context("Database transaction panicked")?
    }

    /// Job counts for the whole table
    pub fn stats(&self) -> Result<DatabaseStats> {
        self.execute(|conn| {
            let count_with = |status: JobStatus| -> rusqlite::Result<i64> {
                conn.query_row(
                    "SELECT COUNT(*) FROM jobs WHERE status = ?1",
                    [status.as_str()],
                    |row| row.get(0),
                )
            };

            Ok(DatabaseStats {
                total_jobs: conn.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?,
                completed_jobs: count_with(JobStatus::Completed)?,
                failed_jobs: count_with(JobStatus::Failed)?,
            })
        })
    }
}

/// Job counts by outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    pub total_jobs: i64,
    pub completed_jobs: i64,
    pub failed_jobs: i64,
}

impl DatabaseStats {
    // @returns: Jobs neither completed nor failed
    pub fn unfinished_jobs(&self) -> i64 {
        self.total_jobs - self.completed_jobs - self.failed_jobs
    }
}

impl fmt::Display for DatabaseStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} jobs ({} completed, {} failed, {} unfinished)",
            self.total_jobs,
            self.completed_jobs,
            self.failed_jobs,
            self.unfinished_jobs()
        )
    }
}
