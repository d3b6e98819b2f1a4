/*!
 * Repository layer for job persistence.
 *
 * This module provides the high-level API over the `jobs` table and is the
 * concrete store behind both the pipeline (`JobStore`) and submission
 * admission (`AdmissionStore`).
 */

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::connection::DatabaseConnection;
use super::models::{Job, JobConfig, JobStatus, NewJob};
use crate::admission::AdmissionStore;
use crate::pipeline::collaborators::JobStore;

const JOB_COLUMNS: &str = r#"
    id, url, title, duration, thumbnail, status, progress, message, error,
    video_quality, subtitle_langs, translate_target, image_quality,
    slide_count, output_path, created_at, updated_at
"#;

// @returns: SQL placeholder list for the non-terminal statuses, quoted
fn active_status_list() -> String {
    JobStatus::active()
        .map(|status| format!("'{}'", status.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Repository for job records
#[derive(Clone)]
pub struct JobRepository {
    /// Database connection
    db: DatabaseConnection,
}

impl JobRepository {
    /// Create a new repository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a repository with an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let db = DatabaseConnection::new_in_memory()?;
        Ok(Self::new(db))
    }

    /// Underlying connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Insert a pending job and return the stored record
    pub async fn create(&self, new_job: &NewJob) -> Result<Job> {
        let new_job = new_job.clone();

        self.db
            .execute_async(move |conn| {
                let now = Utc::now().to_rfc3339();
                conn.execute(
                    r#"
                    INSERT INTO jobs (
                        url, status, progress, message,
                        video_quality, subtitle_langs, translate_target, image_quality,
                        created_at, updated_at
                    ) VALUES (?1, ?2, 0, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                    "#,
                    params![
                        new_job.url,
                        JobStatus::Pending.as_str(),
                        new_job.message,
                        new_job.config.video_quality,
                        new_job.config.subtitle_langs,
                        new_job.config.translate_target,
                        new_job.config.image_quality as i64,
                        now,
                    ],
                )?;

                let id = conn.last_insert_rowid();
                debug!("Created job {} for {}", id, new_job.url);

                Self::get_job_sync(conn, id)?
                    .ok_or_else(|| anyhow::anyhow!("Job {} vanished after insert", id))
            })
            .await
    }

    /// Get a job by ID
    pub async fn get_job(&self, id: i64) -> Result<Option<Job>> {
        self.db
            .execute_async(move |conn| Self::get_job_sync(conn, id))
            .await
    }

    fn get_job_sync(conn: &Connection, id: i64) -> Result<Option<Job>> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        let job = conn.query_row(&sql, [id], Self::map_job).optional()?;
        Ok(job)
    }

    /// Persist every mutable field of a job and bump its update time
    pub async fn save_job(&self, job: &Job) -> Result<()> {
        let job = job.clone();

        self.db
            .execute_async(move |conn| {
                let changed = conn.execute(
                    r#"
                    UPDATE jobs SET
                        title = ?2, duration = ?3, thumbnail = ?4, status = ?5,
                        progress = ?6, message = ?7, error = ?8,
                        slide_count = ?9, output_path = ?10, updated_at = ?11
                    WHERE id = ?1
                    "#,
                    params![
                        job.id,
                        job.title,
                        job.duration,
                        job.thumbnail,
                        job.status.as_str(),
                        job.progress as i64,
                        job.message,
                        job.error,
                        job.slide_count,
                        job.output_path,
                        Utc::now().to_rfc3339(),
                    ],
                )?;

                if changed == 0 {
                    return Err(anyhow::anyhow!("Job {} not found", job.id));
                }
                Ok(())
            })
            .await
    }

    /// Most recently created completed job for a URL
    pub async fn find_completed_by_url(&self, url: &str) -> Result<Option<Job>> {
        let url = url.to_string();

        self.db
            .execute_async(move |conn| {
                let sql = format!(
                    "SELECT {} FROM jobs WHERE url = ?1 AND status = ?2 \
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                    JOB_COLUMNS
                );
                let job = conn
                    .query_row(&sql, params![url, JobStatus::Completed.as_str()], Self::map_job)
                    .optional()?;
                Ok(job)
            })
            .await
    }

    /// Number of jobs in any non-terminal status
    pub async fn count_active(&self) -> Result<usize> {
        self.db
            .execute_async(|conn| {
                let sql = format!(
                    "SELECT COUNT(*) FROM jobs WHERE status IN ({})",
                    active_status_list()
                );
                let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
    }

    /// List jobs, newest first
    pub async fn list_jobs(&self, limit: usize, offset: usize) -> Result<Vec<Job>> {
        self.db
            .execute_async(move |conn| {
                let sql = format!(
                    "SELECT {} FROM jobs ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
                    JOB_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let jobs = stmt
                    .query_map(params![limit as i64, offset as i64], Self::map_job)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(jobs)
            })
            .await
    }

    /// Delete a job record, returning whether a row was removed
    pub async fn delete_job(&self, id: i64) -> Result<bool> {
        self.db
            .execute_async(move |conn| {
                let deleted = conn.execute("DELETE FROM jobs WHERE id = ?1", [id])?;
                Ok(deleted > 0)
            })
            .await
    }

    /// Mark every non-terminal job as failed, returning how many were changed.
    ///
    /// Runs are never resumed, so a job left mid-pipeline by a previous
    /// process can only end this way.
    pub async fn fail_orphaned_jobs(&self, message: &str) -> Result<usize> {
        let message = message.to_string();

        self.db
            .transaction_async(move |tx| {
                let sql = format!(
                    "UPDATE jobs SET status = ?1, message = ?2, error = ?2, updated_at = ?3 \
                     WHERE status IN ({})",
                    active_status_list()
                );
                let changed = tx.execute(
                    &sql,
                    params![JobStatus::Failed.as_str(), message, Utc::now().to_rfc3339()],
                )?;
                if changed > 0 {
                    warn!("Marked {} interrupted job(s) as failed", changed);
                }
                Ok(changed)
            })
            .await
    }

    fn map_job(row: &Row<'_>) -> rusqlite::Result<Job> {
        let progress: i64 = row.get(6)?;
        let image_quality: i64 = row.get(12)?;

        Ok(Job {
            id: row.get(0)?,
            url: row.get(1)?,
            title: row.get(2)?,
            duration: row.get(3)?,
            thumbnail: row.get(4)?,
            status: row
                .get::<_, String>(5)?
                .parse()
                .unwrap_or(JobStatus::Failed),
            progress: progress.clamp(0, 100) as u8,
            message: row.get(7)?,
            error: row.get(8)?,
            config: JobConfig {
                video_quality: row.get(9)?,
                subtitle_langs: row.get(10)?,
                translate_target: row.get(11)?,
                image_quality: image_quality.clamp(1, 95) as u8,
            },
            slide_count: row.get(13)?,
            output_path: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }
}

#[async_trait]
impl JobStore for JobRepository {
    async fn get(&self, id: i64) -> Result<Option<Job>> {
        self.get_job(id).await
    }

    async fn save(&self, job: &Job) -> Result<()> {
        self.save_job(job).await
    }
}

#[async_trait]
impl AdmissionStore for JobRepository {
    async fn find_completed_by_url(&self, url: &str) -> Result<Option<Job>> {
        JobRepository::find_completed_by_url(self, url).await
    }

    async fn count_active(&self) -> Result<usize> {
        JobRepository::count_active(self).await
    }

    async fn create(&self, new_job: &NewJob) -> Result<Job> {
        JobRepository::create(self, new_job).await
    }
}
