/*!
 * Service façade over the job pipeline.
 *
 * The `Controller` wires configuration, persistence, the event bus and the
 * admission gate together and keeps track of the pipeline tasks it started,
 * so that jobs can be cancelled, streamed and cleaned up.
 */

use anyhow::{Context, Result};
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::admission::{Admission, AdmissionController, JobLauncher};
use crate::app_config::Config;
use crate::database::models::{Job, JobConfig, JobStatus};
use crate::database::connection::DatabaseStats;
use crate::database::{DatabaseConnection, JobRepository};
use crate::errors::PipelineError;
use crate::event_bus::{EventBus, StageEvent, StreamFrame};
use crate::pipeline::collaborators::{JobStore, TextEnhancer};
use crate::pipeline::slides::JsonDeckWriter;
use crate::pipeline::{Collaborators, PipelineController, PipelineSettings};
use crate::providers::ChatEnhancer;
use crate::tools::{Ffmpeg, YtDlp};

/// Message recorded on jobs a previous process left unfinished
pub const ORPHANED_MESSAGE: &str = "interrupted by a restart";

/// Message recorded on cancelled jobs
pub const CANCELLED_MESSAGE: &str = "job cancelled";

struct RunningJob {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Launches pipeline runs and remembers them until they finish
pub struct JobRunner {
    collaborators: Collaborators,
    bus: EventBus,
    settings: PipelineSettings,
    running: Arc<Mutex<HashMap<i64, RunningJob>>>,
}

impl JobRunner {
    pub fn new(collaborators: Collaborators, bus: EventBus, settings: PipelineSettings) -> Self {
        Self {
            collaborators,
            bus,
            settings,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    // @returns: Whether a pipeline task for the job is still alive
    pub fn is_running(&self, job_id: i64) -> bool {
        self.running.lock().contains_key(&job_id)
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    /// Raise the cancel flag of a running job and hand back its task
    fn cancel(&self, job_id: i64) -> Option<JoinHandle<()>> {
        let entry = self.running.lock().remove(&job_id)?;
        let _ = entry.cancel.send(true);
        Some(entry.handle)
    }

    /// Cancel every running job and wait for all of them to record it
    async fn cancel_all(&self) {
        let entries: Vec<(i64, RunningJob)> = self.running.lock().drain().collect();
        for (job_id, entry) in entries {
            let _ = entry.cancel.send(true);
            if let Err(e) = entry.handle.await {
                warn!("Job {}: pipeline task ended abnormally: {}", job_id, e);
            }
        }
    }
}

impl JobLauncher for JobRunner {
    fn launch(&self, job_id: i64) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let controller = PipelineController::new(
            job_id,
            self.collaborators.clone(),
            self.bus.clone(),
            self.settings.clone(),
        );
        let running = self.running.clone();

        // Registered under the lock so the task cannot deregister before it is inserted
        let mut guard = self.running.lock();
        let handle = tokio::spawn(async move {
            match controller.run(cancel_rx).await {
                Ok(job) => debug!("Job {}: pipeline ended as {}", job.id, job.status),
                Err(e) => warn!("Job {}: pipeline could not start: {:#}", job_id, e),
            }
            running.lock().remove(&job_id);
        });
        guard.insert(
            job_id,
            RunningJob {
                cancel: cancel_tx,
                handle,
            },
        );
    }
}

/// Main application controller
pub struct Controller {
    // @field: App configuration
    config: Config,
    repo: Arc<JobRepository>,
    bus: EventBus,
    runner: Arc<JobRunner>,
    admission: AdmissionController,
}

impl Controller {
    /// Open the database under the configured data dir, fail jobs left over
    /// from a previous process and wire the real tools
    pub async fn start(config: Config) -> Result<Self> {
        config.validate().context("Configuration validation failed")?;

        let db = DatabaseConnection::new(config.db_path())?;
        let repo = Arc::new(JobRepository::new(db));
        let collaborators = Self::default_collaborators(&config, repo.clone());
        Self::with_collaborators(config, repo, collaborators).await
    }

    /// Controller over an existing repository and collaborator set
    pub async fn with_collaborators(
        config: Config,
        repo: Arc<JobRepository>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let orphaned = repo.fail_orphaned_jobs(ORPHANED_MESSAGE).await?;
        if orphaned > 0 {
            info!("Failed {} job(s) left unfinished by a previous run", orphaned);
        }

        let bus = EventBus::new(config.events.mailbox_capacity, config.heartbeat_interval());
        let settings = PipelineSettings::from_config(&config);
        let runner = Arc::new(JobRunner::new(collaborators, bus.clone(), settings));
        let admission = AdmissionController::new(repo.clone(), runner.clone(), &config.admission);

        Ok(Self {
            config,
            repo,
            bus,
            runner,
            admission,
        })
    }

    /// yt-dlp, ffmpeg, the chat enhancer when configured and the JSON deck writer
    pub fn default_collaborators(config: &Config, store: Arc<JobRepository>) -> Collaborators {
        let ffmpeg = Arc::new(Ffmpeg::new(&config.tools.ffmpeg_path));
        let request_timeout = Duration::from_secs(
            config.timeouts.enhance_batch.max(config.timeouts.outline),
        );
        let enhancer = ChatEnhancer::from_config(&config.enhancer, request_timeout)
            .map(|enhancer| Arc::new(enhancer) as Arc<dyn TextEnhancer>);
        if enhancer.is_none() {
            info!("No enhancer API key configured, translation and outlines are disabled");
        }

        Collaborators {
            video: Arc::new(YtDlp::from_config(&config.tools)),
            frames: ffmpeg.clone(),
            transcriber: None,
            enhancer,
            encoder: ffmpeg,
            builder: Arc::new(JsonDeckWriter::new()),
            store: store as Arc<dyn JobStore>,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    /// Per-job options from the configured defaults
    pub fn default_job_config(&self) -> JobConfig {
        JobConfig::from(&self.config.jobs)
    }

    /// Submit a URL; accepted jobs start running in the background
    pub async fn submit(&self, url: &str, config: JobConfig) -> Result<Admission> {
        self.admission.submit(url, config).await
    }

    /// Fetch a job, `PipelineError::NotFound` when it does not exist
    pub async fn job(&self, id: i64) -> Result<Job> {
        self.repo
            .get_job(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(id).into())
    }

    /// Jobs, newest first
    pub async fn list_jobs(&self, limit: usize, offset: usize) -> Result<Vec<Job>> {
        self.repo.list_jobs(limit, offset).await
    }

    /// Job counts by outcome
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let db = self.repo.connection().clone();
        tokio::task::spawn_blocking(move || db.stats())
            .await
            .context("Stats task panicked")?
    }

    /// Delete a finished job and its work directory
    pub async fn delete_job(&self, id: i64) -> Result<()> {
        let job = self.job(id).await?;
        if !job.is_terminal() || self.runner.is_running(id) {
            return Err(PipelineError::Validation(format!(
                "job {} is still running, cancel it first",
                id
            ))
            .into());
        }

        if !self.repo.delete_job(id).await? {
            return Err(PipelineError::NotFound(id).into());
        }

        let work_dir = self.config.jobs_path().join(id.to_string());
        match tokio::fs::remove_dir_all(&work_dir).await {
            Ok(()) => debug!("Removed {}", work_dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", work_dir.display(), e),
        }
        info!("Deleted job {}", id);
        Ok(())
    }

    /// Stop a job; it ends `Failed` with "job cancelled"
    pub async fn cancel(&self, id: i64) -> Result<Job> {
        let job = self.job(id).await?;
        if job.is_terminal() {
            return Ok(job);
        }

        if let Some(handle) = self.runner.cancel(id) {
            if let Err(e) = handle.await {
                warn!("Job {}: pipeline task ended abnormally: {}", id, e);
            }
            return self.job(id).await;
        }

        // Not running in this process, so nothing else writes the record
        let mut job = self.job(id).await?;
        if job.is_terminal() {
            return Ok(job);
        }
        job.status = JobStatus::Failed;
        job.message = CANCELLED_MESSAGE.to_string();
        job.error = Some(CANCELLED_MESSAGE.to_string());
        self.repo.save_job(&job).await?;
        self.bus.publish(job.id, &StageEvent::from_job(&job));
        Ok(job)
    }

    /// Event stream of a job. A finished job yields its final state once.
    pub async fn stream(&self, id: i64) -> Result<BoxStream<'static, StreamFrame>> {
        // Subscribe before reading so a terminal event cannot slip in between
        let live = self.bus.stream(id);
        let job = self.job(id).await?;

        if job.is_terminal() {
            let last = StreamFrame::Event(StageEvent::from_job(&job));
            return Ok(stream::once(async move { last }).boxed());
        }
        Ok(live.boxed())
    }

    /// Cancel and await every running job
    pub async fn shutdown(&self) {
        let running = self.runner.running_count();
        if running > 0 {
            info!("Stopping {} running job(s)", running);
        }
        self.runner.cancel_all().await;
    }
}
