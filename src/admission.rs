/*!
 * Submission admission.
 *
 * A submission is validated, then answered from the completed-job cache
 * when the same URL already produced a deck, refused when the number of
 * active jobs is at the ceiling, and otherwise recorded as a new pending job
 * and handed to the launcher. The active count is a plain read, so a burst
 * of concurrent submissions may briefly overshoot the ceiling.
 */

use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;
use url::Url;

use crate::app_config::{split_languages, AdmissionConfig};
use crate::database::models::{Job, JobConfig, NewJob};
use crate::errors::PipelineError;

/// Message stored on freshly accepted jobs
pub const ACCEPTED_MESSAGE: &str = "job created, waiting";

/// Job queries admission depends on
#[async_trait]
pub trait AdmissionStore: Send + Sync {
    /// Newest completed job for the URL
    async fn find_completed_by_url(&self, url: &str) -> Result<Option<Job>>;
    /// Jobs in any non-terminal status
    async fn count_active(&self) -> Result<usize>;
    async fn create(&self, new_job: &NewJob) -> Result<Job>;
}

/// Starts the pipeline for an accepted job without waiting for it
pub trait JobLauncher: Send + Sync {
    fn launch(&self, job_id: i64);
}

/// Outcome of a submission
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// A previous run already completed for this URL
    Cached(Job),
    /// A new job was created and launched
    Accepted(Job),
    /// Too many active jobs; retry later
    Overloaded { active: usize, ceiling: usize },
}

impl Admission {
    // @returns: The job answering the submission, if any
    pub fn job(&self) -> Option<&Job> {
        match self {
            Admission::Cached(job) | Admission::Accepted(job) => Some(job),
            Admission::Overloaded { .. } => None,
        }
    }

    /// The job, or `PipelineError::Overloaded`
    pub fn into_job(self) -> Result<Job, PipelineError> {
        match self {
            Admission::Cached(job) | Admission::Accepted(job) => Ok(job),
            Admission::Overloaded { active, ceiling } => {
                Err(PipelineError::Overloaded { active, ceiling })
            }
        }
    }
}

/// Check that `raw` is an http(s) URL on an allowed host (or a subdomain of
/// one) and return it trimmed. An empty host list allows any host.
pub fn validate_url(raw: &str, allowed_hosts: &[String]) -> Result<String, PipelineError> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed)
        .map_err(|e| PipelineError::Validation(format!("invalid URL '{}': {}", trimmed, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PipelineError::Validation(format!(
            "unsupported URL scheme '{}'",
            parsed.scheme()
        )));
    }

    let host = parsed
        .host_str()
        .map(str::to_lowercase)
        .ok_or_else(|| PipelineError::Validation(format!("URL '{}' has no host", trimmed)))?;

    let allowed = allowed_hosts.is_empty()
        || allowed_hosts.iter().any(|allowed| {
            let allowed = allowed.trim().to_lowercase();
            host == allowed || host.ends_with(&format!(".{}", allowed))
        });
    if !allowed {
        return Err(PipelineError::Validation(format!(
            "host '{}' is not a supported video site",
            host
        )));
    }

    Ok(trimmed.to_string())
}

/// Check the per-job options
pub fn validate_job_config(config: &JobConfig) -> Result<(), PipelineError> {
    if !(1..=95).contains(&config.image_quality) {
        return Err(PipelineError::Validation(format!(
            "image quality must be between 1 and 95, got {}",
            config.image_quality
        )));
    }
    if split_languages(&config.subtitle_langs).is_empty() {
        return Err(PipelineError::Validation(
            "at least one caption language is required".to_string(),
        ));
    }
    Ok(())
}

/// Gate in front of the pipeline
#[derive(Clone)]
pub struct AdmissionController {
    store: Arc<dyn AdmissionStore>,
    launcher: Arc<dyn JobLauncher>,
    ceiling: usize,
    allowed_hosts: Vec<String>,
}

impl AdmissionController {
    pub fn new(
        store: Arc<dyn AdmissionStore>,
        launcher: Arc<dyn JobLauncher>,
        config: &AdmissionConfig,
    ) -> Self {
        Self {
            store,
            launcher,
            ceiling: config.max_concurrent_jobs,
            allowed_hosts: config.allowed_hosts.clone(),
        }
    }

    /// Configured ceiling of simultaneously active jobs
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Validate and admit a submission.
    ///
    /// Validation problems come back as `PipelineError::Validation` inside the
    /// error; store failures propagate as they are.
    pub async fn submit(&self, url: &str, config: JobConfig) -> Result<Admission> {
        let url = validate_url(url, &self.allowed_hosts)?;
        validate_job_config(&config)?;

        if let Some(existing) = self.store.find_completed_by_url(&url).await? {
            info!("Returning completed job {} for {}", existing.id, url);
            return Ok(Admission::Cached(existing));
        }

        let active = self.store.count_active().await?;
        if active >= self.ceiling {
            warn!(
                "Refusing submission for {}: {} active jobs, ceiling {}",
                url, active, self.ceiling
            );
            return Ok(Admission::Overloaded {
                active,
                ceiling: self.ceiling,
            });
        }

        let job = self
            .store
            .create(&NewJob {
                url,
                config,
                message: ACCEPTED_MESSAGE.to_string(),
            })
            .await?;
        info!("Accepted job {} for {}", job.id, job.url);
        self.launcher.launch(job.id);

        Ok(Admission::Accepted(job))
    }
}
