/*!
 * Pipeline controller: runs one job through every stage.
 *
 * The controller owns the job record for the duration of a run. Stage work
 * is spawned onto worker tasks that report progress ticks over a channel;
 * the coordinator applies those ticks, persists the job and publishes an
 * event after each change, so no other task ever writes the record.
 *
 * A run ends exactly once, in `Completed` or `Failed`, whether it finished,
 * hit an error, exceeded the wall-clock ceiling or was cancelled.
 */

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::captions::{
    CaptionInput, CaptionStrategy, DownloadedCaptions, FixedIntervalStrategy,
    TranscriptionStrategy,
};
use super::collaborators::{Collaborators, EnhanceTask, JobStore, Slide, SlideDeck};
use super::enhance::{enhance_segments, generate_outline, needs_punctuation, BatchOptions};
use super::frames::{extract_frames, optimize_frames};
use super::progress::{ProgressReporter, StageTick};
use super::stages::path_to;
use super::PipelineSettings;
use crate::captions::CaptionSegment;
use crate::database::models::{Job, JobStatus};
use crate::errors::PipelineError;
use crate::event_bus::{EventBus, StageEvent};

/// Longest title kept on the job record
pub const MAX_TITLE_CHARS: usize = 500;

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").unwrap());

/// Remove terminal escapes and control characters from an error message
pub fn sanitize_error(message: &str) -> String {
    let without_escapes = ANSI_ESCAPE.replace_all(message, "");
    let cleaned: String = without_escapes
        .chars()
        .filter_map(|c| match c {
            '\n' | '\r' | '\t' => Some(' '),
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
struct RunSummary {
    slide_count: usize,
    output_path: PathBuf,
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Time-box a collaborator call, classifying failures as tool errors or timeouts
async fn bounded<T, F>(operation: &'static str, limit: Duration, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, work).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(PipelineError::tool(operation, format!("{:#}", e)).into()),
        Err(_) => Err(PipelineError::timeout(operation, limit).into()),
    }
}

/// Resolves once the flag is raised; never resolves if the sender goes away
async fn cancelled(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sole writer of the job record during a run
struct Coordinator {
    job: Job,
    store: Arc<dyn JobStore>,
    bus: EventBus,
    ticks_tx: mpsc::UnboundedSender<StageTick>,
    ticks_rx: mpsc::UnboundedReceiver<StageTick>,
    /// Save still running when the last commit was interrupted
    pending_save: Option<JoinHandle<Result<()>>>,
}

impl Coordinator {
    fn new(job: Job, store: Arc<dyn JobStore>, bus: EventBus) -> Self {
        let (ticks_tx, ticks_rx) = mpsc::unbounded_channel();
        Self {
            job,
            store,
            bus,
            ticks_tx,
            ticks_rx,
            pending_save: None,
        }
    }

    fn reporter(&self, status: JobStatus, floor: u8, ceil: u8, label: &str) -> ProgressReporter {
        ProgressReporter::new(self.ticks_tx.clone(), status, floor, ceil, label)
    }

    /// Move to `status` (walking any intermediate statuses), raise progress
    /// and persist. A status behind the current one keeps the current status.
    async fn apply(&mut self, status: JobStatus, progress: u8, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        let path = match path_to(self.job.status, status) {
            Some(path) if !path.is_empty() => path,
            Some(_) => vec![self.job.status],
            None => {
                debug!(
                    "Job {}: keeping status {} for update tagged {}",
                    self.job.id, self.job.status, status
                );
                vec![self.job.status]
            }
        };

        for step in path {
            self.job.status = step;
            self.job.progress = self.job.progress.max(progress.min(100));
            self.job.message = message.clone();
            self.commit().await?;
        }
        Ok(())
    }

    async fn apply_tick(&mut self, tick: StageTick) -> Result<()> {
        self.apply(tick.status, tick.progress, tick.message).await
    }

    /// Persist and publish the current record. The save runs on its own task,
    /// so dropping this future mid-save leaves it in `pending_save`.
    async fn commit(&mut self) -> Result<()> {
        let store = self.store.clone();
        let snapshot = self.job.clone();
        let pending = self
            .pending_save
            .insert(tokio::spawn(async move { store.save(&snapshot).await }));
        let saved = pending.await;
        self.pending_save = None;

        saved
            .map_err(|e| PipelineError::tool("job store", e))?
            .map_err(|e| PipelineError::tool("job store", format!("{:#}", e)))?;
        self.bus.publish(self.job.id, &StageEvent::from_job(&self.job));
        Ok(())
    }

    /// Run `work` on a worker task, applying its progress ticks as they
    /// arrive. The worker is aborted if this future is dropped.
    async fn drive<T, F>(&mut self, work: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut handle = AbortOnDrop(tokio::spawn(work));

        loop {
            tokio::select! {
                joined = &mut handle.0 => {
                    while let Ok(tick) = self.ticks_rx.try_recv() {
                        self.apply_tick(tick).await?;
                    }
                    return joined.map_err(|e| PipelineError::tool("worker", e).into());
                }
                Some(tick) = self.ticks_rx.recv() => {
                    self.apply_tick(tick).await?;
                }
            }
        }
    }
}

/// Drives one job through the pipeline
pub struct PipelineController {
    job_id: i64,
    collaborators: Collaborators,
    bus: EventBus,
    settings: PipelineSettings,
    strategies: Vec<Arc<dyn CaptionStrategy>>,
}

impl PipelineController {
    /// Controller with the standard caption fallback chain
    pub fn new(
        job_id: i64,
        collaborators: Collaborators,
        bus: EventBus,
        settings: PipelineSettings,
    ) -> Self {
        let strategies: Vec<Arc<dyn CaptionStrategy>> = vec![
            Arc::new(DownloadedCaptions::preferred(
                collaborators.video.clone(),
                settings.caption_timeout,
            )),
            Arc::new(DownloadedCaptions::fallback_language(
                collaborators.video.clone(),
                settings.caption_timeout,
            )),
            Arc::new(TranscriptionStrategy::new(
                collaborators.transcriber.clone(),
                settings.transcription_timeout,
            )),
            Arc::new(FixedIntervalStrategy::new(settings.fallback_interval)),
        ];

        Self {
            job_id,
            collaborators,
            bus,
            settings,
            strategies,
        }
    }

    /// Replace the caption fallback chain
    pub fn with_caption_strategies(mut self, strategies: Vec<Arc<dyn CaptionStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Run the job to a terminal status and return the final record.
    ///
    /// Fails only when the job cannot be loaded; every failure after that is
    /// recorded on the job, which is then returned as `Failed`.
    pub async fn run(self, cancel: watch::Receiver<bool>) -> Result<Job> {
        let store = self.collaborators.store.clone();
        let mut job = store
            .get(self.job_id)
            .await
            .with_context(|| format!("Failed to load job {}", self.job_id))?
            .ok_or(PipelineError::NotFound(self.job_id))?;

        // Every run starts from the first stage
        job.status = JobStatus::Pending;
        job.progress = 0;
        job.error = None;
        job.slide_count = None;
        job.output_path = None;

        info!("Job {}: starting pipeline for {}", job.id, job.url);
        let mut coordinator = Coordinator::new(job, store, self.bus.clone());
        let ceiling = self.settings.pipeline_timeout;

        let outcome = tokio::select! {
            result = self.execute(&mut coordinator) => result,
            _ = tokio::time::sleep(ceiling) => {
                Err(PipelineError::timeout("pipeline", ceiling).into())
            }
            _ = cancelled(cancel) => {
                Err(PipelineError::Cancelled("job cancelled".to_string()).into())
            }
        };

        Ok(Self::finalize(coordinator, outcome).await)
    }

    /// Record the terminal status and publish the one terminal event
    async fn finalize(mut coordinator: Coordinator, outcome: Result<RunSummary>) -> Job {
        let job = &mut coordinator.job;
        match outcome {
            Ok(summary) => {
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.message = format!("done, {} slides", summary.slide_count);
                job.error = None;
                job.slide_count = Some(summary.slide_count as i64);
                job.output_path = Some(summary.output_path.to_string_lossy().into_owned());
                info!("Job {}: completed with {} slides", job.id, summary.slide_count);
            }
            Err(e) => {
                let message = sanitize_error(&format!("{:#}", e));
                error!("Job {}: failed: {}", job.id, message);
                job.status = JobStatus::Failed;
                job.message = message.clone();
                job.error = Some(message);
            }
        }

        // An interrupted save must land before the terminal one
        if let Some(pending) = coordinator.pending_save.take() {
            match pending.await {
                Ok(Err(e)) => warn!("Job {}: interrupted save failed: {:#}", coordinator.job.id, e),
                Err(e) => warn!("Job {}: interrupted save panicked: {}", coordinator.job.id, e),
                Ok(Ok(())) => {}
            }
        }

        if let Err(e) = coordinator.store.save(&coordinator.job).await {
            error!("Job {}: failed to persist final state: {:#}", coordinator.job.id, e);
        }
        coordinator
            .bus
            .publish(coordinator.job.id, &StageEvent::from_job(&coordinator.job));
        coordinator.job
    }

    async fn execute(&self, coord: &mut Coordinator) -> Result<RunSummary> {
        let settings = &self.settings;
        let job_id = coord.job.id;
        let url = coord.job.url.clone();
        let config = coord.job.config.clone();

        let job_dir = settings.jobs_dir.join(job_id.to_string());
        tokio::fs::create_dir_all(&job_dir)
            .await
            .with_context(|| format!("Failed to create job directory: {}", job_dir.display()))?;

        // Metadata
        coord.apply(JobStatus::FetchingMetadata, 5, "fetching video info").await?;
        let metadata = {
            let video = self.collaborators.video.clone();
            let url = url.clone();
            let limit = settings.metadata_timeout;
            coord
                .drive(async move { bounded("metadata fetch", limit, video.fetch_metadata(&url)).await })
                .await??
        };
        let title: String = metadata.title.chars().take(MAX_TITLE_CHARS).collect();
        coord.job.title = Some(title.clone());
        coord.job.duration = metadata.duration.map(|d| d.round() as i64);
        coord.job.thumbnail = metadata.thumbnail.clone().filter(|t| !t.is_empty());
        coord
            .apply(JobStatus::FetchingMetadata, 10, format!("fetched: {}", title))
            .await?;

        // Video
        coord.apply(JobStatus::DownloadingVideo, 12, "downloading video").await?;
        let video_path = {
            let video = self.collaborators.video.clone();
            let url = url.clone();
            let quality = config.video_quality.clone();
            let dir = job_dir.clone();
            let reporter = coord.reporter(JobStatus::DownloadingVideo, 12, 50, "downloading video");
            let limit = settings.video_timeout;
            coord
                .drive(async move {
                    bounded(
                        "video download",
                        limit,
                        video.download_video(&url, &quality, &dir, &reporter),
                    )
                    .await
                })
                .await??
        };
        coord.apply(JobStatus::DownloadingVideo, 50, "video downloaded").await?;

        // Captions
        coord.apply(JobStatus::DownloadingSubtitles, 52, "downloading captions").await?;
        let input = CaptionInput {
            url: url.clone(),
            languages: config.languages(),
            work_dir: job_dir.join("captions"),
            video: video_path.clone(),
            duration: metadata.duration,
        };
        tokio::fs::create_dir_all(&input.work_dir)
            .await
            .with_context(|| format!("Failed to create caption directory: {}", input.work_dir.display()))?;
        let mut segments = self.acquire_captions(coord, &input).await?;
        if coord.job.status == JobStatus::DownloadingSubtitles {
            coord.apply(JobStatus::ParsingSubtitles, 62, "parsing captions").await?;
        }
        coord
            .apply(
                JobStatus::ParsingSubtitles,
                65,
                format!("parsed {} segments", segments.len()),
            )
            .await?;

        // Translation or punctuation restoration
        coord.apply(JobStatus::Translating, 66, "preparing captions").await?;
        let enhancer = self.collaborators.enhancer.clone();
        let task = if segments.is_empty() {
            None
        } else if !config.translate_target.is_empty() {
            Some(EnhanceTask::Translate {
                target: config.translate_target.clone(),
            })
        } else if needs_punctuation(&segments) {
            Some(EnhanceTask::RestorePunctuation)
        } else {
            None
        };
        match (&enhancer, task) {
            (Some(enhancer), Some(task)) => {
                let message = match &task {
                    EnhanceTask::Translate { target } => format!("translating captions to {}", target),
                    _ => "restoring punctuation".to_string(),
                };
                coord.apply(JobStatus::Translating, 67, message).await?;
                let reporter = coord.reporter(JobStatus::Translating, 67, 70, "processing captions");
                let options = BatchOptions {
                    batch_size: settings.enhance_batch_size,
                    delay: settings.enhance_batch_delay,
                    timeout: settings.enhance_timeout,
                };
                let enhancer = enhancer.clone();
                let (enhanced, _) = coord
                    .drive(enhance_segments(enhancer, task, segments, options, reporter))
                    .await?;
                segments = enhanced;
            }
            (None, Some(EnhanceTask::Translate { target })) => {
                warn!("Job {}: no text enhancer configured, not translating to {}", job_id, target);
            }
            _ => {}
        }
        coord.apply(JobStatus::Translating, 70, "captions ready").await?;

        // Outline
        let mut outline = None;
        if let Some(enhancer) = enhancer.filter(|_| !segments.is_empty()) {
            coord.apply(JobStatus::GeneratingOutline, 71, "generating outline").await?;
            let segments = segments.clone();
            let title = title.clone();
            let duration = coord.job.duration.unwrap_or(0);
            let max_chars = settings.outline_max_chars;
            let limit = settings.outline_timeout;
            outline = coord
                .drive(async move {
                    generate_outline(enhancer, &segments, title, duration, max_chars, limit).await
                })
                .await?;
            let message = if outline.is_some() { "outline ready" } else { "outline skipped" };
            coord.apply(JobStatus::GeneratingOutline, 73, message).await?;
        }

        // Frames
        coord.apply(JobStatus::ExtractingFrames, 74, "extracting frames").await?;
        let timestamps: Vec<f64> = segments.iter().map(CaptionSegment::midpoint).collect();
        let reporter = coord.reporter(JobStatus::ExtractingFrames, 74, 85, "extracting frames");
        let frames = coord
            .drive(extract_frames(
                self.collaborators.frames.clone(),
                video_path,
                timestamps,
                settings.frame_timeout,
                reporter,
            ))
            .await?;
        let extracted = frames.iter().filter(|f| f.is_some()).count();
        coord
            .apply(
                JobStatus::ExtractingFrames,
                85,
                format!("extracted {}/{} frames", extracted, frames.len()),
            )
            .await?;

        // Optimization
        coord.apply(JobStatus::OptimizingImages, 87, "optimizing images").await?;
        let mut full = settings.full_image;
        full.quality = config.image_quality.clamp(1, 95);
        let reporter = coord.reporter(JobStatus::OptimizingImages, 87, 90, "optimizing images");
        let optimized = coord
            .drive(optimize_frames(
                self.collaborators.encoder.clone(),
                frames,
                full,
                settings.thumbnail,
                settings.frame_batch_width,
                reporter,
            ))
            .await?;
        coord.apply(JobStatus::OptimizingImages, 90, "images optimized").await?;

        // Deck
        coord.apply(JobStatus::BuildingSlides, 92, "building slides").await?;
        let slides: Vec<Slide> = segments
            .into_iter()
            .zip(optimized)
            .enumerate()
            .map(|(index, (segment, frame))| Slide {
                index,
                segment,
                image: frame.image,
                thumbnail: frame.thumbnail,
            })
            .collect();
        let slide_count = slides.len();
        let deck = SlideDeck {
            job_id,
            title,
            url,
            duration: coord.job.duration,
            outline,
            slides,
        };
        let output_path = {
            let builder = self.collaborators.builder.clone();
            let output_dir = job_dir.join("output");
            coord
                .drive(async move {
                    builder
                        .build(deck, &output_dir)
                        .await
                        .map_err(|e| anyhow::Error::from(PipelineError::tool("slide builder", format!("{:#}", e))))
                })
                .await??
        };

        Ok(RunSummary {
            slide_count,
            output_path,
        })
    }

    /// Try each caption strategy in turn; the first non-empty result wins.
    /// Transcription-stage strategies move the job into `Transcribing` first.
    async fn acquire_captions(
        &self,
        coord: &mut Coordinator,
        input: &CaptionInput,
    ) -> Result<Vec<CaptionSegment>> {
        for strategy in &self.strategies {
            let stage = strategy.stage();
            let reporter = if stage == JobStatus::Transcribing {
                if coord.job.status != JobStatus::Transcribing {
                    coord
                        .apply(JobStatus::DownloadingSubtitles, 60, "no captions found")
                        .await?;
                    coord.apply(JobStatus::ParsingSubtitles, 62, "parsing captions").await?;
                    coord.apply(JobStatus::Transcribing, 63, "transcribing audio").await?;
                }
                coord.reporter(JobStatus::Transcribing, 63, 65, "transcribing")
            } else {
                coord.reporter(stage, 52, 60, "downloading captions")
            };

            let name = strategy.name();
            let strategy = strategy.clone();
            let strategy_input = input.clone();
            let produced = coord
                .drive(async move { strategy.produce(&strategy_input, &reporter).await })
                .await?;

            match produced {
                Some(segments) if !segments.is_empty() => {
                    info!(
                        "Job {}: {} captions from {}",
                        coord.job.id,
                        segments.len(),
                        name
                    );
                    return Ok(segments);
                }
                _ => debug!("Job {}: caption strategy {} produced nothing", coord.job.id, name),
            }
        }

        warn!("Job {}: no captions could be obtained", coord.job.id);
        Ok(Vec::new())
    }
}
