/*!
 * Scriptable fakes for every pipeline collaborator.
 *
 * None of them touch the network or spawn processes. Each records what it was
 * asked to do so tests can assert on call order and arguments.
 */

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tubeslides::captions::CaptionSegment;
use tubeslides::database::models::Job;
use tubeslides::pipeline::collaborators::{
    CaptionRequest, Collaborators, EncodeTarget, EnhanceTask, FrameSource, ImageEncoder,
    JobStore, SlideBuilder, SlideDeck, TextEnhancer, Transcriber, VideoMetadata, VideoSource,
};
use tubeslides::pipeline::ProgressReporter;

/// In-memory job store. Like the SQLite repository, a save runs on its own
/// task and completes even when the caller stops waiting.
#[derive(Default)]
pub struct MemoryStore {
    jobs: Arc<Mutex<HashMap<i64, Job>>>,
    saves: AtomicUsize,
    save_delay: Duration,
}

impl MemoryStore {
    pub fn with_job(job: Job) -> Arc<Self> {
        Self::with_slow_saves(job, Duration::ZERO)
    }

    /// Store whose saves of unfinished records take `delay` before the
    /// record is written; terminal records are written at once
    pub fn with_slow_saves(job: Job, delay: Duration) -> Arc<Self> {
        let store = Self {
            save_delay: delay,
            ..Self::default()
        };
        store.jobs.lock().insert(job.id, job);
        Arc::new(store)
    }

    pub fn job(&self, id: i64) -> Option<Job> {
        self.jobs.lock().get(&id).cloned()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn get(&self, id: i64) -> Result<Option<Job>> {
        Ok(self.job(id))
    }

    async fn save(&self, job: &Job) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.save_delay.is_zero() || job.status.is_terminal() {
            self.jobs.lock().insert(job.id, job.clone());
            return Ok(());
        }

        let jobs = self.jobs.clone();
        let job = job.clone();
        let delay = self.save_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            jobs.lock().insert(job.id, job);
        })
        .await?;
        Ok(())
    }
}

/// Video source with scripted metadata, download delay and caption replies
pub struct FakeVideoSource {
    pub title: String,
    pub duration: Option<f64>,
    pub fail_metadata: bool,
    pub video_delay: Duration,
    /// One reply per caption download call, `None` meaning no track
    caption_replies: Mutex<VecDeque<Option<String>>>,
    pub caption_requests: Mutex<Vec<CaptionRequest>>,
}

impl Default for FakeVideoSource {
    fn default() -> Self {
        Self {
            title: "A test video".to_string(),
            duration: Some(6.0),
            fail_metadata: false,
            video_delay: Duration::ZERO,
            caption_replies: Mutex::new(VecDeque::new()),
            caption_requests: Mutex::new(Vec::new()),
        }
    }
}

impl FakeVideoSource {
    /// Source whose first caption download returns `content`
    pub fn with_captions(content: &str) -> Self {
        let source = Self::default();
        source.push_caption_reply(Some(content));
        source
    }

    pub fn push_caption_reply(&self, content: Option<&str>) {
        self.caption_replies
            .lock()
            .push_back(content.map(str::to_string));
    }

    pub fn requested_languages(&self) -> Vec<Vec<String>> {
        self.caption_requests
            .lock()
            .iter()
            .map(|request| request.languages.clone())
            .collect()
    }
}

#[async_trait]
impl VideoSource for FakeVideoSource {
    async fn fetch_metadata(&self, _url: &str) -> Result<VideoMetadata> {
        if self.fail_metadata {
            return Err(anyhow!("\x1b[0;31mERROR:\x1b[0m Video unavailable"));
        }
        Ok(VideoMetadata {
            title: self.title.clone(),
            duration: self.duration,
            thumbnail: None,
            caption_tracks: vec!["en".to_string()],
        })
    }

    async fn download_video(
        &self,
        _url: &str,
        _quality: &str,
        dest_dir: &Path,
        progress: &ProgressReporter,
    ) -> Result<PathBuf> {
        if !self.video_delay.is_zero() {
            tokio::time::sleep(self.video_delay).await;
        }
        progress.report(50.0);
        progress.report(100.0);
        let path = dest_dir.join("video.mp4");
        tokio::fs::write(&path, b"not really a video").await?;
        Ok(path)
    }

    async fn download_captions(
        &self,
        _url: &str,
        request: &CaptionRequest,
        dest_dir: &Path,
    ) -> Result<Option<PathBuf>> {
        self.caption_requests.lock().push(request.clone());
        let reply = self.caption_replies.lock().pop_front().flatten();
        match reply {
            Some(content) => {
                let path = dest_dir.join(format!("original.{}.vtt", request.languages[0]));
                tokio::fs::write(&path, content).await?;
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }
}

/// Frames are the ASCII text `frame@<seconds>`
#[derive(Default)]
pub struct FakeFrameSource {
    /// Timestamps whose extraction fails
    pub failing: Vec<f64>,
    /// Timestamps whose extraction never finishes
    pub hanging: Vec<f64>,
    pub calls: Mutex<Vec<f64>>,
}

#[async_trait]
impl FrameSource for FakeFrameSource {
    async fn extract_frame(&self, _video: &Path, at_secs: f64) -> Result<Vec<u8>> {
        self.calls.lock().push(at_secs);
        if self.failing.iter().any(|t| (t - at_secs).abs() < 1e-6) {
            return Err(anyhow!("no frame at {}", at_secs));
        }
        if self.hanging.iter().any(|t| (t - at_secs).abs() < 1e-6) {
            std::future::pending::<()>().await;
        }
        Ok(format!("frame@{:.1}", at_secs).into_bytes())
    }
}

/// Prefixes each image with its target width. Earlier frames sleep longer,
/// so encodes of one batch complete in reverse order.
#[derive(Default)]
pub struct FakeEncoder {
    pub fail_thumbnails: bool,
}

impl ImageEncoder for FakeEncoder {
    fn encode(&self, image: &[u8], target: &EncodeTarget) -> Result<Vec<u8>> {
        let text = String::from_utf8_lossy(image).to_string();
        let at: f64 = text
            .trim_start_matches("frame@")
            .parse()
            .unwrap_or(0.0);
        std::thread::sleep(Duration::from_millis((40.0 - at.min(40.0)) as u64));

        if self.fail_thumbnails && target.max_width < 1000 {
            return Err(anyhow!("thumbnail encoder broke"));
        }
        Ok(format!("{}:{}", target.max_width, text).into_bytes())
    }
}

/// How the fake enhancer answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnhancerMode {
    /// Prefix every line with `[task]`
    Echo,
    /// Reply with one line fewer than asked
    WrongLength,
    /// Fail every call
    Fail,
    /// Never answer a per-line batch; outlines still succeed
    Hang,
}

pub struct FakeEnhancer {
    pub mode: EnhancerMode,
    pub outline: String,
    pub calls: Mutex<Vec<(EnhanceTask, usize)>>,
}

impl FakeEnhancer {
    pub fn new(mode: EnhancerMode) -> Self {
        Self {
            mode,
            outline: "## Topic\nTesting".to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn tasks(&self) -> Vec<EnhanceTask> {
        self.calls.lock().iter().map(|(task, _)| task.clone()).collect()
    }
}

#[async_trait]
impl TextEnhancer for FakeEnhancer {
    async fn process(&self, task: &EnhanceTask, batch: &[String]) -> Result<Vec<String>> {
        self.calls.lock().push((task.clone(), batch.len()));
        match (self.mode, task) {
            (EnhancerMode::Fail, _) => Err(anyhow!("model unavailable")),
            (_, EnhanceTask::Outline { .. }) => Ok(vec![self.outline.clone()]),
            (EnhancerMode::Hang, _) => std::future::pending().await,
            (EnhancerMode::WrongLength, _) => {
                Ok(batch.iter().skip(1).map(|line| format!("?{}", line)).collect())
            }
            (EnhancerMode::Echo, EnhanceTask::Translate { target }) => {
                Ok(batch.iter().map(|line| format!("[{}] {}", target, line)).collect())
            }
            (EnhancerMode::Echo, _) => Ok(batch.iter().map(|line| format!("{}。", line)).collect()),
        }
    }
}

/// Transcriber returning fixed segments
pub struct FakeTranscriber {
    pub segments: Vec<CaptionSegment>,
    pub calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn new(segments: Vec<CaptionSegment>) -> Self {
        Self {
            segments,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(
        &self,
        _video: &Path,
        progress: &ProgressReporter,
    ) -> Result<Vec<CaptionSegment>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        progress.report(100.0);
        Ok(self.segments.clone())
    }
}

/// Keeps the deck it was asked to build
#[derive(Default)]
pub struct RecordingBuilder {
    pub deck: Mutex<Option<SlideDeck>>,
}

#[async_trait]
impl SlideBuilder for RecordingBuilder {
    async fn build(&self, deck: SlideDeck, dest_dir: &Path) -> Result<PathBuf> {
        *self.deck.lock() = Some(deck);
        Ok(dest_dir.join("deck.json"))
    }
}

/// Every fake, kept around so tests can inspect them after a run
pub struct MockSet {
    pub video: Arc<FakeVideoSource>,
    pub frames: Arc<FakeFrameSource>,
    pub transcriber: Option<Arc<FakeTranscriber>>,
    pub enhancer: Option<Arc<FakeEnhancer>>,
    pub encoder: Arc<FakeEncoder>,
    pub builder: Arc<RecordingBuilder>,
}

impl MockSet {
    pub fn new(video: FakeVideoSource) -> Self {
        Self {
            video: Arc::new(video),
            frames: Arc::new(FakeFrameSource::default()),
            transcriber: None,
            enhancer: None,
            encoder: Arc::new(FakeEncoder::default()),
            builder: Arc::new(RecordingBuilder::default()),
        }
    }

    pub fn with_enhancer(mut self, enhancer: FakeEnhancer) -> Self {
        self.enhancer = Some(Arc::new(enhancer));
        self
    }

    pub fn with_transcriber(mut self, transcriber: FakeTranscriber) -> Self {
        self.transcriber = Some(Arc::new(transcriber));
        self
    }

    pub fn with_frames(mut self, frames: FakeFrameSource) -> Self {
        self.frames = Arc::new(frames);
        self
    }

    pub fn with_encoder(mut self, encoder: FakeEncoder) -> Self {
        self.encoder = Arc::new(encoder);
        self
    }

    /// Collaborators backed by these fakes and the given store
    pub fn collaborators(&self, store: Arc<dyn JobStore>) -> Collaborators {
        Collaborators {
            video: self.video.clone(),
            frames: self.frames.clone(),
            transcriber: self
                .transcriber
                .clone()
                .map(|t| t as Arc<dyn Transcriber>),
            enhancer: self.enhancer.clone().map(|e| e as Arc<dyn TextEnhancer>),
            encoder: self.encoder.clone(),
            builder: self.builder.clone(),
            store,
        }
    }

    pub fn deck(&self) -> Option<SlideDeck> {
        self.builder.deck.lock().clone()
    }
}
