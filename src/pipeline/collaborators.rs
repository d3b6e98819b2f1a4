/*!
 * Contracts for everything the pipeline delegates.
 *
 * Downloading, frame grabbing, transcription, text enhancement, image
 * encoding, deck assembly and persistence are all behind these traits so the
 * controller can be driven by real tools or by test doubles.
 */

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::progress::ProgressReporter;
use crate::captions::CaptionSegment;
use crate::database::models::Job;

/// Facts about a video reported by its source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    /// Seconds, when known
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    /// Language codes of caption tracks the source advertises
    pub caption_tracks: Vec<String>,
}

/// What a caption download should look for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionRequest {
    /// Languages in preference order
    pub languages: Vec<String>,
    /// Format preference, `/` separated (e.g. `vtt/best`)
    pub formats: String,
}

/// Source of videos and their captions
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Fetch title, duration, thumbnail and caption tracks
    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata>;

    /// Download the video into `dest_dir`, reporting percent complete
    async fn download_video(
        &self,
        url: &str,
        quality: &str,
        dest_dir: &Path,
        progress: &ProgressReporter,
    ) -> Result<PathBuf>;

    /// Download a caption file into `dest_dir`; `None` when no track matched
    async fn download_captions(
        &self,
        url: &str,
        request: &CaptionRequest,
        dest_dir: &Path,
    ) -> Result<Option<PathBuf>>;
}

/// Grabs still frames out of a video file
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Encoded image of the frame shown at `at_secs`
    async fn extract_frame(&self, video: &Path, at_secs: f64) -> Result<Vec<u8>>;
}

/// Speech to text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Timed segments for the spoken audio; empty when nothing was recognized
    async fn transcribe(&self, video: &Path, progress: &ProgressReporter)
        -> Result<Vec<CaptionSegment>>;
}

/// Kind of text processing requested from a `TextEnhancer`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnhanceTask {
    /// Translate every line into the target language
    Translate { target: String },
    /// Add punctuation to unpunctuated lines
    RestorePunctuation,
    /// Summarize the given transcript into one outline
    Outline { title: String, duration_secs: i64 },
}

/// Language model backed text processing
#[async_trait]
pub trait TextEnhancer: Send + Sync {
    /// Process a batch of lines; the reply should have one entry per input
    /// line (a single entry for `Outline`)
    async fn process(&self, task: &EnhanceTask, batch: &[String]) -> Result<Vec<String>>;
}

/// Target size and quality of an encoded image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeTarget {
    pub max_width: u32,
    pub max_height: u32,
    /// JPEG quality, 1-95
    pub quality: u8,
}

/// Compresses frames; called from blocking worker threads
pub trait ImageEncoder: Send + Sync {
    fn encode(&self, image: &[u8], target: &EncodeTarget) -> Result<Vec<u8>>;
}

/// One slide: a caption segment with its images
#[derive(Debug, Clone, PartialEq)]
pub struct Slide {
    pub index: usize,
    pub segment: CaptionSegment,
    /// Full size image, absent when extraction or encoding failed
    pub image: Option<Vec<u8>>,
    pub thumbnail: Option<Vec<u8>>,
}

/// Everything a deck is assembled from
#[derive(Debug, Clone, PartialEq)]
pub struct SlideDeck {
    pub job_id: i64,
    pub title: String,
    pub url: String,
    pub duration: Option<i64>,
    pub outline: Option<String>,
    pub slides: Vec<Slide>,
}

/// Writes the final output artifact
#[async_trait]
pub trait SlideBuilder: Send + Sync {
    /// Persist the deck under `dest_dir`, returning the output path
    async fn build(&self, deck: SlideDeck, dest_dir: &Path) -> Result<PathBuf>;
}

/// Persistence boundary of the pipeline
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<Job>>;
    async fn save(&self, job: &Job) -> Result<()>;
}

/// The set of collaborators one pipeline run works with
#[derive(Clone)]
pub struct Collaborators {
    pub video: Arc<dyn VideoSource>,
    pub frames: Arc<dyn FrameSource>,
    /// Absent when no speech recognition is available
    pub transcriber: Option<Arc<dyn Transcriber>>,
    /// Absent when no language model is configured
    pub enhancer: Option<Arc<dyn TextEnhancer>>,
    pub encoder: Arc<dyn ImageEncoder>,
    pub builder: Arc<dyn SlideBuilder>,
    pub store: Arc<dyn JobStore>,
}
