/*!
 * Caption acquisition strategies.
 *
 * The controller tries these in order and keeps the first non-empty result:
 * 1. Download in the preferred languages (`en` appended as a last resort)
 * 2. Download English only, accepting any caption format
 * 3. Transcribe the downloaded video
 * 4. Synthesize fixed-interval placeholder segments from the duration
 *
 * A strategy never fails outward: problems are logged and reported as
 * "no result" so the next strategy gets its turn.
 */

use async_trait::async_trait;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::collaborators::{CaptionRequest, Transcriber, VideoSource};
use super::progress::ProgressReporter;
use crate::captions::{normalize_file_async, CaptionSegment};
use crate::database::models::JobStatus;

/// Language tried when the preferred ones yield nothing
pub const FALLBACK_LANGUAGE: &str = "en";

/// Format preference for the first download attempt
pub const PREFERRED_FORMATS: &str = "vtt/best";

/// Format preference for the relaxed single-language attempt
pub const RELAXED_FORMATS: &str = "vtt/ttml/srv3/srv2/srv1/json3/best";

/// Everything a strategy may draw on
#[derive(Debug, Clone)]
pub struct CaptionInput {
    pub url: String,
    /// Preferred caption languages, in order
    pub languages: Vec<String>,
    /// Where caption files are downloaded
    pub work_dir: PathBuf,
    /// The downloaded video
    pub video: PathBuf,
    /// Seconds, when the source reported one
    pub duration: Option<f64>,
}

/// One way of obtaining caption segments
#[async_trait]
pub trait CaptionStrategy: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Status the job is in while this strategy runs
    fn stage(&self) -> JobStatus;

    /// Segments, or `None` when this strategy produced nothing
    async fn produce(
        &self,
        input: &CaptionInput,
        progress: &ProgressReporter,
    ) -> Option<Vec<CaptionSegment>>;
}

/// Caption track download through the video source
pub struct DownloadedCaptions {
    name: &'static str,
    source: Arc<dyn VideoSource>,
    timeout: Duration,
    fallback_only: bool,
}

impl DownloadedCaptions {
    /// Preferred languages, `en` appended when missing
    pub fn preferred(source: Arc<dyn VideoSource>, timeout: Duration) -> Self {
        Self {
            name: "preferred-captions",
            source,
            timeout,
            fallback_only: false,
        }
    }

    /// English only with relaxed formats
    pub fn fallback_language(source: Arc<dyn VideoSource>, timeout: Duration) -> Self {
        Self {
            name: "fallback-captions",
            source,
            timeout,
            fallback_only: true,
        }
    }

    // @returns: The caption request this strategy issues for the input
    pub fn request_for(&self, input: &CaptionInput) -> CaptionRequest {
        if self.fallback_only {
            return CaptionRequest {
                languages: vec![FALLBACK_LANGUAGE.to_string()],
                formats: RELAXED_FORMATS.to_string(),
            };
        }

        let mut languages = input.languages.clone();
        if !languages.iter().any(|lang| lang == FALLBACK_LANGUAGE) {
            languages.push(FALLBACK_LANGUAGE.to_string());
        }
        CaptionRequest {
            languages,
            formats: PREFERRED_FORMATS.to_string(),
        }
    }
}

#[async_trait]
impl CaptionStrategy for DownloadedCaptions {
    fn name(&self) -> &'static str {
        self.name
    }

    fn stage(&self) -> JobStatus {
        JobStatus::DownloadingSubtitles
    }

    async fn produce(
        &self,
        input: &CaptionInput,
        _progress: &ProgressReporter,
    ) -> Option<Vec<CaptionSegment>> {
        let request = self.request_for(input);
        let download = self
            .source
            .download_captions(&input.url, &request, &input.work_dir);

        let path = match tokio::time::timeout(self.timeout, download).await {
            Ok(Ok(Some(path))) => path,
            Ok(Ok(None)) => {
                info!("No caption track for languages {:?}", request.languages);
                return None;
            }
            Ok(Err(e)) => {
                warn!("Caption download failed for {:?}: {:#}", request.languages, e);
                return None;
            }
            Err(_) => {
                warn!("Caption download timed out after {}s", self.timeout.as_secs());
                return None;
            }
        };

        match normalize_file_async(&path).await {
            Ok(segments) if !segments.is_empty() => Some(segments),
            Ok(_) => {
                warn!("Caption file {} held no usable cues", path.display());
                None
            }
            Err(e) => {
                warn!("Failed to read caption file: {:#}", e);
                None
            }
        }
    }
}

/// Speech transcription of the downloaded video
pub struct TranscriptionStrategy {
    transcriber: Option<Arc<dyn Transcriber>>,
    timeout: Duration,
}

impl TranscriptionStrategy {
    pub fn new(transcriber: Option<Arc<dyn Transcriber>>, timeout: Duration) -> Self {
        Self { transcriber, timeout }
    }
}

#[async_trait]
impl CaptionStrategy for TranscriptionStrategy {
    fn name(&self) -> &'static str {
        "transcription"
    }

    fn stage(&self) -> JobStatus {
        JobStatus::Transcribing
    }

    async fn produce(
        &self,
        input: &CaptionInput,
        progress: &ProgressReporter,
    ) -> Option<Vec<CaptionSegment>> {
        let Some(transcriber) = &self.transcriber else {
            info!("No transcriber configured, skipping transcription");
            return None;
        };

        let transcription = transcriber.transcribe(&input.video, progress);
        match tokio::time::timeout(self.timeout, transcription).await {
            Ok(Ok(segments)) if !segments.is_empty() => {
                info!("Transcription produced {} segments", segments.len());
                Some(segments)
            }
            Ok(Ok(_)) => {
                warn!("Transcription produced no segments");
                None
            }
            Ok(Err(e)) => {
                warn!("Transcription failed: {:#}", e);
                None
            }
            Err(_) => {
                warn!("Transcription timed out after {}s", self.timeout.as_secs());
                None
            }
        }
    }
}

/// Placeholder segments every `interval` seconds across the video
pub struct FixedIntervalStrategy {
    interval: f64,
}

impl FixedIntervalStrategy {
    pub fn new(interval: f64) -> Self {
        Self {
            interval: if interval > 0.0 { interval } else { 30.0 },
        }
    }

    /// Segments `[MM:SS - MM:SS]` covering `0..duration`; empty when the
    /// duration is unknown or not positive
    pub fn segments(&self, duration: Option<f64>) -> Vec<CaptionSegment> {
        let Some(duration) = duration.filter(|d| d.is_finite() && *d > 0.0) else {
            return Vec::new();
        };

        let mut segments = Vec::new();
        let mut start = 0.0;
        while start < duration {
            let end = (start + self.interval).min(duration);
            let text = format!(
                "[{} - {}]",
                CaptionSegment::format_clock(start),
                CaptionSegment::format_clock(end)
            );
            segments.push(CaptionSegment::new(start, end, text));
            start += self.interval;
        }
        segments
    }
}

#[async_trait]
impl CaptionStrategy for FixedIntervalStrategy {
    fn name(&self) -> &'static str {
        "fixed-interval"
    }

    fn stage(&self) -> JobStatus {
        JobStatus::Transcribing
    }

    async fn produce(
        &self,
        input: &CaptionInput,
        _progress: &ProgressReporter,
    ) -> Option<Vec<CaptionSegment>> {
        let segments = self.segments(input.duration);
        if segments.is_empty() {
            return None;
        }
        info!(
            "No captions available, generated {} placeholder segments every {}s",
            segments.len(),
            self.interval
        );
        Some(segments)
    }
}
