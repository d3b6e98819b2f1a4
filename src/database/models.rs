/*!
 * Database entity models.
 *
 * These structures map directly to the `jobs` table and provide
 * type-safe access to persisted data.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Job status, a closed set of pipeline stages plus two terminal states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, not started
    Pending,
    FetchingMetadata,
    DownloadingVideo,
    DownloadingSubtitles,
    ParsingSubtitles,
    /// Speech transcription, only entered when no captions were obtained
    Transcribing,
    /// Translation or punctuation restoration
    Translating,
    /// Only entered when a text enhancer is configured
    GeneratingOutline,
    ExtractingFrames,
    OptimizingImages,
    BuildingSlides,
    /// Finished with an output
    Completed,
    /// Finished with an error
    Failed,
}

impl JobStatus {
    /// Every status, in pipeline order
    pub const ALL: [JobStatus; 13] = [
        JobStatus::Pending,
        JobStatus::FetchingMetadata,
        JobStatus::DownloadingVideo,
        JobStatus::DownloadingSubtitles,
        JobStatus::ParsingSubtitles,
        JobStatus::Transcribing,
        JobStatus::Translating,
        JobStatus::GeneratingOutline,
        JobStatus::ExtractingFrames,
        JobStatus::OptimizingImages,
        JobStatus::BuildingSlides,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    // @returns: Whether no transition leaves this status
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Statuses counted against the admission ceiling
    pub fn active() -> impl Iterator<Item = JobStatus> {
        Self::ALL.into_iter().filter(|status| !status.is_terminal())
    }

    // @returns: Stable snake_case name stored in the database
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::FetchingMetadata => "fetching_metadata",
            JobStatus::DownloadingVideo => "downloading_video",
            JobStatus::DownloadingSubtitles => "downloading_subtitles",
            JobStatus::ParsingSubtitles => "parsing_subtitles",
            JobStatus::Transcribing => "transcribing",
            JobStatus::Translating => "translating",
            JobStatus::GeneratingOutline => "generating_outline",
            JobStatus::ExtractingFrames => "extracting_frames",
            JobStatus::OptimizingImages => "optimizing_images",
            JobStatus::BuildingSlides => "building_slides",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| anyhow::anyhow!("Invalid job status: {}", s))
    }
}

/// Per-job options, fixed once the job is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Download quality hint
    pub video_quality: String,
    /// Comma separated caption language preference
    pub subtitle_langs: String,
    /// Translation target, empty for none
    pub translate_target: String,
    /// JPEG quality of full size slides (1-95)
    pub image_quality: u8,
}

impl JobConfig {
    // @returns: Caption languages in preference order
    pub fn languages(&self) -> Vec<String> {
        crate::app_config::split_languages(&self.subtitle_langs)
    }
}

impl From<&crate::app_config::JobDefaults> for JobConfig {
    fn from(defaults: &crate::app_config::JobDefaults) -> Self {
        Self {
            video_quality: defaults.video_quality.clone(),
            subtitle_langs: defaults.subtitle_langs.clone(),
            translate_target: defaults.translate_target.clone(),
            image_quality: defaults.image_quality,
        }
    }
}

/// Persisted job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    /// Source video URL
    pub url: String,
    pub title: Option<String>,
    /// Duration in seconds
    pub duration: Option<i64>,
    /// Thumbnail URL reported by the source
    pub thumbnail: Option<String>,
    pub status: JobStatus,
    /// 0-100, non-decreasing within a run
    pub progress: u8,
    /// Current activity, human readable
    pub message: String,
    /// Set only on failure
    pub error: Option<String>,
    /// Configuration snapshot
    pub config: JobConfig,
    pub slide_count: Option<i64>,
    pub output_path: Option<String>,
    /// RFC 3339 creation time
    pub created_at: String,
    /// RFC 3339 last update time
    pub updated_at: String,
}

impl Job {
    // @returns: Whether the job is finished
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Data needed to insert a job
#[derive(Debug, Clone)]
pub struct NewJob {
    pub url: String,
    pub config: JobConfig,
    pub message: String,
}
