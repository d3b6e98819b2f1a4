/*!
 * Job pipeline: drives one job from metadata fetch to a finished slide deck.
 *
 * Stages, in order:
 * 1. Metadata fetch
 * 2. Video download
 * 3. Caption acquisition (with fallbacks) and normalization
 * 4. Translation or punctuation restoration, then an optional outline
 * 5. Frame extraction at segment midpoints
 * 6. Image optimization in fixed-width batches
 * 7. Deck assembly
 *
 * The `controller` is the only writer of job state during a run; stage work
 * reports back to it through progress ticks.
 */

pub mod captions;
pub mod collaborators;
pub mod controller;
pub mod enhance;
pub mod frames;
pub mod progress;
pub mod slides;
pub mod stages;

use std::path::PathBuf;
use std::time::Duration;

use crate::app_config::Config;
use collaborators::EncodeTarget;

pub use captions::{CaptionInput, CaptionStrategy};
pub use collaborators::Collaborators;
pub use controller::PipelineController;
pub use progress::{ProgressReporter, StageTick};

/// Tunables of one pipeline run, derived from the application config
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Root under which each job gets its own work directory
    pub jobs_dir: PathBuf,
    /// Whole-run wall clock ceiling
    pub pipeline_timeout: Duration,
    pub metadata_timeout: Duration,
    pub video_timeout: Duration,
    pub caption_timeout: Duration,
    pub transcription_timeout: Duration,
    /// Per extracted frame
    pub frame_timeout: Duration,
    /// Per enhancement batch
    pub enhance_timeout: Duration,
    pub outline_timeout: Duration,
    /// Frames encoded concurrently per optimization batch
    pub frame_batch_width: usize,
    /// Spacing of synthetic segments when no captions exist
    pub fallback_interval: f64,
    pub full_image: EncodeTarget,
    pub thumbnail: EncodeTarget,
    pub enhance_batch_size: usize,
    pub enhance_batch_delay: Duration,
    pub outline_max_chars: usize,
}

impl PipelineSettings {
    /// Settings for a config; `full_image.quality` is replaced per job
    pub fn from_config(config: &Config) -> Self {
        let timeouts = &config.timeouts;
        let frames = &config.frames;

        Self {
            jobs_dir: config.jobs_path(),
            pipeline_timeout: Duration::from_secs(timeouts.pipeline),
            metadata_timeout: Duration::from_secs(timeouts.metadata),
            video_timeout: Duration::from_secs(timeouts.video_download),
            caption_timeout: Duration::from_secs(timeouts.caption_download),
            transcription_timeout: Duration::from_secs(timeouts.transcription),
            frame_timeout: Duration::from_secs(timeouts.frame_extract),
            enhance_timeout: Duration::from_secs(timeouts.enhance_batch),
            outline_timeout: Duration::from_secs(timeouts.outline),
            frame_batch_width: frames.batch_width.max(1),
            fallback_interval: frames.fallback_interval_secs,
            full_image: EncodeTarget {
                max_width: frames.full_max_width,
                max_height: frames.full_max_height,
                quality: config.jobs.image_quality,
            },
            thumbnail: EncodeTarget {
                max_width: frames.thumb_width,
                max_height: frames.thumb_height,
                quality: frames.thumbnail_quality,
            },
            enhance_batch_size: config.enhancer.batch_size.max(1),
            enhance_batch_delay: Duration::from_millis(config.enhancer.batch_delay_ms),
            outline_max_chars: config.enhancer.outline_max_chars,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
