/*!
 * # tubeslides - turn online videos into captioned slide decks
 *
 * A job takes a video URL through a staged pipeline: metadata, download,
 * captions (downloaded, transcribed or synthesized), optional translation and
 * outline, frame extraction at caption midpoints, image optimization and deck
 * assembly. Progress is persisted after every change and fanned out to
 * subscribers as events.
 *
 * ## Architecture
 *
 * - `admission`: submission gate (validation, completed-result cache, concurrency ceiling)
 * - `pipeline`: the per-job state machine and its collaborator contracts
 * - `captions`: caption parsing and normalization
 * - `event_bus`: per-job event fan-out with heartbeats
 * - `database`: SQLite job store
 * - `tools`: yt-dlp and ffmpeg collaborators
 * - `providers`: chat completion client used for text enhancement
 * - `app_controller`: service façade tying everything together
 * - `app_config`: configuration management
 * - `errors`: error types
 */

// Global lints configuration
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

pub mod admission;
pub mod app_config;
pub mod app_controller;
pub mod captions;
pub mod database;
pub mod errors;
pub mod event_bus;
pub mod language_utils;
pub mod pipeline;
pub mod providers;
pub mod tools;

// Re-export main types for easier usage
pub use admission::{Admission, AdmissionController};
pub use app_config::Config;
pub use app_controller::Controller;
pub use captions::{normalize, CaptionSegment};
pub use database::models::{Job, JobConfig, JobStatus};
pub use errors::{AppError, PipelineError};
pub use event_bus::{EventBus, StageEvent, StreamFrame};
pub use pipeline::PipelineController;
