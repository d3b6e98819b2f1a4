/*!
 * Common test utilities for the tubeslides test suite
 */

#![allow(dead_code)]

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

use tubeslides::app_config::Config;
use tubeslides::database::models::{Job, JobConfig, JobStatus};
use tubeslides::pipeline::PipelineSettings;

// Re-export the mock collaborators module
pub mod mock_collaborators;

/// Three plain WebVTT cues, two seconds each
pub const SIMPLE_VTT: &str = "WEBVTT

00:00:00.000 --> 00:00:02.000
Hello there.

00:00:02.000 --> 00:00:04.000
This is a test.

00:00:04.000 --> 00:00:06.000
Goodbye now.
";

/// Word-incremental WebVTT as produced by automatic captions
pub const ROLLING_VTT: &str = "WEBVTT
Kind: captions
Language: en

00:00:00.000 --> 00:00:02.000 align:start position:0%
welcome<00:00:00.500><c> to</c><00:00:01.000><c> the</c><00:00:01.500><c> show</c>

00:00:02.000 --> 00:00:02.010 align:start position:0%
welcome to the show

00:00:02.010 --> 00:00:04.000 align:start position:0%
welcome to the show
today<00:00:02.500><c> we</c><00:00:03.000><c> talk</c><00:00:03.500><c> about</c><00:00:03.800><c> rust</c>
";

/// Short SRT file
pub const SIMPLE_SRT: &str = "1
00:00:01,000 --> 00:00:04,000
This is a test subtitle.

2
00:00:05,000 --> 00:00:09,000
It contains multiple entries.

3
00:00:10,000 --> 00:00:14,000
For testing purposes.
";

/// Route log output through the test harness; safe to call from every test
pub fn init_test_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file with the given content in the specified directory
pub fn create_test_file(dir: &Path, filename: &str, content: &str) -> Result<PathBuf> {
    let file_path = dir.join(filename);
    fs::write(&file_path, content)?;
    Ok(file_path)
}

/// Job options used across tests
pub fn job_config() -> JobConfig {
    JobConfig {
        video_quality: "best".to_string(),
        subtitle_langs: "en".to_string(),
        translate_target: String::new(),
        image_quality: 75,
    }
}

/// Pending job record as admission would create it
pub fn pending_job(id: i64, url: &str) -> Job {
    Job {
        id,
        url: url.to_string(),
        title: None,
        duration: None,
        thumbnail: None,
        status: JobStatus::Pending,
        progress: 0,
        message: "job created, waiting".to_string(),
        error: None,
        config: job_config(),
        slide_count: None,
        output_path: None,
        created_at: "2024-01-01T00:00:00+00:00".to_string(),
        updated_at: "2024-01-01T00:00:00+00:00".to_string(),
    }
}

/// Pipeline settings rooted in a scratch directory, with short budgets and
/// no pause between enhancement batches
pub fn test_settings(jobs_dir: &Path) -> PipelineSettings {
    let mut settings = PipelineSettings::default();
    settings.jobs_dir = jobs_dir.to_path_buf();
    settings.pipeline_timeout = Duration::from_secs(10);
    settings.metadata_timeout = Duration::from_secs(5);
    settings.video_timeout = Duration::from_secs(5);
    settings.caption_timeout = Duration::from_secs(5);
    settings.transcription_timeout = Duration::from_secs(5);
    settings.frame_timeout = Duration::from_secs(5);
    settings.enhance_timeout = Duration::from_secs(5);
    settings.outline_timeout = Duration::from_secs(5);
    settings.enhance_batch_delay = Duration::ZERO;
    settings
}

/// Application config rooted in a scratch directory
pub fn test_config(data_dir: &Path) -> Config {
    let mut config = Config::default();
    config.data_dir = data_dir.to_path_buf();
    config.jobs = tubeslides::app_config::JobDefaults {
        subtitle_langs: "en".to_string(),
        ..Default::default()
    };
    config.admission.allowed_hosts = vec!["youtube.com".to_string(), "youtu.be".to_string()];
    config.enhancer.batch_delay_ms = 0;
    config
}
