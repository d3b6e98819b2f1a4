use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Root directory for the database and per-job work directories
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Defaults applied to submissions that do not override them
    #[serde(default)]
    pub jobs: JobDefaults,

    /// Admission gate settings
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Wall-clock budgets
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Event distribution settings
    #[serde(default)]
    pub events: EventConfig,

    /// Frame extraction and image optimization settings
    #[serde(default)]
    pub frames: FrameConfig,

    /// Text enhancement (translation, punctuation, outline) settings
    #[serde(default)]
    pub enhancer: EnhancerConfig,

    /// External executables
    #[serde(default)]
    pub tools: ToolConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Per-job defaults
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobDefaults {
    // @field: Download quality hint (best, 1080p, 720p, 480p)
    #[serde(default = "default_video_quality")]
    pub video_quality: String,

    // @field: Comma separated caption language preference
    #[serde(default = "default_subtitle_langs")]
    pub subtitle_langs: String,

    // @field: Translation target, empty disables translation
    #[serde(default)]
    pub translate_target: String,

    // @field: JPEG quality for full size slides (1-95)
    #[serde(default = "default_image_quality")]
    pub image_quality: u8,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            video_quality: default_video_quality(),
            subtitle_langs: default_subtitle_langs(),
            translate_target: String::new(),
            image_quality: default_image_quality(),
        }
    }
}

/// Admission gate configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AdmissionConfig {
    // @field: Maximum simultaneously non-terminal jobs
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    // @field: Accepted URL hosts (subdomains included), empty accepts any host
    #[serde(default = "default_allowed_hosts")]
    pub allowed_hosts: Vec<String>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            allowed_hosts: default_allowed_hosts(),
        }
    }
}

/// Timeouts in seconds. These are independent budgets, not nested ones.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_pipeline_timeout")]
    pub pipeline: u64,

    #[serde(default = "default_metadata_timeout")]
    pub metadata: u64,

    #[serde(default = "default_video_download_timeout")]
    pub video_download: u64,

    #[serde(default = "default_caption_download_timeout")]
    pub caption_download: u64,

    #[serde(default = "default_transcription_timeout")]
    pub transcription: u64,

    #[serde(default = "default_frame_extract_timeout")]
    pub frame_extract: u64,

    #[serde(default = "default_enhance_batch_timeout")]
    pub enhance_batch: u64,

    #[serde(default = "default_outline_timeout")]
    pub outline: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            pipeline: default_pipeline_timeout(),
            metadata: default_metadata_timeout(),
            video_download: default_video_download_timeout(),
            caption_download: default_caption_download_timeout(),
            transcription: default_transcription_timeout(),
            frame_extract: default_frame_extract_timeout(),
            enhance_batch: default_enhance_batch_timeout(),
            outline: default_outline_timeout(),
        }
    }
}

/// Event distribution configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EventConfig {
    // @field: Bounded mailbox size per subscriber
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    // @field: Idle interval before a heartbeat frame
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

/// Frame extraction and optimization configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FrameConfig {
    // @field: Frames encoded in parallel per batch
    #[serde(default = "default_batch_width")]
    pub batch_width: usize,

    // @field: Spacing of synthetic segments when no captions exist
    #[serde(default = "default_fallback_interval")]
    pub fallback_interval_secs: f64,

    #[serde(default = "default_full_max_width")]
    pub full_max_width: u32,

    #[serde(default = "default_full_max_height")]
    pub full_max_height: u32,

    #[serde(default = "default_thumb_width")]
    pub thumb_width: u32,

    #[serde(default = "default_thumb_height")]
    pub thumb_height: u32,

    #[serde(default = "default_thumbnail_quality")]
    pub thumbnail_quality: u8,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            batch_width: default_batch_width(),
            fallback_interval_secs: default_fallback_interval(),
            full_max_width: default_full_max_width(),
            full_max_height: default_full_max_height(),
            thumb_width: default_thumb_width(),
            thumb_height: default_thumb_height(),
            thumbnail_quality: default_thumbnail_quality(),
        }
    }
}

/// Chat completion endpoint used for translation, punctuation and outlines
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EnhancerConfig {
    // @field: API key, empty disables every enhancement
    #[serde(default = "String::new")]
    pub api_key: String,

    // @field: OpenAI compatible base URL
    #[serde(default = "default_enhancer_endpoint")]
    pub endpoint: String,

    // @field: Model name
    #[serde(default = "default_enhancer_model")]
    pub model: String,

    // @field: Captions per request
    #[serde(default = "default_enhance_batch_size")]
    pub batch_size: usize,

    // @field: Pause between batches
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    // @field: Caption characters sent for an outline
    #[serde(default = "default_outline_max_chars")]
    pub outline_max_chars: usize,
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: default_enhancer_endpoint(),
            model: default_enhancer_model(),
            batch_size: default_enhance_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            outline_max_chars: default_outline_max_chars(),
        }
    }
}

impl EnhancerConfig {
    // @returns: Whether an enhancer can be built from this config
    pub fn is_enabled(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// External executables
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ToolConfig {
    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: String,

    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    // @field: Cookie jar handed to yt-dlp, empty for none
    #[serde(default)]
    pub cookies_file: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: default_ytdlp_path(),
            ffmpeg_path: default_ffmpeg_path(),
            cookies_file: String::new(),
        }
    }
}

/// Log level configuration
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    // @returns: Matching log crate filter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_video_quality() -> String {
    "best".to_string()
}

fn default_subtitle_langs() -> String {
    "zh-Hans,zh,en".to_string()
}

fn default_image_quality() -> u8 {
    75
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_allowed_hosts() -> Vec<String> {
    vec![
        "youtube.com".to_string(),
        "youtu.be".to_string(),
        "youtube-nocookie.com".to_string(),
    ]
}

fn default_pipeline_timeout() -> u64 {
    4 * 3600
}

fn default_metadata_timeout() -> u64 {
    120
}

fn default_video_download_timeout() -> u64 {
    2 * 3600
}

fn default_caption_download_timeout() -> u64 {
    180
}

fn default_transcription_timeout() -> u64 {
    2 * 3600
}

fn default_frame_extract_timeout() -> u64 {
    30
}

fn default_enhance_batch_timeout() -> u64 {
    60
}

fn default_outline_timeout() -> u64 {
    90
}

fn default_mailbox_capacity() -> usize {
    100
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_batch_width() -> usize {
    8
}

fn default_fallback_interval() -> f64 {
    30.0
}

fn default_full_max_width() -> u32 {
    1280
}

fn default_full_max_height() -> u32 {
    720
}

fn default_thumb_width() -> u32 {
    240
}

fn default_thumb_height() -> u32 {
    135
}

fn default_thumbnail_quality() -> u8 {
    25
}

fn default_enhancer_endpoint() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_enhancer_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_enhance_batch_size() -> usize {
    50
}

fn default_batch_delay_ms() -> u64 {
    300
}

fn default_outline_max_chars() -> usize {
    3000
}

fn default_ytdlp_path() -> String {
    "yt-dlp".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

impl Config {
    /// Load a configuration file, writing the defaults there first when it is missing
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<(Self, bool)> {
        let path = path.as_ref();
        if path.exists() {
            let file = std::fs::File::open(path)
                .with_context(|| format!("Failed to open config file: {}", path.display()))?;
            let reader = std::io::BufReader::new(file);
            let config: Config = serde_json::from_reader(reader)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            return Ok((config, false));
        }

        let config = Config::default();
        config.save(path)?;
        Ok((config, true))
    }

    /// Write the configuration as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize config to JSON")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        if self.admission.max_concurrent_jobs == 0 {
            return Err(anyhow!("admission.max_concurrent_jobs must be at least 1"));
        }

        if !(1..=95).contains(&self.jobs.image_quality) {
            return Err(anyhow!(
                "jobs.image_quality must be between 1 and 95, got {}",
                self.jobs.image_quality
            ));
        }

        if !(1..=95).contains(&self.frames.thumbnail_quality) {
            return Err(anyhow!(
                "frames.thumbnail_quality must be between 1 and 95, got {}",
                self.frames.thumbnail_quality
            ));
        }

        if split_languages(&self.jobs.subtitle_langs).is_empty() {
            return Err(anyhow!("jobs.subtitle_langs must name at least one language"));
        }

        if self.events.mailbox_capacity == 0 {
            return Err(anyhow!("events.mailbox_capacity must be at least 1"));
        }

        if self.frames.batch_width == 0 || self.enhancer.batch_size == 0 {
            return Err(anyhow!("batch sizes must be at least 1"));
        }

        if self.frames.fallback_interval_secs <= 0.0 {
            return Err(anyhow!("frames.fallback_interval_secs must be positive"));
        }

        let t = &self.timeouts;
        for (name, secs) in [
            ("pipeline", t.pipeline),
            ("metadata", t.metadata),
            ("video_download", t.video_download),
            ("caption_download", t.caption_download),
            ("transcription", t.transcription),
            ("frame_extract", t.frame_extract),
            ("enhance_batch", t.enhance_batch),
            ("outline", t.outline),
        ] {
            if secs == 0 {
                return Err(anyhow!("timeouts.{} must be at least 1 second", name));
            }
        }

        if self.events.heartbeat_secs == 0 {
            return Err(anyhow!("events.heartbeat_secs must be at least 1"));
        }

        Ok(())
    }

    // @returns: SQLite database location
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db").join("tubeslides.db")
    }

    // @returns: Root of per-job work directories
    pub fn jobs_path(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }

    // @returns: Heartbeat interval as a Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.events.heartbeat_secs)
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: default_data_dir(),
            jobs: JobDefaults::default(),
            admission: AdmissionConfig::default(),
            timeouts: TimeoutConfig::default(),
            events: EventConfig::default(),
            frames: FrameConfig::default(),
            enhancer: EnhancerConfig::default(),
            tools: ToolConfig::default(),
            log_level: LogLevel::default(),
        }
    }
}

/// Split a comma separated language list, dropping blanks
pub fn split_languages(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .map(str::to_string)
        .collect()
}
