/*!
 * yt-dlp backed video source.
 *
 * Metadata comes from `--dump-single-json`, download progress from the
 * `[download]  NN.N%` lines yt-dlp prints with `--newline`.
 */

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::app_config::ToolConfig;
use crate::pipeline::collaborators::{CaptionRequest, VideoMetadata, VideoSource};
use crate::pipeline::progress::ProgressReporter;

static DOWNLOAD_PROGRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[download\]\s+(\d+(?:\.\d+)?)%").unwrap());

/// Base name of the downloaded video file
const VIDEO_STEM: &str = "video";

/// Base name of downloaded caption files
const CAPTION_STEM: &str = "original";

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "avi"];
const CAPTION_EXTENSIONS: &[&str] = &["vtt", "srt"];

/// Runs the yt-dlp binary
#[derive(Debug, Clone)]
pub struct YtDlp {
    path: String,
    ffmpeg_path: String,
    cookies_file: Option<PathBuf>,
}

impl YtDlp {
    pub fn new(path: impl Into<String>, ffmpeg_path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ffmpeg_path: ffmpeg_path.into(),
            cookies_file: None,
        }
    }

    /// Instance for the configured tool paths
    pub fn from_config(tools: &ToolConfig) -> Self {
        let mut ytdlp = Self::new(&tools.ytdlp_path, &tools.ffmpeg_path);
        if !tools.cookies_file.is_empty() {
            ytdlp.cookies_file = Some(PathBuf::from(&tools.cookies_file));
        }
        ytdlp
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.path);
        command
            .args(["--no-color", "--no-warnings", "--socket-timeout", "30"])
            .args(["--retries", "15", "--fragment-retries", "15"])
            .arg("--ffmpeg-location")
            .arg(&self.ffmpeg_path)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if let Some(cookies) = self.cookies_file.as_ref().filter(|path| path.exists()) {
            command.arg("--cookies").arg(cookies);
        }
        command
    }

    async fn run(&self, mut command: Command, what: &str) -> Result<Vec<u8>> {
        let output = command
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", self.path))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("yt-dlp {} failed: {}", what, stderr.trim()));
        }
        Ok(output.stdout)
    }
}

/// yt-dlp format selector for a quality hint; unknown hints mean `best`
pub fn format_selector(quality: &str) -> &'static str {
    match quality {
        "1080p" => "bestvideo[height<=1080][ext=mp4]+bestaudio[ext=m4a]/best[height<=1080]",
        "720p" => "bestvideo[height<=720][ext=mp4]+bestaudio[ext=m4a]/best[height<=720]",
        "480p" => "bestvideo[height<=480][ext=mp4]+bestaudio[ext=m4a]/best[height<=480]",
        _ => "bestvideo[ext=mp4]+bestaudio[ext=m4a]/bestvideo+bestaudio/best",
    }
}

// @returns: Download percentage carried by a yt-dlp progress line
pub fn parse_progress(line: &str) -> Option<f64> {
    DOWNLOAD_PROGRESS
        .captures(line.trim())
        .and_then(|caps| caps[1].parse().ok())
}

/// Read the fields the pipeline needs from yt-dlp's JSON dump
pub fn parse_metadata(info: &Value) -> VideoMetadata {
    let mut caption_tracks: Vec<String> = ["subtitles", "automatic_captions"]
        .iter()
        .filter_map(|key| info.get(*key).and_then(Value::as_object))
        .flat_map(|tracks| tracks.keys().cloned())
        .collect();
    caption_tracks.sort();
    caption_tracks.dedup();

    VideoMetadata {
        title: info
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("Untitled")
            .to_string(),
        duration: info.get("duration").and_then(Value::as_f64),
        thumbnail: info
            .get("thumbnail")
            .and_then(Value::as_str)
            .map(str::to_string),
        caption_tracks,
    }
}

fn files_with_extensions(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.contains(&ext.to_lowercase().as_str()))
        })
        .collect();
    files.sort();
    files
}

/// Caption file in `dir` for the first language appearing in a file name,
/// or any caption file when no name matches
pub fn find_caption_file(dir: &Path, languages: &[String]) -> Option<PathBuf> {
    let files = files_with_extensions(dir, CAPTION_EXTENSIONS);
    languages
        .iter()
        .find_map(|lang| {
            files.iter().find(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.contains(lang.as_str()))
            })
        })
        .or_else(|| files.first())
        .cloned()
}

fn find_video_file(dir: &Path) -> Option<PathBuf> {
    VIDEO_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", VIDEO_STEM, ext)))
        .find(|path| path.exists())
}

#[async_trait]
impl VideoSource for YtDlp {
    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata> {
        let mut command = self.command();
        command.args(["--dump-single-json", "--skip-download", "--"]).arg(url);

        let stdout = self.run(command, "metadata fetch").await?;
        let info: Value =
            serde_json::from_slice(&stdout).context("Failed to parse yt-dlp metadata JSON")?;
        let metadata = parse_metadata(&info);
        debug!("Fetched metadata for {}: {}", url, metadata.title);
        Ok(metadata)
    }

    async fn download_video(
        &self,
        url: &str,
        quality: &str,
        dest_dir: &Path,
        progress: &ProgressReporter,
    ) -> Result<PathBuf> {
        let template = dest_dir.join(format!("{}.%(ext)s", VIDEO_STEM));
        let mut command = self.command();
        command
            .args(["--newline", "-f", format_selector(quality)])
            .args(["--merge-output-format", "mp4", "--concurrent-fragments", "2", "-o"])
            .arg(&template)
            .arg("--")
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to execute {}", self.path))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("yt-dlp stdout unavailable"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("yt-dlp stderr unavailable"))?;

        let stderr_task = tokio::spawn(async move {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text).await;
            text
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut last_reported = -1.0;
        while let Some(line) = lines.next_line().await? {
            if let Some(percent) = parse_progress(&line) {
                if percent.floor() > last_reported {
                    last_reported = percent.floor();
                    progress.report_with(percent, format!("downloading video {:.0}%", percent));
                }
            }
        }

        let status = child.wait().await.context("Failed to wait for yt-dlp")?;
        let stderr_text = stderr_task.await.unwrap_or_default();
        if !status.success() {
            return Err(anyhow!("yt-dlp download failed: {}", stderr_text.trim()));
        }

        let path = find_video_file(dest_dir)
            .ok_or_else(|| anyhow!("yt-dlp finished but no video file was found"))?;
        info!("Video downloaded to {}", path.display());
        Ok(path)
    }

    async fn download_captions(
        &self,
        url: &str,
        request: &CaptionRequest,
        dest_dir: &Path,
    ) -> Result<Option<PathBuf>> {
        let template = dest_dir.join(CAPTION_STEM);
        let mut command = self.command();
        command
            .args(["--skip-download", "--write-subs", "--write-auto-subs", "--sub-langs"])
            .arg(request.languages.join(","))
            .arg("--sub-format")
            .arg(&request.formats)
            .arg("-o")
            .arg(&template)
            .arg("--")
            .arg(url);

        if let Err(e) = self.run(command, "caption download").await {
            warn!("Caption download for {:?} failed: {:#}", request.languages, e);
            return Err(e);
        }

        let found = find_caption_file(dest_dir, &request.languages);
        match &found {
            Some(path) => info!("Caption file downloaded: {}", path.display()),
            None => debug!("No caption file for {:?}", request.languages),
        }
        Ok(found)
    }
}
