/*!
 * ffmpeg-backed frame grabbing and JPEG re-encoding.
 */

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, error};
use std::io::Write;
use std::path::Path;
use std::process::Stdio;

use crate::pipeline::collaborators::{EncodeTarget, FrameSource, ImageEncoder};

/// Runs the ffmpeg binary
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    path: String,
}

impl Ffmpeg {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Map a JPEG quality (1-95, higher is better) onto ffmpeg's mjpeg
/// `-q:v` scale (2-31, lower is better)
pub fn jpeg_quality_to_qscale(quality: u8) -> u8 {
    let quality = quality.clamp(1, 95) as u32;
    (2 + (95 - quality) * 29 / 94) as u8
}

/// Keep only the meaningful lines of ffmpeg's stderr, dropping the version
/// banner, build configuration and stream listings.
pub fn filter_ffmpeg_stderr(stderr: &str) -> String {
    const NOISE_PREFIXES: &[&str] = &[
        "ffmpeg version",
        "built with",
        "configuration:",
        "lib",
        "Input #",
        "Metadata:",
        "Duration:",
        "Chapter",
        "Stream #",
        "Output #",
        "Stream mapping:",
        "Press [q]",
    ];

    let meaningful: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !NOISE_PREFIXES.iter().any(|p| line.starts_with(p)))
        .collect();

    if meaningful.is_empty() {
        "unknown ffmpeg error (stderr was empty after filtering)".to_string()
    } else {
        meaningful.join("\n")
    }
}

// @returns: Scale filter fitting the image inside the target box without upscaling
fn scale_filter(target: &EncodeTarget) -> String {
    format!(
        "scale='min({w},iw)':'min({h},ih)':force_original_aspect_ratio=decrease",
        w = target.max_width,
        h = target.max_height
    )
}

#[async_trait]
impl FrameSource for Ffmpeg {
    async fn extract_frame(&self, video: &Path, at_secs: f64) -> Result<Vec<u8>> {
        let output = tokio::process::Command::new(&self.path)
            .args(["-hide_banner", "-loglevel", "error", "-ss"])
            .arg(format!("{:.3}", at_secs.max(0.0)))
            .arg("-i")
            .arg(video)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "mjpeg", "-q:v", "2", "-"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", self.path))?;

        if !output.status.success() {
            let filtered = filter_ffmpeg_stderr(&String::from_utf8_lossy(&output.stderr));
            error!("Frame extraction at {:.2}s failed: {}", at_secs, filtered);
            return Err(anyhow!("ffmpeg frame extraction failed: {}", filtered));
        }
        if output.stdout.is_empty() {
            return Err(anyhow!("ffmpeg produced no frame at {:.2}s", at_secs));
        }

        debug!("Extracted frame at {:.2}s ({} bytes)", at_secs, output.stdout.len());
        Ok(output.stdout)
    }
}

impl ImageEncoder for Ffmpeg {
    fn encode(&self, image: &[u8], target: &EncodeTarget) -> Result<Vec<u8>> {
        let mut child = std::process::Command::new(&self.path)
            .args(["-hide_banner", "-loglevel", "error", "-f", "image2pipe", "-i", "-", "-vf"])
            .arg(scale_filter(target))
            .arg("-q:v")
            .arg(jpeg_quality_to_qscale(target.quality).to_string())
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "mjpeg", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to execute {}", self.path))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("ffmpeg stdin unavailable"))?;
        let input = image.to_vec();
        let writer = std::thread::spawn(move || stdin.write_all(&input));

        let output = child
            .wait_with_output()
            .context("Failed to wait for ffmpeg")?;
        writer
            .join()
            .map_err(|_| anyhow!("ffmpeg stdin writer panicked"))?
            .context("Failed to feed image to ffmpeg")?;

        if !output.status.success() {
            let filtered = filter_ffmpeg_stderr(&String::from_utf8_lossy(&output.stderr));
            return Err(anyhow!("ffmpeg encode failed: {}", filtered));
        }
        if output.stdout.is_empty() {
            return Err(anyhow!("ffmpeg encode produced no output"));
        }
        Ok(output.stdout)
    }
}
