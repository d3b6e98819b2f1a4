/*!
 * Deck output as a JSON manifest with image files next to it.
 *
 * Layout under the output directory:
 * - `deck.json`
 * - `images/NNNNN.jpg`
 * - `thumbs/NNNNN.jpg`
 */

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::collaborators::{SlideBuilder, SlideDeck};

/// Manifest file name
pub const DECK_FILE: &str = "deck.json";

/// One slide as written to the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideEntry {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    /// Relative path of the full image, absent when none was produced
    pub image: Option<String>,
    pub thumbnail: Option<String>,
}

/// The manifest written to `deck.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckManifest {
    pub job_id: i64,
    pub title: String,
    pub url: String,
    pub duration: Option<i64>,
    pub outline: Option<String>,
    pub slide_count: usize,
    pub slides: Vec<SlideEntry>,
}

/// Writes decks as JSON plus JPEG files
#[derive(Debug, Clone, Default)]
pub struct JsonDeckWriter;

impl JsonDeckWriter {
    pub fn new() -> Self {
        Self
    }
}

async fn write_image(dir: &Path, subdir: &str, index: usize, bytes: &[u8]) -> Result<String> {
    let relative = format!("{}/{:05}.jpg", subdir, index);
    let path = dir.join(&relative);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write image: {}", path.display()))?;
    Ok(relative)
}

/// Write through a temp file in the same directory so readers never see a partial manifest
fn write_atomically(dir: &Path, target: &Path, contents: &[u8]) -> Result<()> {
    let mut staged = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to stage deck in {}", dir.display()))?;
    staged.write_all(contents).context("Failed to write staged deck")?;
    staged
        .persist(target)
        .with_context(|| format!("Failed to write deck: {}", target.display()))?;
    Ok(())
}

#[async_trait]
impl SlideBuilder for JsonDeckWriter {
    async fn build(&self, deck: SlideDeck, dest_dir: &Path) -> Result<PathBuf> {
        for subdir in ["images", "thumbs"] {
            let dir = dest_dir.join(subdir);
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
        }

        let mut entries = Vec::with_capacity(deck.slides.len());
        for slide in deck.slides {
            let image = match &slide.image {
                Some(bytes) => Some(write_image(dest_dir, "images", slide.index, bytes).await?),
                None => None,
            };
            let thumbnail = match &slide.thumbnail {
                Some(bytes) => Some(write_image(dest_dir, "thumbs", slide.index, bytes).await?),
                None => None,
            };
            entries.push(SlideEntry {
                index: slide.index,
                start: slide.segment.start,
                end: slide.segment.end,
                text: slide.segment.text,
                translation: slide.segment.translation,
                image,
                thumbnail,
            });
        }

        let manifest = DeckManifest {
            job_id: deck.job_id,
            title: deck.title,
            url: deck.url,
            duration: deck.duration,
            outline: deck.outline,
            slide_count: entries.len(),
            slides: entries,
        };

        let path = dest_dir.join(DECK_FILE);
        let json = serde_json::to_string_pretty(&manifest).context("Failed to serialize deck")?;
        let staging_dir = dest_dir.to_path_buf();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&staging_dir, &target, json.as_bytes()))
            .await
            .context("Deck writer task panicked")??;

        info!("Deck with {} slides written to {}", manifest.slide_count, path.display());
        Ok(path)
    }
}
