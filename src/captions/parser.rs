use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use super::segment::CaptionSegment;

// @module: Raw caption dialect detection and parsing

// @const: Cue timing line, hours optional
static TIME_RANGE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"((?:\d{1,2}:)?\d{2}:\d{2}[.,]\d{3})\s*-->\s*((?:\d{1,2}:)?\d{2}:\d{2}[.,]\d{3})").unwrap()
});

// @const: Per-word timing tag of word-incremental captions
static WORD_TIMING_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<\d+:\d+:\d+\.\d+>").unwrap()
});

// @const: Any markup tag
static TAG_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<[^>]+>").unwrap()
});

// @const: ASS style positioning override
static POSITION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\\an\d+\}").unwrap()
});

// @const: Block separator for rolling captions, truly empty lines only
static STRICT_BLOCK_SPLIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\n\n+").unwrap()
});

// @const: Block separator for cue based captions
static LOOSE_BLOCK_SPLIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\n\s*\n").unwrap()
});

// @const: Runs of whitespace
static WHITESPACE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s+").unwrap()
});

/// Raw caption dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionDialect {
    /// WebVTT where each cue restates earlier words and tags new ones with timings
    Rolling,
    /// Ordinary WebVTT
    WebVtt,
    /// SubRip
    Srt,
}

impl std::fmt::Display for CaptionDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptionDialect::Rolling => write!(f, "rolling-vtt"),
            CaptionDialect::WebVtt => write!(f, "vtt"),
            CaptionDialect::Srt => write!(f, "srt"),
        }
    }
}

/// Detect which dialect a caption file is written in
pub fn detect_dialect(content: &str) -> CaptionDialect {
    if WORD_TIMING_REGEX.is_match(content) {
        return CaptionDialect::Rolling;
    }

    let head = content.trim_start_matches('\u{feff}').trim_start();
    if head.starts_with("WEBVTT") {
        CaptionDialect::WebVtt
    } else {
        CaptionDialect::Srt
    }
}

/// Parse raw caption text into (start, end, text) segments, markup removed
pub fn parse_raw(content: &str) -> Vec<CaptionSegment> {
    let content = content.replace("\r\n", "\n").replace('\r', "\n");
    let dialect = detect_dialect(&content);
    debug!("Parsing captions as {}", dialect);

    let segments = match dialect {
        CaptionDialect::Rolling => parse_rolling(&content),
        CaptionDialect::WebVtt | CaptionDialect::Srt => parse_cues(&content),
    };

    let total = segments.len();
    let mut kept: Vec<CaptionSegment> = segments
        .into_iter()
        .filter(|s| s.end > s.start && !s.text.is_empty())
        .collect();

    if kept.len() < total {
        debug!("Dropped {} cues with empty text or non-positive duration", total - kept.len());
    }

    // Stable, so cues sharing a start keep file order
    kept.sort_by(|a, b| a.start.total_cmp(&b.start));
    kept
}

/// Word-incremental captions: keep only the lines that carry word timings,
/// the untagged lines restate earlier cues
fn parse_rolling(content: &str) -> Vec<CaptionSegment> {
    let mut segments = Vec::new();

    for block in STRICT_BLOCK_SPLIT.split(content.trim()) {
        let lines: Vec<&str> = block.trim().lines().collect();
        let Some((index, start, end)) = find_timing(&lines) else {
            continue;
        };

        let tagged: Vec<String> = lines[index + 1..]
            .iter()
            .filter(|line| WORD_TIMING_REGEX.is_match(line))
            .map(|line| TAG_REGEX.replace_all(line, "").trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();

        if tagged.is_empty() {
            continue;
        }

        let text = collapse_whitespace(&tagged.join(" "));
        if !text.is_empty() {
            segments.push(CaptionSegment::new(start, end, text));
        }
    }

    segments
}

/// Cue based captions (plain WebVTT and SRT)
fn parse_cues(content: &str) -> Vec<CaptionSegment> {
    let mut segments = Vec::new();

    for block in LOOSE_BLOCK_SPLIT.split(content.trim()) {
        let lines: Vec<&str> = block.trim().lines().collect();
        let Some((index, start, end)) = find_timing(&lines) else {
            continue;
        };

        let text = clean_text(&lines[index + 1..]);
        if !text.is_empty() {
            segments.push(CaptionSegment::new(start, end, text));
        }
    }

    segments
}

// @returns: Index of the timing line with its start and end in seconds
fn find_timing(lines: &[&str]) -> Option<(usize, f64, f64)> {
    lines.iter().enumerate().find_map(|(i, line)| {
        let caps = TIME_RANGE_REGEX.captures(line)?;
        let start = timestamp_to_seconds(caps.get(1)?.as_str())?;
        let end = timestamp_to_seconds(caps.get(2)?.as_str())?;
        Some((i, start, end))
    })
}

/// Strip tags and positioning overrides, then join the lines with spaces
fn clean_text(lines: &[&str]) -> String {
    let joined = lines
        .iter()
        .map(|line| {
            let without_tags = TAG_REGEX.replace_all(line, "");
            POSITION_REGEX.replace_all(&without_tags, "").trim().to_string()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    joined.trim().to_string()
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_REGEX.replace_all(text.trim(), " ").into_owned()
}

/// Parse HH:MM:SS.mmm, MM:SS.mmm (comma or dot before the millis) into seconds
pub fn timestamp_to_seconds(timestamp: &str) -> Option<f64> {
    let normalized = timestamp.trim().replace(',', ".");
    let parts: Vec<&str> = normalized.split(':').collect();

    match parts.as_slice() {
        [h, m, s] => {
            let hours: u64 = h.parse().ok()?;
            let minutes: u64 = m.parse().ok()?;
            let seconds: f64 = s.parse().ok()?;
            Some((hours * 3600 + minutes * 60) as f64 + seconds)
        }
        [m, s] => {
            let minutes: u64 = m.parse().ok()?;
            let seconds: f64 = s.parse().ok()?;
            Some((minutes * 60) as f64 + seconds)
        }
        [s] => s.parse().ok(),
        _ => None,
    }
}
