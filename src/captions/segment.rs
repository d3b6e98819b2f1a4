use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

// @module: Timed caption segment

// @struct: One normalized caption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionSegment {
    // @field: Start in seconds
    pub start: f64,

    // @field: End in seconds, greater than start once normalized
    pub end: f64,

    // @field: Caption text, never empty once normalized
    pub text: String,

    // @field: Translated text, set by the translation stage only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
}

impl CaptionSegment {
    /// Create a segment without a translation
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            translation: None,
        }
    }

    // @returns: Length in seconds
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    // @returns: Timestamp halfway through the segment
    pub fn midpoint(&self) -> f64 {
        (self.start + self.end) / 2.0
    }

    /// Format seconds as an SRT timestamp (HH:MM:SS,mmm)
    pub fn format_timestamp(seconds: f64) -> String {
        let ms = (seconds.max(0.0) * 1000.0).round() as u64;
        let hours = ms / 3_600_000;
        let minutes = (ms % 3_600_000) / 60_000;
        let secs = (ms % 60_000) / 1_000;
        let millis = ms % 1_000;

        format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
    }

    /// Format whole seconds as MM:SS
    pub fn format_clock(seconds: f64) -> String {
        let total = seconds.max(0.0) as u64;
        format!("{:02}:{:02}", total / 60, total % 60)
    }
}

/// Render segments as an SRT document, translation on a second line when present
pub fn to_srt(segments: &[CaptionSegment]) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        let _ = writeln!(out, "{}", i + 1);
        let _ = writeln!(
            out,
            "{} --> {}",
            CaptionSegment::format_timestamp(segment.start),
            CaptionSegment::format_timestamp(segment.end)
        );
        let _ = writeln!(out, "{}", segment.text);
        if let Some(translation) = &segment.translation {
            let _ = writeln!(out, "{}", translation);
        }
        let _ = writeln!(out);
    }
    out
}
