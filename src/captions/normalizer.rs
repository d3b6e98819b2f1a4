/*!
 * Caption normalization.
 *
 * `normalize` runs the raw parse followed by these steps, each consuming the
 * previous step's output:
 * - collapse rolling duplicates
 * - drop adjacent duplicates
 * - merge short cues into their predecessor
 * - coalesce CJK fragments into sentences (CJK-dominant sets only)
 *
 * A last adjacent-duplicate sweep runs after coalescing since merging can
 * recreate equal neighbours.
 */

use anyhow::{Context, Result};
use log::{debug, info};
use std::path::Path;

use super::parser::parse_raw;
use super::script::{cjk_ratio, ends_sentence, is_cjk, CJK_DOMINANCE_RATIO};
use super::segment::CaptionSegment;

/// Largest gap (seconds) between a rolling group and a cue that extends it
pub const ROLLING_MAX_GAP: f64 = 1.5;

/// Word overlap above which a cue counts as restating the group
pub const WORD_OVERLAP_RATIO: f64 = 0.6;

/// Cues shorter than this absorb the next cue
pub const MIN_DURATION: f64 = 1.0;

/// Largest gap (seconds) across which a short cue absorbs the next one
pub const MERGE_GAP: f64 = 0.5;

/// Gap (seconds) that always ends a CJK sentence buffer
pub const CJK_MAX_GAP: f64 = 2.0;

/// Buffer length (characters) beyond which a CJK sentence buffer is flushed
pub const CJK_MAX_CHARS: usize = 120;

/// Parse and normalize raw caption text
pub fn normalize(raw: &str) -> Vec<CaptionSegment> {
    let parsed = parse_raw(raw);
    let parsed_count = parsed.len();

    let collapsed = collapse_rolling(parsed);
    let deduplicated = deduplicate(collapsed);
    let merged = merge_short(deduplicated);
    let coalesced = coalesce_cjk(merged);
    let segments = deduplicate(coalesced);

    debug!("Caption normalization: {} cues -> {} segments", parsed_count, segments.len());
    segments
}

/// Read a caption file (invalid UTF-8 replaced) and normalize it
pub fn normalize_file<P: AsRef<Path>>(path: P) -> Result<Vec<CaptionSegment>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read caption file: {}", path.display()))?;
    let segments = normalize(&String::from_utf8_lossy(&bytes));
    info!("Parsed {} caption segments from {}", segments.len(), path.display());
    Ok(segments)
}

/// `normalize_file` for async callers: the read goes through tokio and the
/// normalization runs on the blocking pool
pub async fn normalize_file_async<P: AsRef<Path>>(path: P) -> Result<Vec<CaptionSegment>> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read caption file: {}", path.display()))?;
    let segments = tokio::task::spawn_blocking(move || normalize(&String::from_utf8_lossy(&bytes)))
        .await
        .context("Caption normalization panicked")?;
    info!("Parsed {} caption segments from {}", segments.len(), path.display());
    Ok(segments)
}

/// Collapse cues that cumulatively restate a rolling group into one segment
/// spanning the group and carrying its longest text.
///
/// A single pass compares each cue with the group built so far; passes repeat
/// until no two groups merge, so the result is stable under re-application.
pub fn collapse_rolling(segments: Vec<CaptionSegment>) -> Vec<CaptionSegment> {
    let mut current = segments;
    loop {
        let before = current.len();
        current = collapse_pass(current);
        if current.len() == before {
            return current;
        }
    }
}

fn collapse_pass(segments: Vec<CaptionSegment>) -> Vec<CaptionSegment> {
    let mut result = Vec::with_capacity(segments.len());
    let mut iter = segments.into_iter();
    let Some(mut group) = iter.next() else {
        return result;
    };

    for segment in iter {
        let gap = segment.start - group.end;
        if gap <= ROLLING_MAX_GAP && is_extension(&group.text, &segment.text) {
            group.end = group.end.max(segment.end);
            if segment.text.chars().count() > group.text.chars().count() {
                group.text = segment.text;
            }
        } else {
            result.push(std::mem::replace(&mut group, segment));
        }
    }

    result.push(group);
    result
}

// @returns: Whether `current` restates or extends `previous`
fn is_extension(previous: &str, current: &str) -> bool {
    let p = previous.trim();
    let c = current.trim();
    if p.is_empty() || c.is_empty() {
        return false;
    }

    if c.starts_with(p) || p.starts_with(c) {
        return true;
    }

    let p_words: Vec<&str> = p.split_whitespace().collect();
    let c_words: Vec<&str> = c.split_whitespace().collect();
    let overlap = p_words.iter().filter(|w| c_words.contains(w)).count();
    let ratio = overlap as f64 / p_words.len().max(c_words.len()) as f64;
    ratio > WORD_OVERLAP_RATIO
}

/// Drop a cue whose text equals the cue kept right before it
pub fn deduplicate(segments: Vec<CaptionSegment>) -> Vec<CaptionSegment> {
    let mut result: Vec<CaptionSegment> = Vec::with_capacity(segments.len());
    for segment in segments {
        if result.last().is_some_and(|last| last.text == segment.text) {
            continue;
        }
        result.push(segment);
    }
    result
}

/// Fold a cue into the kept cue before it when that one is shorter than
/// `MIN_DURATION` and the gap is at most `MERGE_GAP`.
///
/// Each comparison is against the already merged predecessor, so after one
/// pass no kept cue qualifies to absorb its successor. A short final cue has
/// no successor and is left as is.
pub fn merge_short(segments: Vec<CaptionSegment>) -> Vec<CaptionSegment> {
    let mut result: Vec<CaptionSegment> = Vec::with_capacity(segments.len());
    for segment in segments {
        if let Some(last) = result.last_mut() {
            let gap = segment.start - last.end;
            if gap <= MERGE_GAP && last.duration() < MIN_DURATION {
                let separator = if is_cjk(&last.text) { "" } else { " " };
                last.text = format!("{}{}{}", last.text, separator, segment.text);
                last.end = last.end.max(segment.end);
                continue;
            }
        }
        result.push(segment);
    }
    result
}

/// Join CJK fragments into sentences. A buffer is flushed when it ends with a
/// sentence mark, grows past `CJK_MAX_CHARS`, or the next cue starts more than
/// `CJK_MAX_GAP` after it. Sets that are not CJK-dominant pass through.
pub fn coalesce_cjk(segments: Vec<CaptionSegment>) -> Vec<CaptionSegment> {
    if !is_cjk_set(&segments) {
        return segments;
    }

    let before = segments.len();
    let mut result = Vec::with_capacity(before);
    let mut iter = segments.into_iter();
    let Some(mut buffer) = iter.next() else {
        return result;
    };

    for segment in iter {
        let gap = segment.start - buffer.end;
        let flush = ends_sentence(&buffer.text)
            || buffer.text.chars().count() > CJK_MAX_CHARS
            || gap > CJK_MAX_GAP;

        if flush {
            result.push(std::mem::replace(&mut buffer, segment));
        } else {
            buffer.text.push_str(&segment.text);
            buffer.end = buffer.end.max(segment.end);
        }
    }
    result.push(buffer);

    debug!("CJK sentence coalescing: {} -> {} segments", before, result.len());
    result
}

// @returns: Whether the CJK share over all segment text is dominant
fn is_cjk_set(segments: &[CaptionSegment]) -> bool {
    if segments.is_empty() {
        return false;
    }
    let text: String = segments.iter().map(|s| s.text.as_str()).collect();
    cjk_ratio(&text) > CJK_DOMINANCE_RATIO
}
