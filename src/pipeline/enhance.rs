/*!
 * Optional text enhancement: translation, punctuation restoration and the
 * deck outline.
 *
 * Every failure here is absorbed. A failed, timed out or mis-sized batch
 * leaves its segments as they were.
 */

use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

use super::collaborators::{EnhanceTask, TextEnhancer};
use super::progress::ProgressReporter;
use crate::captions::script::{ends_with_any, is_cjk, PUNCTUATION_ENDS};
use crate::captions::CaptionSegment;

/// Share of CJK-dominant segments above which punctuation is checked
pub const CJK_SEGMENT_SHARE: f64 = 0.5;

/// Share of punctuated segments below which punctuation is restored
pub const PUNCTUATED_SHARE: f64 = 0.2;

/// Batching of enhancement calls
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub batch_size: usize,
    /// Pause between consecutive batches
    pub delay: Duration,
    /// Budget of a single batch call
    pub timeout: Duration,
}

/// Whether captions look like unpunctuated CJK speech: at least half the
/// segments are CJK-dominant and fewer than a fifth end in punctuation.
pub fn needs_punctuation(segments: &[CaptionSegment]) -> bool {
    if segments.is_empty() {
        return false;
    }

    let total = segments.len() as f64;
    let cjk = segments.iter().filter(|s| is_cjk(&s.text)).count() as f64;
    if cjk < total * CJK_SEGMENT_SHARE {
        return false;
    }

    let punctuated = segments
        .iter()
        .filter(|s| ends_with_any(&s.text, PUNCTUATION_ENDS))
        .count() as f64;
    punctuated / total < PUNCTUATED_SHARE
}

/// Run a per-line task over all segments in batches.
///
/// `Translate` fills `translation`; `RestorePunctuation` replaces `text`.
/// Progress is reported after every batch. Returns the segments and how many
/// of them were updated.
pub async fn enhance_segments(
    enhancer: Arc<dyn TextEnhancer>,
    task: EnhanceTask,
    mut segments: Vec<CaptionSegment>,
    options: BatchOptions,
    progress: ProgressReporter,
) -> (Vec<CaptionSegment>, usize) {
    let total = segments.len();
    let batch_size = options.batch_size.max(1);
    let mut updated = 0;
    let mut processed = 0;

    for batch_start in (0..total).step_by(batch_size) {
        let batch_end = (batch_start + batch_size).min(total);
        let texts: Vec<String> = segments[batch_start..batch_end]
            .iter()
            .map(|s| s.text.clone())
            .collect();

        match tokio::time::timeout(options.timeout, enhancer.process(&task, &texts)).await {
            Ok(Ok(results)) if results.len() == texts.len() => {
                for (segment, result) in segments[batch_start..batch_end].iter_mut().zip(results) {
                    match &task {
                        EnhanceTask::Translate { .. } => segment.translation = Some(result),
                        _ => segment.text = result,
                    }
                }
                updated += texts.len();
            }
            Ok(Ok(results)) => {
                warn!(
                    "Enhancement batch at {} returned {} lines for {}, keeping originals",
                    batch_start,
                    results.len(),
                    texts.len()
                );
            }
            Ok(Err(e)) => warn!("Enhancement batch at {} failed: {:#}", batch_start, e),
            Err(_) => warn!(
                "Enhancement batch at {} timed out after {}s",
                batch_start,
                options.timeout.as_secs()
            ),
        }

        processed += texts.len();
        progress.report(processed as f64 * 100.0 / total as f64);

        if batch_end < total && !options.delay.is_zero() {
            tokio::time::sleep(options.delay).await;
        }
    }

    info!("Enhanced {}/{} segments", updated, total);
    (segments, updated)
}

// @returns: Caption text joined and cut to `max_chars` characters plus "..."
pub fn outline_input(segments: &[CaptionSegment], max_chars: usize) -> String {
    let full: String = segments.iter().map(|s| s.text.as_str()).collect();
    if full.chars().count() <= max_chars {
        return full;
    }
    let mut cut: String = full.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

/// Ask for an outline of the captions; `None` on failure, timeout or an
/// empty reply.
pub async fn generate_outline(
    enhancer: Arc<dyn TextEnhancer>,
    segments: &[CaptionSegment],
    title: String,
    duration_secs: i64,
    max_chars: usize,
    timeout: Duration,
) -> Option<String> {
    let task = EnhanceTask::Outline {
        title,
        duration_secs,
    };
    let input = vec![outline_input(segments, max_chars)];

    match tokio::time::timeout(timeout, enhancer.process(&task, &input)).await {
        Ok(Ok(reply)) => {
            let outline = reply
                .into_iter()
                .map(|text| text.trim().to_string())
                .find(|text| !text.is_empty());
            match &outline {
                Some(text) => info!("Outline generated ({} chars)", text.chars().count()),
                None => debug!("Outline reply was empty"),
            }
            outline
        }
        Ok(Err(e)) => {
            warn!("Outline generation failed, skipping: {:#}", e);
            None
        }
        Err(_) => {
            warn!("Outline generation timed out after {}s", timeout.as_secs());
            None
        }
    }
}
