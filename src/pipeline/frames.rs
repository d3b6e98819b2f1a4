/*!
 * Frame extraction and image optimization.
 *
 * Extraction is sequential, one frame per segment midpoint. Optimization
 * runs in fixed-width batches: every full-size and thumbnail encode of a
 * batch runs concurrently on blocking worker threads, and each result is
 * written to the slot of its frame index, so completion order never affects
 * the output order.
 */

use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::collaborators::{EncodeTarget, FrameSource, ImageEncoder};
use super::progress::ProgressReporter;

/// Encoded images for one frame slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizedFrame {
    pub image: Option<Vec<u8>>,
    pub thumbnail: Option<Vec<u8>>,
}

/// Grab one frame per timestamp; a failed or timed out grab leaves `None`
pub async fn extract_frames(
    source: Arc<dyn FrameSource>,
    video: PathBuf,
    timestamps: Vec<f64>,
    timeout: Duration,
    progress: ProgressReporter,
) -> Vec<Option<Vec<u8>>> {
    let total = timestamps.len();
    let mut frames = Vec::with_capacity(total);

    for (index, at) in timestamps.into_iter().enumerate() {
        let frame = match tokio::time::timeout(timeout, source.extract_frame(&video, at)).await {
            Ok(Ok(bytes)) if !bytes.is_empty() => Some(bytes),
            Ok(Ok(_)) => {
                warn!("Frame {} at {:.2}s came back empty", index, at);
                None
            }
            Ok(Err(e)) => {
                warn!("Frame {} at {:.2}s failed: {:#}", index, at, e);
                None
            }
            Err(_) => {
                warn!("Frame {} at {:.2}s timed out after {}s", index, at, timeout.as_secs());
                None
            }
        };
        frames.push(frame);

        let done = index + 1;
        progress.report_with(
            done as f64 * 100.0 / total as f64,
            format!("extracting frames {}/{}", done, total),
        );
    }

    let extracted = frames.iter().filter(|f| f.is_some()).count();
    info!("Extracted {}/{} frames", extracted, total);
    frames
}

#[derive(Clone, Copy)]
enum Variant {
    Full,
    Thumbnail,
}

/// Encode every frame twice (full size and thumbnail) in batches of
/// `batch_width`, reporting progress after each batch.
pub async fn optimize_frames(
    encoder: Arc<dyn ImageEncoder>,
    frames: Vec<Option<Vec<u8>>>,
    full: EncodeTarget,
    thumbnail: EncodeTarget,
    batch_width: usize,
    progress: ProgressReporter,
) -> Vec<OptimizedFrame> {
    let total = frames.len();
    let batch_width = batch_width.max(1);
    let frames: Vec<Option<Arc<Vec<u8>>>> = frames.into_iter().map(|f| f.map(Arc::new)).collect();
    let mut output = vec![OptimizedFrame::default(); total];

    for batch_start in (0..total).step_by(batch_width) {
        let batch_end = (batch_start + batch_width).min(total);
        let mut tasks = FuturesUnordered::new();

        for index in batch_start..batch_end {
            let Some(frame) = &frames[index] else {
                continue;
            };
            for (variant, target) in [(Variant::Full, full), (Variant::Thumbnail, thumbnail)] {
                let encoder = encoder.clone();
                let frame = frame.clone();
                tasks.push(async move {
                    let result =
                        tokio::task::spawn_blocking(move || encoder.encode(&frame, &target)).await;
                    (index, variant, result)
                });
            }
        }

        while let Some((index, variant, result)) = tasks.next().await {
            let encoded = match result {
                Ok(Ok(bytes)) => Some(bytes),
                Ok(Err(e)) => {
                    warn!("Encoding frame {} failed: {:#}", index, e);
                    None
                }
                Err(e) => {
                    warn!("Encoder task for frame {} panicked: {}", index, e);
                    None
                }
            };
            let slot = &mut output[index];
            match variant {
                Variant::Full => slot.image = encoded,
                Variant::Thumbnail => slot.thumbnail = encoded,
            }
        }

        debug!("Optimized frames {}..{}", batch_start, batch_end);
        progress.report_with(
            batch_end as f64 * 100.0 / total as f64,
            format!("optimizing images {}/{}", batch_end, total),
        );
    }

    output
}
