/*!
 * Caption handling: raw caption parsing and normalization.
 *
 * Raw caption files come in three dialects (word-incremental "rolling" WebVTT,
 * plain WebVTT and SRT). `normalize` turns any of them into an ordered,
 * deduplicated, sentence-coherent list of `CaptionSegment`s.
 */

pub mod normalizer;
pub mod parser;
pub mod script;
pub mod segment;

pub use normalizer::{normalize, normalize_file, normalize_file_async};
pub use parser::{detect_dialect, parse_raw, CaptionDialect};
pub use segment::CaptionSegment;
