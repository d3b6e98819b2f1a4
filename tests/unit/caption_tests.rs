/*!
 * Tests for caption parsing and normalization
 */

use tubeslides::captions::normalizer::{collapse_rolling, merge_short};
use tubeslides::captions::script::{ends_sentence, is_cjk};
use tubeslides::captions::{
    detect_dialect, normalize, normalize_file, normalize_file_async, parse_raw, CaptionDialect,
    CaptionSegment,
};

use crate::common::{self, ROLLING_VTT, SIMPLE_SRT, SIMPLE_VTT};

fn texts(segments: &[CaptionSegment]) -> Vec<&str> {
    segments.iter().map(|s| s.text.as_str()).collect()
}

fn assert_no_adjacent_duplicates(segments: &[CaptionSegment]) {
    for pair in segments.windows(2) {
        assert_ne!(pair[0].text, pair[1].text, "adjacent duplicate: {:?}", pair);
    }
}

#[test]
fn test_normalize_withRollingVtt_shouldKeepTaggedLinesOnly() {
    assert_eq!(detect_dialect(ROLLING_VTT), CaptionDialect::Rolling);

    let segments = normalize(ROLLING_VTT);
    assert_eq!(texts(&segments), vec!["welcome to the show", "today we talk about rust"]);
    assert_no_adjacent_duplicates(&segments);
}

#[test]
fn test_normalize_withOverlappingRollingCues_shouldCollapseToLongestText() {
    let raw = "WEBVTT

00:00:00.000 --> 00:00:00.500
Hello

00:00:00.300 --> 00:00:00.900
Hello world

00:00:00.600 --> 00:00:01.400
Hello world today
";
    let segments = normalize(raw);
    assert_eq!(segments, vec![CaptionSegment::new(0.0, 1.4, "Hello world today")]);
}

#[test]
fn test_normalize_withSrt_shouldPreserveCues() {
    assert_eq!(detect_dialect(SIMPLE_SRT), CaptionDialect::Srt);

    let segments = normalize(SIMPLE_SRT);
    assert_eq!(segments.len(), 3);
    assert_eq!(segments[0].start, 1.0);
    assert_eq!(segments[2].end, 14.0);
    assert_eq!(segments[1].text, "It contains multiple entries.");
}

#[test]
fn test_normalize_withRepeatedCues_shouldNeverEmitAdjacentDuplicates() {
    let raw = "WEBVTT

00:00:00.000 --> 00:00:02.000
same line

00:00:05.000 --> 00:00:07.000
same line

00:00:07.000 --> 00:00:09.000
another line

00:00:12.000 --> 00:00:14.000
same line
";
    let segments = normalize(raw);
    assert_no_adjacent_duplicates(&segments);
    assert_eq!(texts(&segments), vec!["same line", "another line", "same line"]);
}

#[test]
fn test_collapseAndMerge_onOwnOutput_shouldBeIdempotent() {
    let inputs = [ROLLING_VTT, SIMPLE_VTT, SIMPLE_SRT];
    for raw in inputs {
        let parsed = parse_raw(raw);

        let collapsed = collapse_rolling(parsed.clone());
        assert!(collapsed.len() <= parsed.len());
        assert_eq!(collapse_rolling(collapsed.clone()), collapsed);

        let merged = merge_short(collapsed);
        assert_eq!(merge_short(merged.clone()), merged);
    }
}

#[test]
fn test_mergeShort_shortCueChain_shouldBeStableAfterOnePass() {
    let input = vec![
        CaptionSegment::new(0.0, 0.3, "a"),
        CaptionSegment::new(0.4, 0.6, "b"),
        CaptionSegment::new(0.7, 2.0, "c"),
        CaptionSegment::new(2.1, 2.4, "tail"),
    ];
    let merged = merge_short(input);
    assert_eq!(texts(&merged), vec!["a b c", "tail"]);
    assert_eq!(merge_short(merged.clone()), merged);
}

#[test]
fn test_normalize_withCjkCaptions_shouldFlushOnlyAtSentenceBoundaries() {
    let raw = "WEBVTT

00:00:00.000 --> 00:00:01.500
今天我们

00:00:01.500 --> 00:00:03.000
来聊一聊

00:00:03.000 --> 00:00:04.500
编程语言。

00:00:04.500 --> 00:00:06.000
首先

00:00:10.000 --> 00:00:11.500
很久以后

00:00:11.500 --> 00:00:13.000
结束了！
";
    let segments = normalize(raw);
    assert_eq!(texts(&segments), vec!["今天我们来聊一聊编程语言。", "首先", "很久以后结束了！"]);

    // Each non-final segment ends a sentence, is long, or precedes a gap
    for pair in segments.windows(2) {
        let gap = pair[1].start - pair[0].end;
        assert!(
            ends_sentence(&pair[0].text) || pair[0].text.chars().count() >= 120 || gap > 2.0,
            "unexpected flush of {:?}",
            pair[0]
        );
    }
    assert!(segments.iter().all(|s| is_cjk(&s.text)));
}

#[test]
fn test_normalize_withEmptyAndInvertedCues_shouldDropThem() {
    let raw = "WEBVTT

00:00:03.000 --> 00:00:02.000
backwards

00:00:04.000 --> 00:00:05.000


00:00:06.000 --> 00:00:08.000
<b>kept</b> {\\an8}line
";
    let segments = normalize(raw);
    assert_eq!(texts(&segments), vec!["kept line"]);
}

#[test]
fn test_normalizeFile_withInvalidUtf8_shouldStillParse() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("broken.srt");
    let mut bytes = SIMPLE_SRT.as_bytes().to_vec();
    bytes.extend_from_slice(b"\n4\n00:00:15,000 --> 00:00:17,000\nbad \xff byte\n");
    std::fs::write(&path, bytes).unwrap();

    let segments = normalize_file(&path).unwrap();
    assert_eq!(segments.len(), 4);
    assert!(segments[3].text.starts_with("bad "));
}

#[test]
fn test_normalizeFile_withMissingFile_shouldFail() {
    let dir = common::create_temp_dir().unwrap();
    assert!(normalize_file(dir.path().join("nope.vtt")).is_err());
}

#[tokio::test]
async fn test_normalizeFileAsync_shouldMatchBlockingRead() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("captions.srt");
    tokio::fs::write(&path, SIMPLE_SRT).await.unwrap();

    let segments = normalize_file_async(&path).await.unwrap();
    assert!(!segments.is_empty());
    assert_eq!(segments, normalize_file(&path).unwrap());
    assert!(normalize_file_async(dir.path().join("nope.vtt")).await.is_err());
}
