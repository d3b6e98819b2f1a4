// @module: Script detection helpers for CJK text

/// Share of CJK characters above which a text counts as CJK-dominant
pub const CJK_DOMINANCE_RATIO: f64 = 0.3;

/// Marks that close a CJK sentence
pub const SENTENCE_ENDS: &[char] = &['。', '！', '？', '…'];

/// Marks that count as "punctuated" when deciding whether to restore punctuation
pub const PUNCTUATION_ENDS: &[char] = &['。', '！', '？', '，', '；', '…', '、'];

// @returns: True for Han, Hiragana/Katakana and Hangul syllables
pub fn is_cjk_char(c: char) -> bool {
    matches!(c,
        '\u{4e00}'..='\u{9fff}'
        | '\u{3040}'..='\u{30ff}'
        | '\u{ac00}'..='\u{d7af}')
}

// @returns: CJK characters over total characters, 0 for empty text
pub fn cjk_ratio(text: &str) -> f64 {
    let (cjk, total) = text.chars().fold((0usize, 0usize), |(cjk, total), c| {
        (cjk + usize::from(is_cjk_char(c)), total + 1)
    });
    if total == 0 {
        return 0.0;
    }
    cjk as f64 / total as f64
}

// @returns: Whether the text is CJK-dominant
pub fn is_cjk(text: &str) -> bool {
    cjk_ratio(text) > CJK_DOMINANCE_RATIO
}

// @returns: Whether the text, ignoring trailing whitespace, ends with one of `marks`
pub fn ends_with_any(text: &str, marks: &[char]) -> bool {
    text.trim_end()
        .chars()
        .next_back()
        .is_some_and(|last| marks.contains(&last))
}

// @returns: Whether a CJK sentence is complete
pub fn ends_sentence(text: &str) -> bool {
    ends_with_any(text, SENTENCE_ENDS)
}
