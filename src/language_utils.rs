use isolang::Language;

/// Language utilities for caption language tags
///
/// Caption tracks use BCP 47 style tags (`en`, `zh-Hans`, `pt-BR`). These
/// helpers reduce a tag to its ISO 639 primary subtag and produce a readable
/// English name for prompts and listings.

// @returns: Lowercased primary subtag of a language tag (`zh` for `zh-Hans`)
pub fn primary_subtag(tag: &str) -> String {
    tag.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// Readable English name for a language tag, the tag itself when unknown
pub fn language_name(tag: &str) -> String {
    let tag = tag.trim();
    let primary = primary_subtag(tag);

    let script_hint = tag
        .split(['-', '_'])
        .skip(1)
        .map(str::to_lowercase)
        .find_map(|subtag| match subtag.as_str() {
            "hans" | "cn" | "sg" => Some("Simplified"),
            "hant" | "tw" | "hk" | "mo" => Some("Traditional"),
            _ => None,
        });

    let base = match primary.len() {
        2 => Language::from_639_1(&primary),
        3 => Language::from_639_3(&primary),
        _ => None,
    };

    match (base, script_hint) {
        (Some(Language::Zho), Some(script)) => format!("Chinese ({})", script),
        (Some(language), _) => language.to_name().to_string(),
        (None, _) => tag.to_string(),
    }
}
