//! Title normalization
//!
//! Page titles, section ids and group titles are the join keys of the whole
//! knowledge base: links are resolved by normalized page title, section
//! anchors by normalized section id, and sense groups by group title.

use regex::Regex;
use std::sync::OnceLock;

/// Normalize a page title the way article URLs spell it.
///
/// Trims surrounding whitespace, replaces spaces with underscores and
/// uppercases the first character (`ß` has no single-character uppercase
/// form and is left alone).
pub fn normalize_page_title(title: &str) -> String {
    let title = title.trim().replace(' ', "_");

    let mut chars = title.chars();
    match chars.next() {
        Some(first) if first != 'ß' => first.to_uppercase().chain(chars).collect(),
        _ => title,
    }
}

/// Normalize a section title into an anchor id.
///
/// Spaces become underscores, every byte outside the unreserved set (and `:`)
/// is percent-encoded, and the `%` of each escape is replaced by `.`.
pub fn normalize_section_id(title: &str) -> String {
    let title = title.replace(' ', "_");
    let mut out = String::with_capacity(title.len());

    for byte in title.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'.' | b'-' | b'~' | b':' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!(".{:02X}", byte)),
        }
    }

    out
}

fn qualifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(.*) \(.*?\)$").expect("valid qualifier regex"))
}

fn leading_article_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(?:a|an|the) (.*)$").expect("valid article regex"))
}

/// Derive the group title of a page or link title.
///
/// `Mercury_(planet)` and `The Mercury` both group under `mercury`: the title
/// is lowercased, one trailing parenthetical qualifier is dropped, and one
/// leading English article is dropped.
pub fn group_title(title: &str) -> String {
    if title.is_empty() {
        return String::new();
    }

    let title = title.replace('_', " ").to_lowercase();

    let without_qualifier = match qualifier_pattern().captures(&title) {
        Some(caps) => caps[1].to_string(),
        None => title.clone(),
    };

    match leading_article_pattern().captures(&without_qualifier) {
        Some(caps) => caps[1].to_string(),
        None => without_qualifier,
    }
}
