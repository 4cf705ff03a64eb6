//! Redirect detection

use crate::markup::entity::unescape_html;
use crate::title::{normalize_page_title, normalize_section_id};
use regex::Regex;
use std::sync::OnceLock;

/// Where a redirect page points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    /// Normalized page title
    pub article: String,
    /// Normalized section id
    pub section: Option<String>,
}

fn redirect_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^[ ]*#REDIRECT[ ]*\[\[(.*?)\]\]").expect("valid redirect regex")
    })
}

/// Detect a `#REDIRECT [[Target#Section]]` prefix.
pub fn detect_redirect(page_text: &str) -> Option<RedirectTarget> {
    let caps = redirect_pattern().captures(page_text)?;
    let link = unescape_html(&caps[1]);

    let (article, section) = match link.split_once('#') {
        Some((article, section)) => (article, Some(normalize_section_id(section))),
        None => (link.as_str(), None),
    };

    Some(RedirectTarget {
        article: normalize_page_title(article),
        section,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_plain_redirect() {
        let target = detect_redirect("#REDIRECT [[Mercury (planet)]]\n{{R from move}}").unwrap();
        assert_eq!(target.article, "Mercury_(planet)");
        assert_eq!(target.section, None);
    }

    #[test]
    fn detects_section_redirect_case_insensitively() {
        let target = detect_redirect("  #redirect[[Mercury (planet)#Orbit and rotation]]").unwrap();
        assert_eq!(target.article, "Mercury_(planet)");
        assert_eq!(target.section.as_deref(), Some("Orbit_and_rotation"));
    }

    #[test]
    fn unescapes_entities() {
        let target = detect_redirect("#REDIRECT [[AT&amp;T]]").unwrap();
        assert_eq!(target.article, "AT&T");
    }

    #[test]
    fn ordinary_text_is_not_a_redirect() {
        assert!(detect_redirect("Mercury is a planet. #REDIRECT [[X]]").is_none());
    }
}
