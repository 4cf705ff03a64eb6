//! Wikitext preprocessing
//!
//! Runs on the whole page before it is split into sections: strips invisible
//! content, expands macro blocks, drops tables and turns list and block
//! markup into paragraph breaks.

use super::scanner::{scan, ScanMode, SegmentKind};
use super::templates::{template_name, TemplateExpander};
use regex::Regex;
use std::sync::{Arc, OnceLock};

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static PATTERN: OnceLock<Regex> = OnceLock::new();
            PATTERN.get_or_init(|| Regex::new($pattern).expect("valid preprocessing regex"))
        }
    };
}

static_regex!(
    invisible_blocks,
    r"(?is)<\s*onlyinclude\s*>.*?<\s*/\s*onlyinclude\s*>|<\s*includeonly\s*>.*?<\s*/\s*includeonly\s*>|<!--.*?-->"
);
static_regex!(self_closing_refs, r"(?i)<\s*ref\b[^>]*/\s*>");
static_regex!(paired_refs, r"(?is)<\s*ref\b[^>]*>.*?<\s*/\s*ref\s*>");
static_regex!(
    broken_links,
    r"(\[\[[^\[\]\n]*?)\n([^\[\]\n]*?\]\])"
);
static_regex!(list_items, r"(?m)^[#*;:]+[ \t]*(.*)$");
static_regex!(list_tags, r"(?i)<\s*(?:/\s*)?(?:ol|ul|li)\b[^>]*>");
static_regex!(emphasis, r"'{2,3}");

/// Page-level markup rewriting ahead of parsing
#[derive(Clone)]
pub struct Preprocessor {
    expander: Arc<dyn TemplateExpander>,
}

impl Preprocessor {
    pub fn new(expander: Arc<dyn TemplateExpander>) -> Self {
        Self { expander }
    }

    /// Apply every preprocessing step in order.
    pub fn preprocess(&self, page_text: &str) -> String {
        let text = strip_invisible(page_text);
        let text = join_broken_links(&text);
        let text = self.expand_macros(&text);
        let text = remove_tables(&text);
        let text = simplify_lists(&text);
        strip_emphasis(&text)
    }

    /// Replace each outermost macro block by its expansion.
    pub fn expand_macros(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());

        for segment in scan(text, ScanMode::Macros) {
            match segment.kind {
                SegmentKind::Text | SegmentKind::Table => out.push_str(segment.text),
                SegmentKind::Macro => {
                    let expansion = template_name(segment.text)
                        .and_then(|name| self.expander.expand(&name, segment.text));
                    match expansion {
                        Some(replacement) => out.push_str(&replacement),
                        None => out.push(' '),
                    }
                }
            }
        }

        out
    }
}

/// Remove include-only content, references and comments.
pub fn strip_invisible(text: &str) -> String {
    let text = invisible_blocks().replace_all(text, "");
    let text = self_closing_refs().replace_all(&text, "");
    paired_refs().replace_all(&text, "").into_owned()
}

/// Rejoin `[[…]]` links that were wrapped across a single newline.
pub fn join_broken_links(text: &str) -> String {
    broken_links().replace_all(text, "${1} ${2}").into_owned()
}

/// Drop every table block.
pub fn remove_tables(text: &str) -> String {
    scan(text, ScanMode::Tables)
        .into_iter()
        .filter(|segment| segment.kind == SegmentKind::Text)
        .map(|segment| segment.text)
        .collect()
}

/// Turn list items and list tags into paragraph breaks.
pub fn simplify_lists(text: &str) -> String {
    let text = list_items().replace_all(text, "\n\n${1}\n\n");
    list_tags().replace_all(&text, "\n\n").into_owned()
}

/// Replace bold and italic quote runs by a space.
pub fn strip_emphasis(text: &str) -> String {
    emphasis().replace_all(text, " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::templates::StaticTemplateExpander;

    fn preprocessor() -> Preprocessor {
        Preprocessor::new(Arc::new(StaticTemplateExpander::with_defaults()))
    }

    #[test]
    fn strips_refs_and_comments() {
        let text = "Alpha<ref name=\"a\"/> beta<ref>cite {{x}}</ref> gamma<!-- hidden --> delta";
        assert_eq!(strip_invisible(text), "Alpha beta gamma delta");
    }

    #[test]
    fn self_closing_ref_does_not_swallow_following_text() {
        let text = "one<ref name=x /> two <ref>three</ref> four";
        assert_eq!(strip_invisible(text), "one two  four");
    }

    #[test]
    fn joins_links_across_newline() {
        assert_eq!(join_broken_links("see [[Mercury\n(planet)]] now"), "see [[Mercury (planet)]] now");
    }

    #[test]
    fn unknown_macros_become_spaces() {
        let pre = preprocessor();
        assert_eq!(pre.expand_macros("a{{Infobox|x={{y}}}}b"), "a b");
        assert_eq!(pre.expand_macros("a{{!}}b"), "a&#124;b");
    }

    #[test]
    fn tables_are_removed() {
        assert_eq!(remove_tables("x\n{|\n| a || b\n|}\ny"), "x\n\ny");
    }

    #[test]
    fn lists_become_paragraphs() {
        assert_eq!(simplify_lists("* one\n# two"), "\n\none\n\n\n\n\ntwo\n\n");
        assert_eq!(simplify_lists("<ul><li>x</li></ul>"), "\n\n\n\nx\n\n\n\n");
    }

    #[test]
    fn emphasis_becomes_space() {
        assert_eq!(strip_emphasis("'''Mercury''' is ''fast''"), " Mercury  is  fast ");
    }

    #[test]
    fn full_pipeline() {
        let text = "'''Mercury'''{{Infobox planet|mass=1}} is a [[planet]].<ref>x</ref>\n{|\n|cell\n|}\n* moon";
        let out = preprocessor().preprocess(text);
        assert!(out.starts_with(" Mercury   is a [[planet]]."));
        assert!(!out.contains("cell"));
        assert!(out.contains("\n\nmoon\n\n"));
    }
}
