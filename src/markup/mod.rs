//! Markup normalizer
//!
//! Turns raw wikitext into linear text with link spans:
//! - [`preprocess`]: page-level stripping, macro expansion, table removal
//! - [`scanner`]: bracket-matching segmenter used by the preprocessor
//! - [`parser`]: recursive-descent parse into [`Node`]s
//! - [`render`]: node tree to text with byte-offset [`LinkSpan`]s
//! - [`paragraph`]: blank-line paragraph split, whitespace collapse, prose filters

pub mod entity;
pub mod node;
pub mod paragraph;
pub mod parser;
pub mod preprocess;
pub mod render;
pub mod scanner;
pub mod templates;

pub use node::{Heading, Node};
pub use paragraph::{split_paragraphs, Paragraph, ParagraphSplit};
pub use parser::{parse, parse_heading, MAX_NESTING_DEPTH};
pub use preprocess::Preprocessor;
pub use render::{anchor_ids, plain_text, render, LinkSpan, RenderedText};
pub use templates::{StaticTemplateExpander, TemplateExpander, TemplateRule};

use std::sync::Arc;

/// Markup that cannot be turned into text
#[derive(Debug, thiserror::Error)]
pub enum MarkupParseError {
    #[error("markup nested deeper than {limit} levels at byte {offset}")]
    NestingTooDeep { limit: usize, offset: usize },
}

pub type MarkupResult<T> = Result<T, MarkupParseError>;

/// Preprocess, parse and render in one call
#[derive(Clone)]
pub struct Normalizer {
    preprocessor: Preprocessor,
}

impl Normalizer {
    pub fn new(expander: Arc<dyn TemplateExpander>) -> Self {
        Self {
            preprocessor: Preprocessor::new(expander),
        }
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Normalize a run of raw markup into plain text with link spans.
    pub fn normalize(&self, raw_markup: &str) -> MarkupResult<RenderedText> {
        let text = self.preprocessor.preprocess(raw_markup);
        Ok(render(&parse(&text)?))
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(Arc::new(StaticTemplateExpander::with_defaults()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_offsets_survive_every_rewrite() {
        let raw = "'''Hermes'''{{Infobox deity|name=Hermes}} is identified with the Roman god\n[[Mercury (mythology)|Mercury]].<ref>Smith</ref>\n{|\n|table\n|}\n* a [[list]] item";
        let out = Normalizer::default().normalize(raw).unwrap();

        assert_eq!(out.links.len(), 2);
        for link in &out.links {
            assert_eq!(&out.text[link.start..link.end], link.title);
        }
        assert_eq!(out.links[0].target_article, "Mercury_(mythology)");
        assert!(!out.text.contains("table"));
        assert!(!out.text.contains("Smith"));
    }

    #[test]
    fn too_deep_markup_fails() {
        let raw = "<span>".repeat(MAX_NESTING_DEPTH + 5);
        assert!(Normalizer::default().normalize(&raw).is_err());
    }
}
