//! Page parsing: sections, headings and paragraphs of one article

use super::sections::{SectionNode, SectionTreeBuilder, LEAD_SECTION_LEVEL};
use crate::corpus::RawPage;
use crate::markup::{
    anchor_ids, parse, parse_heading, plain_text, render, split_paragraphs, MarkupResult,
    Paragraph, Preprocessor,
};
use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

fn heading_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^=+.*?=+\s*$").expect("valid heading regex"))
}

/// One section of a parsed article
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSection {
    pub node: SectionNode,
    /// Rendered heading text; `None` for the lead section
    pub title: Option<String>,
    pub paragraphs: Vec<Paragraph>,
}

/// A fully parsed article
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPage {
    pub id: u64,
    pub title: String,
    pub sections: Vec<ParsedSection>,
    /// Paragraphs dropped by the prose filters
    pub skipped_paragraphs: usize,
    /// Sections whose body could not be parsed
    pub failed_sections: usize,
}

impl ParsedPage {
    pub fn paragraph_count(&self) -> usize {
        self.sections.iter().map(|s| s.paragraphs.len()).sum()
    }
}

/// Split preprocessed page text into section chunks.
///
/// A chunk starts at every heading line; whitespace-only chunks are dropped.
pub fn split_sections(text: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let bare = line.trim_end_matches(['\n', '\r']);
        if heading_line().is_match(bare) && offset > start {
            chunks.push(&text[start..offset]);
            start = offset;
        }
        offset += line.len();
    }
    chunks.push(&text[start..]);

    chunks
        .into_iter()
        .filter(|chunk| !chunk.trim().is_empty())
        .collect()
}

/// Heading line and body of a section chunk
fn split_heading(chunk: &str) -> (Option<&str>, &str) {
    let first_line_end = chunk.find('\n').map_or(chunk.len(), |i| i + 1);
    let first_line = &chunk[..first_line_end];
    if heading_line().is_match(first_line.trim_end_matches(['\n', '\r'])) {
        (Some(first_line), &chunk[first_line_end..])
    } else {
        (None, chunk)
    }
}

/// Turns raw article pages into section trees with paragraphs
#[derive(Clone)]
pub struct PageParser {
    preprocessor: Preprocessor,
}

impl PageParser {
    pub fn new(preprocessor: Preprocessor) -> Self {
        Self { preprocessor }
    }

    /// Parse one article.
    ///
    /// A section whose markup cannot be parsed keeps its place in the tree
    /// (so indices stay dense) but contributes no paragraphs.
    pub fn parse(&self, page: &RawPage) -> ParsedPage {
        let text = self.preprocessor.preprocess(&page.text);

        let mut tree = SectionTreeBuilder::new();
        let mut sections = Vec::new();
        let mut skipped_paragraphs = 0;
        let mut failed_sections = 0;

        for chunk in split_sections(&text) {
            let (heading_src, body) = split_heading(chunk);

            let heading = match heading_src.map(parse_heading).transpose() {
                Ok(heading) => heading.flatten(),
                Err(e) => {
                    warn!(page_id = page.id, title = %page.title, error = %e, "unparsable heading");
                    None
                }
            };

            let (level, title, anchors) = match &heading {
                Some(heading) => (
                    heading.level,
                    Some(plain_text(&heading.title).trim().to_string()),
                    anchor_ids(&heading.title),
                ),
                None => (LEAD_SECTION_LEVEL, None, Vec::new()),
            };

            let node = tree.push(level, title.as_deref(), &anchors);

            let paragraphs = match self.section_paragraphs(body) {
                Ok((paragraphs, skipped)) => {
                    skipped_paragraphs += skipped;
                    paragraphs
                }
                Err(e) => {
                    warn!(
                        page_id = page.id,
                        title = %page.title,
                        section = node.index,
                        error = %e,
                        "skipping section with unparsable markup"
                    );
                    failed_sections += 1;
                    Vec::new()
                }
            };

            sections.push(ParsedSection {
                node,
                title,
                paragraphs,
            });
        }

        ParsedPage {
            id: page.id,
            title: page.title.clone(),
            sections,
            skipped_paragraphs,
            failed_sections,
        }
    }

    fn section_paragraphs(&self, body: &str) -> MarkupResult<(Vec<Paragraph>, usize)> {
        let rendered = render(&parse(body)?);
        let split = split_paragraphs(&rendered);
        Ok((split.paragraphs, split.skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::{StaticTemplateExpander, MAX_NESTING_DEPTH};
    use std::sync::Arc;

    fn parser() -> PageParser {
        PageParser::new(Preprocessor::new(Arc::new(
            StaticTemplateExpander::with_defaults(),
        )))
    }

    fn page(text: &str) -> RawPage {
        RawPage {
            id: 7,
            title: "Hermes".to_string(),
            namespace: 0,
            text: text.to_string(),
            model: Some("wikitext".to_string()),
            format: Some("text/x-wiki".to_string()),
        }
    }

    #[test]
    fn splits_lead_and_headed_sections() {
        let chunks = split_sections("lead text\n== A ==\nbody a\n=== B ===\nbody b\n");
        assert_eq!(chunks, vec!["lead text\n", "== A ==\nbody a\n", "=== B ===\nbody b\n"]);
    }

    #[test]
    fn whitespace_only_lead_is_not_a_section() {
        let chunks = split_sections("\n  \n== A ==\nbody\n");
        assert_eq!(chunks, vec!["== A ==\nbody\n"]);
    }

    #[test]
    fn parses_sections_paragraphs_and_links() {
        let text = "'''Hermes''' is an Olympian deity in ancient Greek religion and mythology.\n\n\
                    == Roman counterpart ==\n\
                    In Roman religion he was identified with the god [[Mercury (mythology)|Mercury]] of trade.\n\n\
                    === Worship <span id=\"Cult\"></span> ===\n\
                    Short.\n";
        let parsed = parser().parse(&page(text));

        assert_eq!(parsed.sections.len(), 3);
        assert_eq!(parsed.sections[0].title, None);
        assert_eq!(parsed.sections[0].paragraphs.len(), 1);

        let roman = &parsed.sections[1];
        assert_eq!(roman.title.as_deref(), Some("Roman counterpart"));
        assert_eq!(roman.node.ids, vec!["Roman_counterpart"]);
        let link = &roman.paragraphs[0].links[0];
        assert_eq!(link.title, "Mercury");
        assert_eq!(link.target_article, "Mercury_(mythology)");

        let worship = &parsed.sections[2];
        assert_eq!(worship.node.parent, Some(1));
        assert_eq!(worship.node.ids, vec!["Worship", "Cult"]);
        assert!(worship.paragraphs.is_empty());
        assert_eq!(parsed.skipped_paragraphs, 1);
    }

    #[test]
    fn unparsable_section_keeps_its_index() {
        let deep = "<span>".repeat(MAX_NESTING_DEPTH + 2);
        let text = format!(
            "Lead paragraph about the messenger of the gods.\n== Broken ==\n{}\n== After ==\nA later paragraph with enough words in it.\n",
            deep
        );
        let parsed = parser().parse(&page(&text));

        assert_eq!(parsed.failed_sections, 1);
        assert_eq!(parsed.sections.len(), 3);
        assert!(parsed.sections[1].paragraphs.is_empty());
        assert_eq!(parsed.sections[2].node.index, 2);
        assert_eq!(parsed.sections[2].paragraphs.len(), 1);
    }
}
