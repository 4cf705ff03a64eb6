//! Rows of the knowledge base

use crate::corpus::RedirectTarget;
use serde::{Deserialize, Serialize};

/// One dump page: an article or a redirect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleRecord {
    pub id: u64,
    /// Normalized page title
    pub title: String,
    pub group_title: String,
    pub redirect: Option<RedirectTarget>,
}

/// One section of an article
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionRecord {
    pub article_id: u64,
    pub index: usize,
    pub parent: Option<usize>,
    pub level: usize,
    pub title: Option<String>,
    /// Unique heading id followed by explicit anchors
    pub ids: Vec<String>,
}

/// A paragraph that survived tokenization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParagraphRecord {
    pub article_id: u64,
    pub section_index: usize,
    pub paragraph_index: usize,
    pub sentence_count: usize,
    pub token_count: usize,
}

/// A link as found in the text, before its target is resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLinkRecord {
    pub article_id: u64,
    pub section_index: usize,
    pub paragraph_index: usize,
    pub sentence_index: usize,
    /// Byte span relative to the paragraph text
    pub start: usize,
    pub end: usize,
    pub target_article: String,
    pub target_section: Option<String>,
    pub title: String,
}

/// Everything the writer stage persists for a run of pages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageBatch {
    pub articles: Vec<ArticleRecord>,
    pub sections: Vec<SectionRecord>,
    pub paragraphs: Vec<ParagraphRecord>,
    pub raw_links: Vec<RawLinkRecord>,
}

impl PageBatch {
    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
            && self.sections.is_empty()
            && self.paragraphs.is_empty()
            && self.raw_links.is_empty()
    }

    pub fn extend(&mut self, other: PageBatch) {
        self.articles.extend(other.articles);
        self.sections.extend(other.sections);
        self.paragraphs.extend(other.paragraphs);
        self.raw_links.extend(other.raw_links);
    }
}

/// Identity of a paragraph, or of one sentence in it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParagraphKey {
    pub article_id: u64,
    pub section_index: usize,
    pub paragraph_index: usize,
    /// `None` stands for the whole paragraph
    pub sentence_index: Option<usize>,
}

impl ParagraphKey {
    pub fn paragraph(article_id: u64, section_index: usize, paragraph_index: usize) -> Self {
        Self {
            article_id,
            section_index,
            paragraph_index,
            sentence_index: None,
        }
    }

    pub fn sentence(mut self, sentence_index: usize) -> Self {
        self.sentence_index = Some(sentence_index);
        self
    }

    /// `(article, section, paragraph)`, the order token shards are written in
    pub fn paragraph_position(&self) -> (u64, usize, usize) {
        (self.article_id, self.section_index, self.paragraph_index)
    }
}

/// Which split an example belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dataset(pub usize);

impl Dataset {
    pub const TRAIN: Dataset = Dataset(0);

    /// Name used for output files: `train`, `dev`, `test`, then `test2`, …
    pub fn name(&self) -> String {
        match self.0 {
            0 => "train".to_string(),
            1 => "dev".to_string(),
            2 => "test".to_string(),
            n => format!("test{}", n - 1),
        }
    }
}

/// One row of the `data` table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExampleInfo {
    pub key: ParagraphKey,
    pub group_id: usize,
    pub sense_id: usize,
    pub dataset: Dataset,
}

/// Table sizes, for `stats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KnowledgeBaseStats {
    pub articles: u64,
    pub redirects: u64,
    pub disambiguation_pages: u64,
    pub sections: u64,
    pub paragraphs: u64,
    pub links: u64,
    pub categories: u64,
    pub sense_groups: u64,
    pub targets: u64,
    pub senses: u64,
    pub alternative_group_titles: u64,
    pub examples: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_order_whole_paragraph_before_sentences() {
        let whole = ParagraphKey::paragraph(1, 0, 2);
        let first = whole.sentence(0);
        assert!(whole < first);
        assert!(ParagraphKey::paragraph(1, 0, 1).sentence(5) < whole);
        assert_eq!(first.paragraph_position(), (1, 0, 2));
    }

    #[test]
    fn dataset_names() {
        assert_eq!(Dataset::TRAIN.name(), "train");
        assert_eq!(Dataset(1).name(), "dev");
        assert_eq!(Dataset(2).name(), "test");
        assert_eq!(Dataset(3).name(), "test2");
    }
}
