//! Link/section resolver
//!
//! - [`page`]: raw article → section tree with paragraphs and link spans
//! - [`sections`]: heading-level stack, unique section ids, subtree totals
//! - [`links`]: title index, redirect flattening, `(title, section)` → ids

pub mod links;
pub mod page;
pub mod sections;

pub use links::{LinkResolver, ResolvedTarget, Unresolved, MAX_REDIRECT_PASSES};
pub use page::{split_sections, PageParser, ParsedPage, ParsedSection};
pub use sections::{subtree_totals, SectionNode, SectionTreeBuilder, LEAD_SECTION_LEVEL};

/// Index of the sentence a link starting at `link_start` belongs to.
///
/// `sentence_ends` are the ascending end offsets of a paragraph's sentences.
/// A link belongs to the first sentence ending after its start; links past
/// the last sentence belong nowhere.
pub fn sentence_of(sentence_ends: &[usize], link_start: usize) -> Option<usize> {
    let index = sentence_ends.partition_point(|&end| end <= link_start);
    (index < sentence_ends.len()).then_some(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_attach_to_first_sentence_ending_after_start() {
        let ends = [20, 45, 60];
        assert_eq!(sentence_of(&ends, 0), Some(0));
        assert_eq!(sentence_of(&ends, 19), Some(0));
        assert_eq!(sentence_of(&ends, 20), Some(1));
        assert_eq!(sentence_of(&ends, 59), Some(2));
        assert_eq!(sentence_of(&ends, 60), None);
        assert_eq!(sentence_of(&[], 0), None);
    }
}
