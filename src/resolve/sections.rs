//! Section tree construction
//!
//! Sections arrive in document order with their heading level. A stack of
//! open ancestors is popped while its top is at the same or a deeper level;
//! whatever remains on top is the parent.

use crate::title::normalize_section_id;
use std::collections::{HashMap, HashSet};

/// Level of the heading-less lead section
pub const LEAD_SECTION_LEVEL: usize = 2;

/// Position of one section in its article's tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionNode {
    /// Dense, document-order index within the article
    pub index: usize,
    /// Always smaller than `index`
    pub parent: Option<usize>,
    pub level: usize,
    /// Lookup ids: the unique heading id first, then explicit anchors
    pub ids: Vec<String>,
}

/// Builds the section tree and section ids of one article
#[derive(Debug, Default)]
pub struct SectionTreeBuilder {
    stack: Vec<(usize, usize)>,
    next_index: usize,
    id_counts: HashMap<String, usize>,
    used_ids: HashSet<String>,
    used_anchors: HashSet<String>,
}

impl SectionTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next section.
    ///
    /// `title` is the rendered heading text (`None` for the lead section),
    /// `anchors` the raw `id` attributes found inside the heading.
    pub fn push(&mut self, level: usize, title: Option<&str>, anchors: &[String]) -> SectionNode {
        let index = self.next_index;
        self.next_index += 1;

        let mut ids = Vec::new();
        if let Some(title) = title {
            ids.push(self.unique_id(normalize_section_id(title)));
        }
        for anchor in anchors {
            let anchor = normalize_section_id(anchor);
            if self.used_anchors.insert(anchor.clone()) {
                ids.push(anchor);
            }
        }

        while self
            .stack
            .last()
            .is_some_and(|&(_, open_level)| open_level >= level)
        {
            self.stack.pop();
        }
        let parent = self.stack.last().map(|&(parent_index, _)| parent_index);
        self.stack.push((index, level));

        SectionNode {
            index,
            parent,
            level,
            ids,
        }
    }

    /// `base`, or `base_2`, `base_3`, … whichever is free first.
    fn unique_id(&mut self, base: String) -> String {
        let count = self.id_counts.entry(base.clone()).or_insert(0);
        loop {
            *count += 1;
            let candidate = if *count > 1 {
                format!("{}_{}", base, count)
            } else {
                base.clone()
            };
            if self.used_ids.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

/// Paragraph totals including every descendant section.
///
/// `sections` holds `(parent, own_count)` indexed by section index.
pub fn subtree_totals(sections: &[(Option<usize>, u64)]) -> Vec<u64> {
    let mut totals: Vec<u64> = sections.iter().map(|&(_, own)| own).collect();

    for index in (0..sections.len()).rev() {
        if let Some(parent) = sections[index].0 {
            if parent < index {
                totals[parent] += totals[index];
            }
        }
    }

    totals
}
