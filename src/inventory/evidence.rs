//! Evidence collected per `(group title, target)` candidate

use crate::resolve::ResolvedTarget;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Heading of the sections whose links never count as senses
pub const SEE_ALSO_TITLE: &str = "see also";
/// How many levels below a "See also" heading are still part of it
pub const SEE_ALSO_DEPTH: usize = 3;

/// A section of a disambiguation page, enough to find "See also" subtrees
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionOutline {
    pub article_id: u64,
    pub index: usize,
    pub parent: Option<usize>,
    pub title: Option<String>,
}

/// A resolved link found on a disambiguation page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLink {
    pub article_id: u64,
    pub section_index: usize,
    pub target: ResolvedTarget,
    pub title: String,
}

/// Distinct mentions of a target whose link text has a given group title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMention {
    pub group_title: String,
    pub target: ResolvedTarget,
    pub count: u64,
}

/// Everything the inventory builder reads from the knowledge base
#[derive(Debug, Clone, Default)]
pub struct InventoryInput {
    /// Disambiguation page id → its group title
    pub disambiguation_pages: HashMap<u64, String>,
    /// Sections of disambiguation pages
    pub disambiguation_sections: Vec<SectionOutline>,
    /// Links on disambiguation pages
    pub disambiguation_links: Vec<PageLink>,
    /// Mentions outside disambiguation pages, per link-text group title
    pub group_mentions: Vec<GroupMention>,
    /// Distinct mentions outside disambiguation pages, per target
    pub target_mentions: HashMap<ResolvedTarget, u64>,
    /// Paragraph volume: article total or section subtree total
    pub volumes: HashMap<ResolvedTarget, u64>,
    /// `(group title of redirect, disambiguation page id)` for redirects into
    /// disambiguation pages
    pub disambiguation_redirects: Vec<(String, u64)>,
}

/// Evidence for one candidate sense
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenseEvidence {
    /// Listed (and not ignored) on the group's disambiguation page
    pub on_disambiguation_page: bool,
    pub volume: u64,
    /// Mentions whose link text has the group title
    pub matching: u64,
    /// Other mentions of the same target
    pub other: u64,
}

impl SenseEvidence {
    pub fn total(&self) -> u64 {
        self.volume + self.matching + self.other
    }
}

/// `(article, section)` pairs lying in a "See also" subtree of a disambiguation page
pub fn see_also_sections(sections: &[SectionOutline]) -> HashSet<(u64, usize)> {
    let mut by_parent: HashMap<(u64, usize), Vec<usize>> = HashMap::new();
    let mut found: HashSet<(u64, usize)> = HashSet::new();
    let mut level: Vec<(u64, usize)> = Vec::new();

    for section in sections {
        if let Some(parent) = section.parent {
            by_parent
                .entry((section.article_id, parent))
                .or_default()
                .push(section.index);
        }
        let is_root = section
            .title
            .as_deref()
            .is_some_and(|title| title.to_lowercase() == SEE_ALSO_TITLE);
        if is_root {
            level.push((section.article_id, section.index));
        }
    }

    found.extend(level.iter().copied());
    for _ in 0..SEE_ALSO_DEPTH {
        let mut next = Vec::new();
        for &(article_id, index) in &level {
            if let Some(children) = by_parent.get(&(article_id, index)) {
                for &child in children {
                    if found.insert((article_id, child)) {
                        next.push((article_id, child));
                    }
                }
            }
        }
        level = next;
    }

    found
}

/// Merge all evidence sources into one row per `(group title, target)`.
pub fn collect_evidence(input: &InventoryInput) -> BTreeMap<(String, ResolvedTarget), SenseEvidence> {
    let mut rows: BTreeMap<(String, ResolvedTarget), SenseEvidence> = BTreeMap::new();

    for mention in &input.group_mentions {
        let total = input.target_mentions.get(&mention.target).copied().unwrap_or(mention.count);
        let row = rows
            .entry((mention.group_title.clone(), mention.target))
            .or_default();
        row.matching = row.matching.max(mention.count);
        row.other = row.other.max(total.saturating_sub(mention.count));
    }

    let see_also = see_also_sections(&input.disambiguation_sections);
    for link in &input.disambiguation_links {
        let Some(page_group) = input.disambiguation_pages.get(&link.article_id) else {
            continue;
        };
        let in_see_also = see_also.contains(&(link.article_id, link.section_index));
        let names_group = link.title.to_lowercase().contains(page_group.as_str());
        if in_see_also || !names_group {
            continue;
        }
        rows.entry((page_group.clone(), link.target))
            .or_default()
            .on_disambiguation_page = true;
    }

    for ((_, target), row) in rows.iter_mut() {
        row.volume = input.volumes.get(target).copied().unwrap_or(0);
    }

    rows
}
