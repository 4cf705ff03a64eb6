//! Sense selection and deterministic id assignment

use super::evidence::{collect_evidence, InventoryInput, SenseEvidence};
use crate::resolve::ResolvedTarget;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::info;

/// Thresholds a candidate has to pass to become a sense
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseThresholds {
    /// Minimum of volume + matching + other
    pub min_evidence: u64,
    /// Mentions with the group title needed when the page does not list the target
    pub min_matching_mentions: u64,
}

impl Default for SenseThresholds {
    fn default() -> Self {
        Self {
            min_evidence: 14,
            min_matching_mentions: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenseGroup {
    pub id: usize,
    pub title: String,
    pub evidence: u64,
}

/// A distinct `(article, section)` that is a sense of at least one group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseTarget {
    pub id: usize,
    pub target: ResolvedTarget,
    pub evidence: u64,
}

/// Membership of a target in a group; `id` is the sense id used everywhere else
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sense {
    pub id: usize,
    pub group_id: usize,
    pub target_id: usize,
    pub target: ResolvedTarget,
    pub evidence: SenseEvidence,
}

/// Result of one inventory build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenseInventory {
    pub groups: Vec<SenseGroup>,
    pub targets: Vec<SenseTarget>,
    pub senses: Vec<Sense>,
    /// `(alternative title, group id)`, sorted by title
    pub alternative_titles: Vec<(String, usize)>,
}

impl SenseInventory {
    /// Sense ids of every group, ascending
    pub fn senses_by_group(&self) -> BTreeMap<usize, Vec<usize>> {
        let mut by_group: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for sense in &self.senses {
            by_group.entry(sense.group_id).or_default().push(sense.id);
        }
        for ids in by_group.values_mut() {
            ids.sort_unstable();
        }
        by_group
    }
}

/// Select senses and assign group, target and sense ids.
///
/// Ids are contiguous from 0 and ordered by descending evidence. Ties fall
/// back to group title, then article id, then section index, so rebuilding
/// from the same links yields the same ids.
pub fn build_inventory(input: &InventoryInput, thresholds: SenseThresholds) -> SenseInventory {
    let disambiguation_groups: HashSet<&str> = input
        .disambiguation_pages
        .values()
        .map(String::as_str)
        .collect();

    let raw_senses: Vec<((String, ResolvedTarget), SenseEvidence)> = collect_evidence(input)
        .into_iter()
        .filter(|((group, _), evidence)| {
            disambiguation_groups.contains(group.as_str())
                && evidence.total() >= thresholds.min_evidence
                && (evidence.on_disambiguation_page
                    || evidence.matching >= thresholds.min_matching_mentions)
        })
        .collect();

    let mut group_totals: HashMap<&str, u64> = HashMap::new();
    let mut target_totals: HashMap<ResolvedTarget, u64> = HashMap::new();
    for ((group, target), evidence) in &raw_senses {
        *group_totals.entry(group.as_str()).or_default() += evidence.total();
        *target_totals.entry(*target).or_default() += evidence.total();
    }

    let mut group_order: Vec<(&str, u64)> = group_totals.into_iter().collect();
    group_order.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let groups: Vec<SenseGroup> = group_order
        .iter()
        .enumerate()
        .map(|(id, &(title, evidence))| SenseGroup {
            id,
            title: title.to_string(),
            evidence,
        })
        .collect();
    let group_ids: HashMap<&str, usize> = groups
        .iter()
        .map(|group| (group.title.as_str(), group.id))
        .collect();

    let mut target_order: Vec<(ResolvedTarget, u64)> = target_totals.into_iter().collect();
    target_order.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let targets: Vec<SenseTarget> = target_order
        .iter()
        .enumerate()
        .map(|(id, &(target, evidence))| SenseTarget {
            id,
            target,
            evidence,
        })
        .collect();
    let target_ids: HashMap<ResolvedTarget, usize> =
        targets.iter().map(|t| (t.target, t.id)).collect();

    let mut sense_order: Vec<&((String, ResolvedTarget), SenseEvidence)> = raw_senses.iter().collect();
    sense_order.sort_by(|a, b| {
        b.1.total()
            .cmp(&a.1.total())
            .then_with(|| a.0 .0.cmp(&b.0 .0))
            .then_with(|| a.0 .1.cmp(&b.0 .1))
    });
    let senses: Vec<Sense> = sense_order
        .into_iter()
        .enumerate()
        .map(|(id, ((group, target), evidence))| Sense {
            id,
            group_id: group_ids[group.as_str()],
            target_id: target_ids[target],
            target: *target,
            evidence: *evidence,
        })
        .collect();

    let alternative_titles = alternative_titles(input, &group_ids);

    info!(
        groups = groups.len(),
        targets = targets.len(),
        senses = senses.len(),
        alternatives = alternative_titles.len(),
        "built sense inventory"
    );

    SenseInventory {
        groups,
        targets,
        senses,
        alternative_titles,
    }
}

/// Group titles of redirects into disambiguation pages.
///
/// An alternative that would name more than one group, or that already is a
/// group title, is dropped.
fn alternative_titles(input: &InventoryInput, group_ids: &HashMap<&str, usize>) -> Vec<(String, usize)> {
    let mut candidates: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

    for (redirect_group, page_id) in &input.disambiguation_redirects {
        let Some(page_group) = input.disambiguation_pages.get(page_id) else {
            continue;
        };
        if redirect_group == page_group {
            continue;
        }
        candidates
            .entry(redirect_group.as_str())
            .or_default()
            .insert(page_group.as_str());
    }

    candidates
        .into_iter()
        .filter(|(alternative, canonical)| {
            canonical.len() == 1 && !group_ids.contains_key(alternative)
        })
        .filter_map(|(alternative, canonical)| {
            let canonical = canonical.into_iter().next()?;
            let group_id = *group_ids.get(canonical)?;
            Some((alternative.to_string(), group_id))
        })
        .collect()
}
