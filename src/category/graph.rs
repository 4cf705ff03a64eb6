//! Category graph traversal

use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{info, warn};

/// Categories, their subcategory edges and their member articles
#[derive(Debug, Default, Clone)]
pub struct CategoryGraph {
    titles: HashMap<String, u64>,
    subcategories: HashMap<u64, Vec<u64>>,
    members: HashMap<u64, Vec<u64>>,
}

impl CategoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a category page (namespace 14) by id and title
    pub fn add_category(&mut self, category_id: u64, title: impl Into<String>) {
        self.titles.insert(title.into(), category_id);
    }

    /// `subcategory_id` is a direct subcategory of `category_id`
    pub fn add_subcategory(&mut self, category_id: u64, subcategory_id: u64) {
        self.subcategories
            .entry(category_id)
            .or_default()
            .push(subcategory_id);
    }

    /// `article_id` is a direct member of `category_id`
    pub fn add_member(&mut self, category_id: u64, article_id: u64) {
        self.members.entry(category_id).or_default().push(article_id);
    }

    pub fn category_id(&self, title: &str) -> Option<u64> {
        self.titles.get(title).copied()
    }

    pub fn category_count(&self) -> usize {
        self.titles.len()
    }

    pub fn titles(&self) -> impl Iterator<Item = (&str, u64)> {
        self.titles.iter().map(|(title, &id)| (title.as_str(), id))
    }

    pub fn subcategory_edges(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.subcategories
            .iter()
            .flat_map(|(&parent, children)| children.iter().map(move |&child| (parent, child)))
    }

    pub fn member_edges(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.members
            .iter()
            .flat_map(|(&category, articles)| articles.iter().map(move |&article| (category, article)))
    }

    /// Every category reachable from `seed` over subcategory edges, seed included.
    ///
    /// Level-by-level traversal with a visited set, so cycles terminate.
    pub fn reachable_categories(&self, seed: u64) -> HashSet<u64> {
        let mut visited: HashSet<u64> = HashSet::new();
        let mut current_level = vec![seed];
        visited.insert(seed);

        while !current_level.is_empty() {
            let mut next_level = Vec::new();
            for category in &current_level {
                let Some(children) = self.subcategories.get(category) else {
                    continue;
                };
                for &child in children {
                    if visited.insert(child) {
                        next_level.push(child);
                    }
                }
            }
            current_level = next_level;
        }

        visited
    }

    /// Articles that are members of the seed category or any of its
    /// transitive subcategories.
    ///
    /// A missing seed category yields an empty set.
    pub fn member_articles(&self, seed_title: &str) -> BTreeSet<u64> {
        let Some(seed) = self.category_id(seed_title) else {
            warn!(category = seed_title, "seed category not found, no pages flagged");
            return BTreeSet::new();
        };

        let categories = self.reachable_categories(seed);
        let articles: BTreeSet<u64> = categories
            .iter()
            .filter_map(|category| self.members.get(category))
            .flatten()
            .copied()
            .collect();

        info!(
            categories = categories.len(),
            articles = articles.len(),
            seed = seed_title,
            "category traversal done"
        );
        articles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> CategoryGraph {
        let mut graph = CategoryGraph::new();
        graph.add_category(1, "Disambiguation_pages");
        graph.add_category(2, "Place_name_disambiguation_pages");
        graph.add_category(3, "Human_name_disambiguation_pages");
        graph.add_category(4, "Planets");
        graph.add_subcategory(1, 2);
        graph.add_subcategory(2, 3);
        graph.add_member(1, 100);
        graph.add_member(3, 101);
        graph.add_member(4, 200);
        graph
    }

    #[test]
    fn flags_transitive_members_only() {
        let flagged = graph().member_articles("Disambiguation_pages");
        assert_eq!(flagged.into_iter().collect::<Vec<_>>(), vec![100, 101]);
    }

    #[test]
    fn cycles_terminate() {
        let mut graph = graph();
        graph.add_subcategory(3, 1);
        graph.add_subcategory(2, 2);

        let reachable = graph.reachable_categories(1);
        assert_eq!(reachable, HashSet::from([1, 2, 3]));
        assert_eq!(graph.member_articles("Disambiguation_pages").len(), 2);
    }

    #[test]
    fn missing_seed_flags_nothing() {
        assert!(graph().member_articles("Nope").is_empty());
    }
}
