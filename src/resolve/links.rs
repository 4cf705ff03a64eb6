//! Title index, redirect flattening and link-target resolution

use crate::corpus::RedirectTarget;
use std::collections::HashMap;
use tracing::debug;

/// Redirect chains are followed this many passes at most
pub const MAX_REDIRECT_PASSES: usize = 3;

/// A link target that exists in the knowledge base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolvedTarget {
    pub article_id: u64,
    /// `None` links the whole article
    pub section_index: Option<usize>,
}

/// Why a link target was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unresolved {
    /// Interwiki links, red links and redirects into the void
    UnknownArticle,
    /// The article exists but has no section with that id
    UnknownSection,
}

/// Everything needed to turn `(title, section id)` link targets into ids.
#[derive(Debug, Default, Clone)]
pub struct LinkResolver {
    articles: HashMap<String, u64>,
    redirects: HashMap<String, RedirectTarget>,
    sections: HashMap<(u64, String), usize>,
}

impl LinkResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_article(&mut self, title: impl Into<String>, article_id: u64) {
        self.articles.insert(title.into(), article_id);
    }

    pub fn add_redirect(&mut self, title: impl Into<String>, target: RedirectTarget) {
        self.redirects.insert(title.into(), target);
    }

    pub fn add_section_id(&mut self, article_id: u64, id_string: impl Into<String>, section_index: usize) {
        self.sections.insert((article_id, id_string.into()), section_index);
    }

    pub fn article_id(&self, title: &str) -> Option<u64> {
        self.articles.get(title).copied()
    }

    pub fn redirect(&self, title: &str) -> Option<&RedirectTarget> {
        self.redirects.get(title)
    }

    pub fn article_count(&self) -> usize {
        self.articles.len()
    }

    pub fn redirect_count(&self) -> usize {
        self.redirects.len()
    }

    /// Collapse redirect chains in place.
    ///
    /// Each pass rewrites every redirect whose destination is itself a
    /// redirect. The section id of the outer redirect is kept when it has
    /// one. Returns the number of rewrites performed.
    pub fn flatten_redirects(&mut self, passes: usize) -> usize {
        let mut titles: Vec<String> = self.redirects.keys().cloned().collect();
        titles.sort();

        let mut rewrites = 0;
        for _ in 0..passes {
            let mut changed = false;
            for title in &titles {
                let Some(current) = self.redirects.get(title) else {
                    continue;
                };
                let Some(next) = self.redirects.get(&current.article) else {
                    continue;
                };
                if next.article == current.article {
                    continue;
                }

                let flattened = RedirectTarget {
                    article: next.article.clone(),
                    section: current.section.clone().or_else(|| next.section.clone()),
                };
                debug!(redirect = %title, to = %flattened.article, "flattened multi-redirect");
                self.redirects.insert(title.clone(), flattened);
                rewrites += 1;
                changed = true;
            }
            if !changed {
                break;
            }
        }
        rewrites
    }

    /// Resolve a link target given as normalized title and section id.
    pub fn resolve(&self, article: &str, section: Option<&str>) -> Result<ResolvedTarget, Unresolved> {
        let mut article = article;
        let mut section = section.filter(|s| !s.is_empty());

        if let Some(redirect) = self.redirects.get(article) {
            article = &redirect.article;
            if section.is_none() {
                section = redirect.section.as_deref().filter(|s| !s.is_empty());
            }
        }

        let article_id = *self.articles.get(article).ok_or(Unresolved::UnknownArticle)?;

        let section_index = match section {
            Some(id) => Some(
                *self
                    .sections
                    .get(&(article_id, id.to_string()))
                    .ok_or(Unresolved::UnknownSection)?,
            ),
            None => None,
        };

        Ok(ResolvedTarget {
            article_id,
            section_index,
        })
    }
}
