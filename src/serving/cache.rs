//! Sense id → URL lookup with a bounded per-worker cache

use crate::storage::{SenseLocation, SenseLookup, StorageResult};
use crate::title::normalize_section_id;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// URL of a sense: the article, plus the section anchor for section senses
pub fn sense_url(base_url: &str, location: &SenseLocation) -> String {
    let mut url = format!("{}{}", base_url, location.article_title);
    if let Some(section) = &location.section_title {
        url.push('#');
        url.push_str(&normalize_section_id(section));
    }
    url
}

/// Owned by one worker and dropped with it
pub struct SenseUrlCache {
    lookup: Arc<dyn SenseLookup>,
    base_url: String,
    urls: LruCache<usize, String>,
}

impl SenseUrlCache {
    pub fn new(lookup: Arc<dyn SenseLookup>, base_url: impl Into<String>, capacity: usize) -> Self {
        Self {
            lookup,
            base_url: base_url.into(),
            urls: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// URL of a sense, or `None` for an unknown sense id
    pub fn url(&mut self, sense_id: usize) -> StorageResult<Option<String>> {
        if let Some(url) = self.urls.get(&sense_id) {
            return Ok(Some(url.clone()));
        }

        let Some(location) = self.lookup.sense_location(sense_id)? else {
            return Ok(None);
        };
        let url = sense_url(&self.base_url, &location);
        self.urls.put(sense_id, url.clone());
        Ok(Some(url))
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}
