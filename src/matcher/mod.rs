//! Ambiguous-span matcher
//!
//! Finds every token span whose lower-cased text is a known group title.
//! Phrases live in one sorted array; growing a phrase token by token only
//! ever moves the binary-search cursor forward, and growth stops as soon as
//! the phrase is no longer a prefix of the entry under the cursor.

use crate::storage::AmbiguousGroup;
use crate::tokenize::Token;
use std::collections::BTreeMap;

/// POS tags that make a span eligible
pub const ALLOWED_POS_TAGS: &[&str] = &["NN", "NNS", "NNP", "NNPS", "FW"];

/// A matched span and the senses it may refer to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousRange {
    /// Byte offsets of the first token's start and last token's end
    pub start: usize,
    pub end: usize,
    /// Sorted, unique
    pub candidates: Vec<usize>,
}

fn is_allowed(pos: Option<&str>) -> bool {
    pos.is_some_and(|pos| ALLOWED_POS_TAGS.contains(&pos))
}

/// Sorted phrase array with the candidate senses of each phrase
#[derive(Debug, Clone, Default)]
pub struct PhraseIndex {
    phrases: Vec<String>,
    candidates: Vec<Vec<usize>>,
}

impl PhraseIndex {
    /// Build from `(phrase, sense ids)` pairs. Phrases are lower-cased; a
    /// phrase given more than once gets the union of its sense ids.
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<usize>)>,
    {
        let mut merged: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (phrase, senses) in entries {
            if phrase.is_empty() {
                continue;
            }
            merged.entry(phrase.to_lowercase()).or_default().extend(senses);
        }

        let mut phrases = Vec::with_capacity(merged.len());
        let mut candidates = Vec::with_capacity(merged.len());
        for (phrase, mut senses) in merged {
            senses.sort_unstable();
            senses.dedup();
            phrases.push(phrase);
            candidates.push(senses);
        }

        Self { phrases, candidates }
    }

    /// Index every title of groups that have at least two senses
    pub fn from_groups(groups: &[AmbiguousGroup]) -> Self {
        Self::new(
            groups
                .iter()
                .filter(|group| group.sense_ids.len() >= 2)
                .flat_map(|group| {
                    group
                        .titles
                        .iter()
                        .map(move |title| (title.clone(), group.sense_ids.clone()))
                }),
        )
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    pub fn candidates(&self, phrase: &str) -> Option<&[usize]> {
        self.phrases
            .binary_search_by(|p| p.as_str().cmp(phrase))
            .ok()
            .map(|index| self.candidates[index].as_slice())
    }

    /// First index at or after `lo` whose phrase is not less than `phrase`
    fn lower_bound(&self, phrase: &str, lo: usize) -> usize {
        lo + self.phrases[lo..].partition_point(|p| p.as_str() < phrase)
    }

    /// All ambiguous ranges of one segment, by start token then length.
    ///
    /// A phrase is composed as the first token's value followed by
    /// `before + value` of each further token, lower-cased. A span qualifies
    /// when any of its tokens has an allowed POS tag, or the first token has
    /// no tag at all. Every qualifying length is reported, not only the
    /// longest.
    pub fn find(&self, tokens: &[Token]) -> Vec<AmbiguousRange> {
        let mut ranges = Vec::new();

        for (i, first) in tokens.iter().enumerate() {
            let mut phrase = first.value.to_lowercase();
            let start = first.start;
            let mut end = first.end;
            let mut allowed = first.pos.is_none() || is_allowed(first.pos.as_deref());
            let mut cursor = self.lower_bound(&phrase, 0);
            let mut next = i + 1;

            while let Some(at_cursor) = self.phrases.get(cursor) {
                if !at_cursor.starts_with(phrase.as_str()) {
                    break;
                }
                if *at_cursor == phrase && allowed {
                    ranges.push(AmbiguousRange {
                        start,
                        end,
                        candidates: self.candidates[cursor].clone(),
                    });
                }

                let Some(token) = tokens.get(next) else {
                    break;
                };
                next += 1;

                phrase.push_str(&token.before.to_lowercase());
                phrase.push_str(&token.value.to_lowercase());
                end = token.end;
                allowed = allowed || is_allowed(token.pos.as_deref());
                cursor = self.lower_bound(&phrase, cursor);
            }
        }

        ranges
    }
}
