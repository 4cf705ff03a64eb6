//! Text → disambiguated spans

use super::cache::SenseUrlCache;
use super::scorer::{check_ranking, Scorer};
use super::{ServingError, ServingResult};
use crate::config::ServingConfig;
use crate::matcher::{AmbiguousRange, PhraseIndex};
use crate::storage::SenseLookup;
use crate::tokenize::{FeatureDescriptor, Sentence, Token, Tokenizer, TokenizerPool};
use regex::Regex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// An ambiguous span resolved to one sense
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisambiguatedSpan {
    pub start: usize,
    pub end: usize,
    pub sense_id: usize,
    pub url: String,
}

fn paragraph_break() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s*\n\s*\n\s*").expect("valid paragraph break regex"))
}

/// Cut text into `(offset, paragraph)` at blank lines; empty paragraphs are dropped
pub fn split_input_paragraphs(text: &str) -> Vec<(usize, &str)> {
    let mut paragraphs = Vec::new();
    let mut start = 0;
    for gap in paragraph_break().find_iter(text) {
        if gap.start() > start {
            paragraphs.push((start, &text[start..gap.start()]));
        }
        start = gap.end();
    }
    if start < text.len() {
        paragraphs.push((start, &text[start..]));
    }
    paragraphs
}

/// Sentences, or whole paragraphs, depending on the descriptor
pub fn into_segments(paragraphs: Vec<Vec<Sentence>>, uses_sentences: bool) -> Vec<Vec<Token>> {
    if uses_sentences {
        paragraphs.into_iter().flatten().collect()
    } else {
        paragraphs
            .into_iter()
            .map(|sentences| sentences.into_iter().flatten().collect())
            .collect()
    }
}

/// Match one segment, score its candidates once, and give every range the
/// best ranked sense among its own candidates.
fn resolve_segment(
    index: &PhraseIndex,
    scorer: &dyn Scorer,
    descriptor: &FeatureDescriptor,
    urls: &mut SenseUrlCache,
    tokens: &[Token],
) -> ServingResult<Vec<DisambiguatedSpan>> {
    let ranges: Vec<AmbiguousRange> = index.find(tokens);
    if ranges.is_empty() {
        return Ok(Vec::new());
    }

    let mut candidates: Vec<usize> = ranges
        .iter()
        .flat_map(|range| range.candidates.iter().copied())
        .collect();
    candidates.sort_unstable();
    candidates.dedup();

    let features = descriptor.prepare_tokens(tokens);
    let ranking = scorer.rank(&features, &candidates)?;
    check_ranking(&candidates, &ranking)?;

    let mut spans = Vec::with_capacity(ranges.len());
    for range in &ranges {
        let best = ranking
            .iter()
            .map(|&(_, sense_id)| sense_id)
            .find(|sense_id| range.candidates.binary_search(sense_id).is_ok());
        let Some(sense_id) = best else {
            continue;
        };
        match urls.url(sense_id)? {
            Some(url) => spans.push(DisambiguatedSpan {
                start: range.start,
                end: range.end,
                sense_id,
                url,
            }),
            None => warn!(sense_id, "sense has no location, span dropped"),
        }
    }
    Ok(spans)
}

/// One display line per span, ordered by start then longest first; a span
/// inside the previous top-level span is shown as a nested `+->` line.
pub fn format_spans(text: &str, spans: &[DisambiguatedSpan]) -> Vec<String> {
    let mut ordered: Vec<&DisambiguatedSpan> = spans.iter().collect();
    ordered.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

    let mut outer = (0, 0);
    ordered
        .into_iter()
        .map(|span| {
            let nested = outer.0 <= span.start && span.end <= outer.1;
            if !nested {
                outer = (span.start, span.end);
            }
            let word = text.get(span.start..span.end).unwrap_or("");
            let prefix = if nested { "  +-> " } else { "* " };
            format!("{}{} ({}-{}) - {}", prefix, word, span.start, span.end, span.url)
        })
        .collect()
}

type SegmentResult = ServingResult<Vec<DisambiguatedSpan>>;

struct SegmentJob {
    id: u64,
    tokens: Vec<Token>,
    reply: mpsc::Sender<(u64, SegmentResult)>,
}

/// Resolves ambiguous phrases in free text.
///
/// Holds a tokenizer pool and a pool of disambiguation workers; each worker
/// owns its own sense URL cache. Must be created inside a tokio runtime.
pub struct Disambiguator {
    descriptor: FeatureDescriptor,
    tokenizer: TokenizerPool,
    segments: Option<mpsc::Sender<SegmentJob>>,
    workers: Vec<JoinHandle<()>>,
    next_id: AtomicU64,
    phrase_count: usize,
}

impl Disambiguator {
    pub fn new(
        lookup: Arc<dyn SenseLookup>,
        scorer: Arc<dyn Scorer>,
        tokenizer: Arc<dyn Tokenizer>,
        descriptor: FeatureDescriptor,
        config: &ServingConfig,
    ) -> ServingResult<Self> {
        let index = Arc::new(PhraseIndex::from_groups(&lookup.ambiguous_groups()?));
        let phrase_count = index.len();
        info!(phrases = phrase_count, workers = config.workers, "disambiguator ready");

        let (tx, rx) = mpsc::channel::<SegmentJob>(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let index = Arc::clone(&index);
                let scorer = Arc::clone(&scorer);
                let mut urls = SenseUrlCache::new(
                    Arc::clone(&lookup),
                    config.base_url.clone(),
                    config.url_cache_capacity,
                );
                tokio::task::spawn_blocking(move || {
                    loop {
                        let job = rx.blocking_lock().blocking_recv();
                        let Some(job) = job else {
                            break;
                        };
                        let result =
                            resolve_segment(&index, scorer.as_ref(), &descriptor, &mut urls, &job.tokens);
                        // the caller may have given up on the request
                        let _ = job.reply.blocking_send((job.id, result));
                    }
                    debug!(worker, cached_urls = urls.len(), "disambiguation worker stopped");
                })
            })
            .collect();

        Ok(Self {
            descriptor,
            tokenizer: TokenizerPool::new(tokenizer, config.tokenizer_workers, config.queue_capacity),
            segments: Some(tx),
            workers,
            next_id: AtomicU64::new(0),
            phrase_count,
        })
    }

    /// Number of indexed phrases
    pub fn phrase_count(&self) -> usize {
        self.phrase_count
    }

    pub fn descriptor(&self) -> &FeatureDescriptor {
        &self.descriptor
    }

    /// Resolve every ambiguous phrase of `text`; results may overlap and are
    /// sorted by start offset. Paragraphs that fail tokenization are skipped.
    pub async fn disambiguate(&self, text: &str) -> ServingResult<Vec<DisambiguatedSpan>> {
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let paragraphs: Vec<(usize, String)> = split_input_paragraphs(text)
            .into_iter()
            .map(|(offset, paragraph)| (offset, paragraph.to_string()))
            .collect();
        let tokenized = self.tokenizer.tokenize(paragraphs).await?;

        let mut sentences = Vec::with_capacity(tokenized.len());
        for (i, result) in tokenized.into_iter().enumerate() {
            match result {
                Ok(paragraph) => sentences.push(paragraph),
                Err(e) => warn!(paragraph = i, error = %e, "skipping paragraph"),
            }
        }

        self.disambiguate_segments(into_segments(sentences, self.descriptor.uses_sentences))
            .await
    }

    /// Resolve already tokenized segments
    pub async fn disambiguate_segments(&self, segments: Vec<Vec<Token>>) -> ServingResult<Vec<DisambiguatedSpan>> {
        let count = segments.len();
        if count == 0 {
            return Ok(Vec::new());
        }
        let jobs = self.segments.as_ref().ok_or(ServingError::Closed)?;

        let first_id = self.next_id.fetch_add(count as u64, Ordering::SeqCst);
        let (reply_tx, mut reply_rx) = mpsc::channel(count);
        for (i, tokens) in segments.into_iter().enumerate() {
            let job = SegmentJob {
                id: first_id + i as u64,
                tokens,
                reply: reply_tx.clone(),
            };
            jobs.send(job).await.map_err(|_| ServingError::Closed)?;
        }
        drop(reply_tx);

        let mut spans = Vec::new();
        for _ in 0..count {
            let Some((_, result)) = reply_rx.recv().await else {
                return Err(ServingError::Closed);
            };
            spans.extend(result?);
        }
        spans.sort_by_key(|span| (span.start, span.end));
        Ok(spans)
    }

    /// Stop every worker and wait for them
    pub async fn shutdown(mut self) -> ServingResult<()> {
        self.segments.take();
        for worker in self.workers.drain(..) {
            worker.await?;
        }
        self.tokenizer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_split_at_blank_lines() {
        let text = "First one.\n\n  Second\nstill second.\n \n\nThird";
        let paragraphs = split_input_paragraphs(text);
        assert_eq!(
            paragraphs,
            vec![(0, "First one."), (14, "Second\nstill second."), (38, "Third")]
        );
        assert!(split_input_paragraphs("\n\n").is_empty());
    }

    #[test]
    fn nested_spans_are_indented() {
        let span = |start, end, url: &str| DisambiguatedSpan {
            start,
            end,
            sense_id: 0,
            url: url.to_string(),
        };
        let text = "new york city mayor";
        let lines = format_spans(
            text,
            &[span(0, 8, "u/New_York"), span(14, 19, "u/Mayor"), span(0, 13, "u/New_York_City")],
        );
        assert_eq!(
            lines,
            vec![
                "* new york city (0-13) - u/New_York_City",
                "  +-> new york (0-8) - u/New_York",
                "* mayor (14-19) - u/Mayor",
            ]
        );
    }

    #[test]
    fn segments_follow_the_descriptor() {
        let sentence = |start: usize| vec![Token::new(start, start + 1, "x")];
        let paragraphs = vec![vec![sentence(0), sentence(2)], vec![sentence(5)]];

        let by_sentence = into_segments(paragraphs.clone(), true);
        assert_eq!(by_sentence.len(), 3);

        let by_paragraph = into_segments(paragraphs, false);
        assert_eq!(by_paragraph.len(), 2);
        assert_eq!(by_paragraph[0].len(), 2);
    }
}
