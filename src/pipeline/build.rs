//! The build run: dump → knowledge base + token shards
//!
//! ```text
//! reader ─▶ parse workers ─▶ tokenize workers ─▶ collector ─┬─▶ KB writer
//!                                                           └─▶ shard writers (one per shard)
//! ```
//!
//! The collector restores dump order with a [`ReorderBuffer`], so batches
//! and shards are written in the order pages appear in the dump. The
//! category `page` table is imported while the dump is read. Once every
//! stage has drained, links are resolved and the sense inventory, example
//! assignments and build state are written.

use super::shards::{shard_of, shard_path, ShardWriter};
use super::{first_failure, PipelineError, PipelineResult, ReorderBuffer};
use crate::category::{import_categories, import_category_links, open_sql_dump, CategoryGraph};
use crate::config::PipelineConfig;
use crate::corpus::{DumpPage, DumpReader, RedirectPage};
use crate::inventory::{build_inventory, SenseThresholds};
use crate::markup::paragraph::MIN_PARAGRAPH_TOKENS;
use crate::markup::{Preprocessor, TemplateExpander};
use crate::partition::Partitioner;
use crate::resolve::{sentence_of, PageParser, ParsedPage};
use crate::storage::{
    ArticleRecord, KnowledgeBase, PageBatch, ParagraphKey, ParagraphRecord, RawLinkRecord,
    SectionRecord,
};
use crate::title::{group_title, normalize_page_title};
use crate::tokenize::{Sentence, Tokenizer};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

const PROGRESS_EVERY: u64 = 10_000;

/// Files a build reads and writes
#[derive(Debug, Clone)]
pub struct BuildInputs {
    /// XML page dump, optionally `.bz2`
    pub dump: PathBuf,
    /// `page` table SQL dump, optionally `.gz`
    pub page_table: PathBuf,
    /// `categorylinks` table SQL dump, optionally `.gz`
    pub categorylinks: PathBuf,
    /// Directory receiving the token shards
    pub output_dir: PathBuf,
}

/// Counters of one build run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub pages: u64,
    pub articles: u64,
    pub redirects: u64,
    pub skipped_non_wikitext: u64,
    /// Paragraphs kept after tokenization
    pub paragraphs: u64,
    /// Paragraphs dropped by the prose filters
    pub filtered_paragraphs: u64,
    pub failed_sections: u64,
    pub untokenized_paragraphs: u64,
    pub short_paragraphs: u64,
    pub raw_links: u64,
    pub categories: u64,
    pub disambiguation_pages: u64,
    pub resolved_links: u64,
    pub unknown_link_articles: u64,
    pub unknown_link_sections: u64,
    pub sense_groups: u64,
    pub senses: u64,
    pub examples: u64,
    pub held_out: u64,
    pub shortfalls: u64,
}

enum ParsedItem {
    Article(ParsedPage),
    Redirect(ArticleRecord),
}

/// Everything the downstream stages need from one page
#[derive(Default)]
struct PageOutput {
    batch: PageBatch,
    paragraphs: Vec<(ParagraphKey, Vec<Sentence>)>,
    is_redirect: bool,
    filtered: usize,
    failed_sections: usize,
    untokenized: usize,
    short: usize,
}

fn redirect_record(page: RedirectPage) -> ArticleRecord {
    let title = normalize_page_title(&page.title);
    ArticleRecord {
        id: page.id,
        group_title: group_title(&title),
        title,
        redirect: Some(page.target),
    }
}

/// Tokenize every paragraph of a parsed page and build its rows.
///
/// Paragraphs that fail tokenization, have no sentences or fewer than
/// [`MIN_PARAGRAPH_TOKENS`] tokens are dropped. Paragraph indices are
/// positions among the section's parsed paragraphs, so they may have gaps.
fn tokenize_page(page: ParsedPage, tokenizer: &dyn Tokenizer) -> PageOutput {
    let mut out = PageOutput {
        filtered: page.skipped_paragraphs,
        failed_sections: page.failed_sections,
        ..PageOutput::default()
    };
    let article_id = page.id;
    let title = normalize_page_title(&page.title);
    out.batch.articles.push(ArticleRecord {
        id: article_id,
        group_title: group_title(&title),
        title,
        redirect: None,
    });

    for section in page.sections {
        let section_index = section.node.index;
        for (paragraph_index, paragraph) in section.paragraphs.into_iter().enumerate() {
            let sentences = match tokenizer.tokenize_paragraph(0, &paragraph.text) {
                Ok(sentences) => sentences,
                Err(e) => {
                    debug!(article_id, section_index, paragraph_index, error = %e, "paragraph not tokenized");
                    out.untokenized += 1;
                    continue;
                }
            };
            let token_count: usize = sentences.iter().map(Vec::len).sum();
            if sentences.is_empty() || token_count < MIN_PARAGRAPH_TOKENS {
                out.short += 1;
                continue;
            }

            let sentence_ends: Vec<usize> = sentences
                .iter()
                .map(|sentence| sentence.last().map_or(0, |token| token.end))
                .collect();
            for link in paragraph.links {
                let Some(sentence_index) = sentence_of(&sentence_ends, link.start) else {
                    debug!(article_id, target = %link.target_article, "link outside every sentence");
                    continue;
                };
                out.batch.raw_links.push(RawLinkRecord {
                    article_id,
                    section_index,
                    paragraph_index,
                    sentence_index,
                    start: link.start,
                    end: link.end,
                    target_article: link.target_article,
                    target_section: link.target_section,
                    title: link.title,
                });
            }

            out.batch.paragraphs.push(ParagraphRecord {
                article_id,
                section_index,
                paragraph_index,
                sentence_count: sentences.len(),
                token_count,
            });
            out.paragraphs
                .push((ParagraphKey::paragraph(article_id, section_index, paragraph_index), sentences));
        }

        out.batch.sections.push(SectionRecord {
            article_id,
            index: section_index,
            parent: section.node.parent,
            level: section.node.level,
            title: section.title,
            ids: section.node.ids,
        });
    }
    out
}

/// Join a worker and keep its value, recording any failure
fn settle<T>(joined: Result<PipelineResult<T>, JoinError>, errors: &mut Vec<PipelineError>) -> Option<T> {
    match joined {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            errors.push(e);
            None
        }
        Err(e) => {
            errors.push(PipelineError::Join(e));
            None
        }
    }
}

/// Totals the collector hands back
#[derive(Default)]
struct Collected {
    articles: u64,
    redirects: u64,
    paragraphs: u64,
    filtered: u64,
    failed_sections: u64,
    untokenized: u64,
    short: u64,
    raw_links: u64,
}

/// Run the whole build into `kb` and the shard directory.
///
/// The knowledge base is marked in progress first and complete only when
/// every step has succeeded.
pub async fn run_build(
    kb: Arc<KnowledgeBase>,
    inputs: BuildInputs,
    config: &PipelineConfig,
    tokenizer: Arc<dyn Tokenizer>,
    expander: Arc<dyn TemplateExpander>,
) -> PipelineResult<BuildStats> {
    config.validate()?;
    fs::create_dir_all(&inputs.output_dir)?;
    kb.begin_build()?;
    info!(dump = %inputs.dump.display(), output = %inputs.output_dir.display(), "build started");

    // Category titles do not depend on the dump
    let page_table = inputs.page_table.clone();
    let categories: JoinHandle<PipelineResult<CategoryGraph>> = tokio::task::spawn_blocking(move || {
        let mut graph = CategoryGraph::new();
        import_categories(open_sql_dump(&page_table)?, &mut graph)?;
        Ok(graph)
    });

    let (page_tx, page_rx) = mpsc::channel::<(u64, DumpPage)>(config.page_queue_capacity);
    let (parsed_tx, parsed_rx) = mpsc::channel::<(u64, ParsedItem)>(config.paragraph_queue_capacity);
    let (out_tx, mut out_rx) = mpsc::channel::<(u64, PageOutput)>(config.writer_queue_capacity);
    let (batch_tx, mut batch_rx) = mpsc::channel::<PageBatch>(config.writer_queue_capacity);

    // === Reader ===
    let dump = inputs.dump.clone();
    let chunk_size = config.chunk_size;
    let namespaces: HashSet<i64> = config.namespaces.iter().copied().collect();
    let reader: JoinHandle<PipelineResult<(u64, u64)>> = tokio::task::spawn_blocking(move || {
        let mut pages = DumpReader::open(&dump, chunk_size, namespaces)?;
        let progress = pages.progress();
        let mut count = 0u64;
        for page in pages.by_ref() {
            page_tx
                .blocking_send((count, page?))
                .map_err(|_| PipelineError::StageClosed("parse".into()))?;
            count += 1;
            if count % PROGRESS_EVERY == 0 {
                info!(pages = count, percent = format!("{:.1}", progress.fraction() * 100.0), "reading dump");
            }
        }
        info!(pages = count, "dump read");
        Ok((count, pages.skipped_non_wikitext()))
    });

    // === Parse workers ===
    let parser = Arc::new(PageParser::new(Preprocessor::new(expander)));
    let page_rx = Arc::new(Mutex::new(page_rx));
    let parse_workers: Vec<JoinHandle<PipelineResult<()>>> = (0..config.parse_workers)
        .map(|_| {
            let rx = Arc::clone(&page_rx);
            let tx = parsed_tx.clone();
            let parser = Arc::clone(&parser);
            tokio::task::spawn_blocking(move || {
                loop {
                    let next = rx.blocking_lock().blocking_recv();
                    let Some((seq, page)) = next else {
                        return Ok(());
                    };
                    let item = match page {
                        DumpPage::Article(page) => ParsedItem::Article(parser.parse(&page)),
                        DumpPage::Redirect(page) => ParsedItem::Redirect(redirect_record(page)),
                    };
                    tx.blocking_send((seq, item))
                        .map_err(|_| PipelineError::StageClosed("tokenize".into()))?;
                }
            })
        })
        .collect();

    // === Tokenize workers ===
    let parsed_rx = Arc::new(Mutex::new(parsed_rx));
    let tokenize_workers: Vec<JoinHandle<PipelineResult<()>>> = (0..config.tokenize_workers)
        .map(|_| {
            let rx = Arc::clone(&parsed_rx);
            let tx = out_tx.clone();
            let tokenizer = Arc::clone(&tokenizer);
            tokio::task::spawn_blocking(move || {
                loop {
                    let next = rx.blocking_lock().blocking_recv();
                    let Some((seq, item)) = next else {
                        return Ok(());
                    };
                    let output = match item {
                        ParsedItem::Article(page) => tokenize_page(page, tokenizer.as_ref()),
                        ParsedItem::Redirect(record) => PageOutput {
                            batch: PageBatch {
                                articles: vec![record],
                                ..PageBatch::default()
                            },
                            is_redirect: true,
                            ..PageOutput::default()
                        },
                    };
                    tx.blocking_send((seq, output))
                        .map_err(|_| PipelineError::StageClosed("collector".into()))?;
                }
            })
        })
        .collect();

    // === Shard writers ===
    let mut shard_txs = Vec::with_capacity(config.shard_count);
    let mut shard_writers: Vec<JoinHandle<PipelineResult<u64>>> = Vec::with_capacity(config.shard_count);
    for index in 0..config.shard_count {
        let (tx, mut rx) = mpsc::channel::<(ParagraphKey, Vec<Sentence>)>(config.writer_queue_capacity);
        shard_txs.push(tx);
        let path = shard_path(&inputs.output_dir, index);
        shard_writers.push(tokio::task::spawn_blocking(move || {
            let mut writer = ShardWriter::create(&path)?;
            while let Some((key, sentences)) = rx.blocking_recv() {
                writer.write_paragraph(&key, &sentences)?;
            }
            let written = writer.finish()?;
            debug!(shard = index, paragraphs = written, "token shard closed");
            Ok(written)
        }));
    }

    // === KB writer ===
    let writer_kb = Arc::clone(&kb);
    let kb_writer: JoinHandle<PipelineResult<u64>> = tokio::task::spawn_blocking(move || {
        let mut batches = 0;
        while let Some(batch) = batch_rx.blocking_recv() {
            writer_kb.write_batch(&batch)?;
            batches += 1;
        }
        Ok(batches)
    });

    // === Collector ===
    let shard_count = config.shard_count;
    let batch_size = config.write_batch_size;
    let collector: JoinHandle<PipelineResult<Collected>> = tokio::spawn(async move {
        let mut reorder = ReorderBuffer::new(0);
        let mut totals = Collected::default();
        let mut pending = PageBatch::default();
        let mut pending_pages = 0;

        while let Some((seq, output)) = out_rx.recv().await {
            for output in reorder.push(seq, output) {
                if output.is_redirect {
                    totals.redirects += 1;
                } else {
                    totals.articles += 1;
                }
                totals.paragraphs += output.paragraphs.len() as u64;
                totals.filtered += output.filtered as u64;
                totals.failed_sections += output.failed_sections as u64;
                totals.untokenized += output.untokenized as u64;
                totals.short += output.short as u64;
                totals.raw_links += output.batch.raw_links.len() as u64;

                for (key, sentences) in output.paragraphs {
                    shard_txs[shard_of(key.article_id, shard_count)]
                        .send((key, sentences))
                        .await
                        .map_err(|_| PipelineError::StageClosed("shard writer".into()))?;
                }

                pending.extend(output.batch);
                pending_pages += 1;
                if pending_pages >= batch_size {
                    batch_tx
                        .send(std::mem::take(&mut pending))
                        .await
                        .map_err(|_| PipelineError::StageClosed("knowledge base writer".into()))?;
                    pending_pages = 0;
                }
            }
        }

        if reorder.pending() > 0 {
            return Err(PipelineError::StageClosed("tokenize".into()));
        }
        if !pending.is_empty() {
            batch_tx
                .send(pending)
                .await
                .map_err(|_| PipelineError::StageClosed("knowledge base writer".into()))?;
        }
        Ok(totals)
    });

    // === Shutdown, upstream first ===
    let mut errors = Vec::new();
    let read = settle(reader.await, &mut errors);
    for worker in parse_workers {
        settle(worker.await, &mut errors);
    }
    drop(parsed_tx);
    for worker in tokenize_workers {
        settle(worker.await, &mut errors);
    }
    drop(out_tx);
    let collected = settle(collector.await, &mut errors);
    let batches = settle(kb_writer.await, &mut errors);
    let mut shard_paragraphs = 0;
    for writer in shard_writers {
        shard_paragraphs += settle(writer.await, &mut errors).unwrap_or(0);
    }
    let graph = settle(categories.await, &mut errors);

    if let Some(error) = first_failure(errors) {
        warn!(error = %error, "build aborted, knowledge base left in progress");
        return Err(error);
    }

    let (pages, skipped_non_wikitext) = read.unwrap_or_default();
    let collected = collected.unwrap_or_default();
    info!(
        pages,
        articles = collected.articles,
        redirects = collected.redirects,
        paragraphs = collected.paragraphs,
        shard_paragraphs,
        batches = batches.unwrap_or(0),
        "page pass done"
    );

    let mut stats = BuildStats {
        pages,
        articles: collected.articles,
        redirects: collected.redirects,
        skipped_non_wikitext,
        paragraphs: collected.paragraphs,
        filtered_paragraphs: collected.filtered,
        failed_sections: collected.failed_sections,
        untokenized_paragraphs: collected.untokenized,
        short_paragraphs: collected.short,
        raw_links: collected.raw_links,
        ..BuildStats::default()
    };

    let graph = graph.unwrap_or_default();
    let config = config.clone();
    let categorylinks = inputs.categorylinks.clone();
    tokio::task::spawn_blocking(move || {
        finish_knowledge_base(&kb, graph, &categorylinks, &config, &mut stats)?;
        Ok(stats)
    })
    .await?
}

/// Everything after the page pass; runs on the blocking pool
fn finish_knowledge_base(
    kb: &KnowledgeBase,
    mut graph: CategoryGraph,
    categorylinks: &Path,
    config: &PipelineConfig,
    stats: &mut BuildStats,
) -> PipelineResult<()> {
    let article_ids = kb.article_ids()?;
    import_category_links(open_sql_dump(categorylinks)?, &mut graph, |id| article_ids.contains(&id))?;
    kb.save_categories(&graph)?;
    stats.categories = graph.category_count() as u64;

    let disambiguation = graph.member_articles(&config.seed_category);
    stats.disambiguation_pages = kb.set_disambiguation_pages(&disambiguation)? as u64;

    let mut resolver = kb.link_resolver()?;
    let rewrites = resolver.flatten_redirects(config.redirect_passes);
    info!(
        articles = resolver.article_count(),
        redirects = resolver.redirect_count(),
        rewrites,
        "title index ready"
    );
    let links = kb.resolve_links(&resolver)?;
    stats.resolved_links = links.resolved;
    stats.unknown_link_articles = links.unknown_article;
    stats.unknown_link_sections = links.unknown_section;

    let sections = kb.update_paragraph_counts()?;
    debug!(sections, "paragraph totals updated");

    let inventory = build_inventory(
        &kb.inventory_input()?,
        SenseThresholds {
            min_evidence: config.min_sense_evidence,
            min_matching_mentions: config.min_matching_mentions,
        },
    );
    kb.save_inventory(&inventory)?;
    stats.sense_groups = inventory.groups.len() as u64;
    stats.senses = inventory.senses.len() as u64;

    let senses = kb.sense_paragraphs()?;
    let partition = Partitioner::new(config.split_fractions.clone(), config.shuffle_seed)?.partition(senses.clone());
    stats.examples = kb.save_examples(&senses, &partition)?;
    stats.held_out = partition.held_out_count() as u64;
    stats.shortfalls = partition.shortfalls.len() as u64;

    let built_at = kb.finish_build()?;
    info!(
        built_at = %built_at,
        senses = stats.senses,
        examples = stats.examples,
        "build complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::{LinkSpan, Paragraph};
    use crate::resolve::{ParsedSection, SectionNode};
    use crate::tokenize::SimpleTokenizer;

    fn section(index: usize, parent: Option<usize>, paragraphs: Vec<Paragraph>) -> ParsedSection {
        ParsedSection {
            node: SectionNode {
                index,
                parent,
                level: if parent.is_some() { 3 } else { 2 },
                ids: vec![format!("s{}", index)],
            },
            title: parent.map(|_| format!("Section {}", index)),
            paragraphs,
        }
    }

    fn paragraph(text: &str, links: Vec<LinkSpan>) -> Paragraph {
        Paragraph {
            text: text.to_string(),
            links,
        }
    }

    #[test]
    fn pages_become_rows_and_shard_paragraphs() {
        let text = "Hermes was a god. He carried messages for Mercury today.";
        let start = text.find("Mercury").unwrap();
        let link = LinkSpan {
            start,
            end: start + "Mercury".len(),
            title: "Mercury".into(),
            target_article: "Mercury_(mythology)".into(),
            target_section: None,
        };
        let page = ParsedPage {
            id: 7,
            title: "Hermes".into(),
            sections: vec![
                section(0, None, vec![paragraph("Too short here.", vec![]), paragraph(text, vec![link])]),
                section(1, Some(0), vec![paragraph("One two three four five six.", vec![])]),
            ],
            skipped_paragraphs: 2,
            failed_sections: 0,
        };

        let out = tokenize_page(page, &SimpleTokenizer);
        assert_eq!(out.batch.articles[0].title, "Hermes");
        assert_eq!(out.batch.articles[0].group_title, "hermes");
        assert_eq!(out.batch.sections.len(), 2);
        assert_eq!(out.short, 1);
        assert_eq!(out.filtered, 2);

        let keys: Vec<ParagraphKey> = out.paragraphs.iter().map(|(key, _)| *key).collect();
        assert_eq!(
            keys,
            vec![ParagraphKey::paragraph(7, 0, 1), ParagraphKey::paragraph(7, 1, 0)]
        );

        assert_eq!(out.batch.raw_links.len(), 1);
        let link = &out.batch.raw_links[0];
        assert_eq!((link.section_index, link.paragraph_index, link.sentence_index), (0, 1, 1));
        assert_eq!(out.batch.paragraphs[0].sentence_count, 2);
    }

    #[test]
    fn token_floor_matches_the_paragraph_filter() {
        let words = ["one", "two", "three", "four", "five", "six"];
        let at_floor = format!("{}.", words[..MIN_PARAGRAPH_TOKENS - 1].join(" "));
        let below = format!("{}.", words[..MIN_PARAGRAPH_TOKENS - 2].join(" "));
        let page = ParsedPage {
            id: 8,
            title: "Counts".into(),
            sections: vec![section(
                0,
                None,
                vec![paragraph(&below, vec![]), paragraph(&at_floor, vec![])],
            )],
            skipped_paragraphs: 0,
            failed_sections: 0,
        };

        let out = tokenize_page(page, &SimpleTokenizer);
        assert_eq!(out.short, 1);
        assert_eq!(out.batch.paragraphs.len(), 1);
        assert_eq!(out.batch.paragraphs[0].token_count, MIN_PARAGRAPH_TOKENS);
        assert_eq!(out.batch.paragraphs[0].paragraph_index, 1);
    }

    #[test]
    fn redirects_keep_their_target() {
        let record = redirect_record(RedirectPage {
            id: 3,
            title: "Quicksilver".into(),
            namespace: 0,
            target: crate::corpus::RedirectTarget {
                article: "Mercury_(element)".into(),
                section: None,
            },
        });
        assert_eq!(record.title, "Quicksilver");
        assert_eq!(record.group_title, "quicksilver");
        assert_eq!(record.redirect.unwrap().article, "Mercury_(element)");
    }
}
