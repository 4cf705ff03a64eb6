//! The export run: knowledge base + token shards → example files
//!
//! ```text
//! DB reader ─▶ (by article_id % shard_count) ─▶ shard workers ─▶ sinks
//!                  shard reader ─────────────────────┘      (one per descriptor × split)
//! ```
//!
//! Each shard worker joins its token shard with the example infos of the
//! same shard. Paragraph-level descriptors get the whole paragraph; sentence
//! descriptors get the linked sentence, or every sentence of a paragraph
//! that is an example as a whole.

use super::join::InfoJoin;
use super::shards::{shard_of, shard_path, ShardReader};
use super::sink::{ExampleSink, JsonLinesSink};
use super::{first_failure, PipelineError, PipelineResult};
use crate::config::PipelineConfig;
use crate::storage::{Dataset, ExampleInfo, KnowledgeBase};
use crate::tokenize::{NamedDescriptor, Token};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// File each output directory gets its descriptor in
pub const DESCRIPTOR_FILE: &str = "feature_descriptor.json";

/// Counters of one export run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub infos: u64,
    pub paragraphs: u64,
    /// Examples handed to sinks
    pub examples: u64,
    /// Examples the sinks wrote
    pub written: u64,
    /// Examples without tokens or candidates
    pub skipped: u64,
    /// Example infos whose paragraph was not in any shard
    pub join_misses: u64,
}

struct Example {
    tokens: Vec<Token>,
    candidates: Vec<usize>,
    gold: usize,
}

/// Sink queues of one split
#[derive(Clone, Default)]
struct Routes {
    paragraphs: Vec<mpsc::Sender<Example>>,
    sentences: Vec<mpsc::Sender<Example>>,
}

#[derive(Default)]
struct ShardExport {
    paragraphs: u64,
    examples: u64,
    skipped: u64,
    misses: u64,
}

fn emit(
    queue: &mpsc::Sender<Example>,
    tokens: Vec<Token>,
    info: &ExampleInfo,
    candidates: &[usize],
    out: &mut ShardExport,
) -> PipelineResult<()> {
    if tokens.is_empty() || candidates.is_empty() {
        debug!(key = ?info.key, sense_id = info.sense_id, "skipped empty example");
        out.skipped += 1;
        return Ok(());
    }
    out.examples += 1;
    queue
        .blocking_send(Example {
            tokens,
            candidates: candidates.to_vec(),
            gold: info.sense_id,
        })
        .map_err(|_| PipelineError::StageClosed("example sink".into()))
}

/// Fan the examples of one joined paragraph out to the sinks of its split
fn route(
    info: &ExampleInfo,
    sentences: &[Vec<Token>],
    candidates: &[usize],
    routes: &Routes,
    out: &mut ShardExport,
) -> PipelineResult<()> {
    for queue in &routes.paragraphs {
        emit(queue, sentences.concat(), info, candidates, out)?;
    }
    for queue in &routes.sentences {
        match info.key.sentence_index {
            None => {
                for sentence in sentences {
                    emit(queue, sentence.clone(), info, candidates, out)?;
                }
            }
            Some(index) => match sentences.get(index) {
                Some(sentence) => emit(queue, sentence.clone(), info, candidates, out)?,
                None => {
                    debug!(key = ?info.key, "sentence index past the paragraph");
                    out.skipped += 1;
                }
            },
        }
    }
    Ok(())
}

fn export_shard(
    path: PathBuf,
    mut infos: mpsc::Receiver<ExampleInfo>,
    routes: Vec<Routes>,
    possible_senses: Arc<BTreeMap<usize, Vec<usize>>>,
) -> PipelineResult<ShardExport> {
    let mut out = ShardExport::default();
    let mut join = InfoJoin::new(std::iter::from_fn(move || infos.blocking_recv()));

    for paragraph in ShardReader::open(&path)? {
        let (key, sentences) = paragraph?;
        out.paragraphs += 1;
        for info in join.take(key.paragraph_position())? {
            let Some(split_routes) = routes.get(info.dataset.0) else {
                warn!(dataset = info.dataset.0, "example in a split with no output");
                out.skipped += 1;
                continue;
            };
            let candidates = possible_senses
                .get(&info.group_id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            route(&info, &sentences, candidates, split_routes, &mut out)?;
        }
    }

    out.misses = join.finish();
    debug!(shard = %path.display(), paragraphs = out.paragraphs, examples = out.examples, "shard exported");
    Ok(out)
}

/// Export every example of a complete knowledge base.
///
/// Writes `output_dir/<name>/feature_descriptor.json` and
/// `output_dir/<name>/<split>/<split>.NNN.jsonl.gz` for every descriptor.
pub async fn run_export(
    kb: Arc<KnowledgeBase>,
    shard_dir: &Path,
    output_dir: &Path,
    descriptors: &[NamedDescriptor],
    config: &PipelineConfig,
) -> PipelineResult<ExportStats> {
    config.validate()?;
    kb.ensure_complete()?;
    let possible_senses = Arc::new(kb.senses_by_group()?);

    for named in descriptors {
        let dir = output_dir.join(&named.name);
        fs::create_dir_all(&dir)?;
        named.descriptor.save(dir.join(DESCRIPTOR_FILE))?;
    }

    // === Sinks ===
    let datasets: Vec<Dataset> = (0..=config.split_fractions.len()).map(Dataset).collect();
    let mut routes = vec![Routes::default(); datasets.len()];
    let mut sink_writers: Vec<JoinHandle<PipelineResult<u64>>> = Vec::new();
    for dataset in &datasets {
        let split = dataset.name();
        for named in descriptors {
            let mut sink: Box<dyn ExampleSink> = Box::new(JsonLinesSink::create(
                output_dir.join(&named.name).join(&split),
                split.clone(),
                named.descriptor,
                config.examples_per_file,
            )?);
            let (tx, mut rx) = mpsc::channel::<Example>(config.writer_queue_capacity);
            if named.descriptor.uses_sentences {
                routes[dataset.0].sentences.push(tx);
            } else {
                routes[dataset.0].paragraphs.push(tx);
            }
            sink_writers.push(tokio::task::spawn_blocking(move || {
                while let Some(example) = rx.blocking_recv() {
                    sink.write(&example.tokens, &example.candidates, example.gold)?;
                }
                Ok(sink.finish()?)
            }));
        }
    }

    // === Shard workers ===
    let mut info_txs = Vec::with_capacity(config.shard_count);
    let mut shard_workers: Vec<JoinHandle<PipelineResult<ShardExport>>> = Vec::with_capacity(config.shard_count);
    for index in 0..config.shard_count {
        let (tx, rx) = mpsc::channel::<ExampleInfo>(config.writer_queue_capacity);
        info_txs.push(tx);
        let path = shard_path(shard_dir, index);
        let routes = routes.clone();
        let possible_senses = Arc::clone(&possible_senses);
        shard_workers.push(tokio::task::spawn_blocking(move || {
            export_shard(path, rx, routes, possible_senses)
        }));
    }

    // === DB reader ===
    let shard_count = config.shard_count;
    let reader: JoinHandle<PipelineResult<u64>> = tokio::task::spawn_blocking(move || {
        let mut closed = false;
        let rows = kb.visit_example_infos(|info| {
            let shard = shard_of(info.key.article_id, shard_count);
            closed = info_txs[shard].blocking_send(info).is_err();
            !closed
        })?;
        if closed {
            return Err(PipelineError::StageClosed("shard worker".into()));
        }
        Ok(rows)
    });

    // === Shutdown, upstream first ===
    let mut errors = Vec::new();
    let mut stats = ExportStats::default();
    match reader.await {
        Ok(Ok(rows)) => stats.infos = rows,
        Ok(Err(e)) => errors.push(e),
        Err(e) => errors.push(e.into()),
    }
    for worker in shard_workers {
        match worker.await {
            Ok(Ok(shard)) => {
                stats.paragraphs += shard.paragraphs;
                stats.examples += shard.examples;
                stats.skipped += shard.skipped;
                stats.join_misses += shard.misses;
            }
            Ok(Err(e)) => errors.push(e),
            Err(e) => errors.push(e.into()),
        }
    }
    drop(routes);
    for writer in sink_writers {
        match writer.await {
            Ok(Ok(written)) => stats.written += written,
            Ok(Err(e)) => errors.push(e),
            Err(e) => errors.push(e.into()),
        }
    }

    if let Some(error) = first_failure(errors) {
        return Err(error);
    }
    if stats.join_misses > 0 {
        warn!(missing = stats.join_misses, "did not find {} paragraphs", stats.join_misses);
    }
    info!(
        infos = stats.infos,
        paragraphs = stats.paragraphs,
        examples = stats.examples,
        written = stats.written,
        skipped = stats.skipped,
        "export complete"
    );
    Ok(stats)
}
