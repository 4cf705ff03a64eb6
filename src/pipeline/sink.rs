//! Example sinks

use crate::tokenize::{FeatureDescriptor, Token};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("gold sense {gold} is not among the candidates {candidates:?}")]
    GoldNotCandidate { gold: usize, candidates: Vec<usize> },

    #[error("candidates must be sorted and distinct, got {0:?}")]
    UnsortedCandidates(Vec<usize>),
}

/// Append-only destination of training examples
pub trait ExampleSink: Send {
    /// Write one example: its tokens, the candidate senses (ascending) and
    /// the gold sense
    fn write(&mut self, tokens: &[Token], candidates: &[usize], gold: usize) -> Result<(), SinkError>;

    /// Flush everything; returns the number of examples written
    fn finish(self: Box<Self>) -> Result<u64, SinkError>;
}

/// The gold sense must be a candidate and candidates must be sorted and distinct
pub fn check_example(candidates: &[usize], gold: usize) -> Result<(), SinkError> {
    if candidates.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(SinkError::UnsortedCandidates(candidates.to_vec()));
    }
    if candidates.binary_search(&gold).is_err() {
        return Err(SinkError::GoldNotCandidate {
            gold,
            candidates: candidates.to_vec(),
        });
    }
    Ok(())
}

#[derive(Serialize)]
struct ExampleLine<'a> {
    tokens: &'a [String],
    possible_senses: &'a [usize],
    sense: usize,
}

/// Gzip JSON-lines files `{prefix}.{000}.jsonl.gz` with prepared features,
/// rotated every `per_file` examples
pub struct JsonLinesSink {
    dir: PathBuf,
    prefix: String,
    descriptor: FeatureDescriptor,
    per_file: usize,
    current: Option<GzEncoder<BufWriter<File>>>,
    in_current: usize,
    files: usize,
    written: u64,
    skipped: u64,
}

impl JsonLinesSink {
    /// Creates `dir` if needed; files are opened on the first example
    pub fn create(
        dir: impl AsRef<Path>,
        prefix: impl Into<String>,
        descriptor: FeatureDescriptor,
        per_file: usize,
    ) -> Result<Self, SinkError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            prefix: prefix.into(),
            descriptor,
            per_file: per_file.max(1),
            current: None,
            in_current: 0,
            files: 0,
            written: 0,
            skipped: 0,
        })
    }

    pub fn file_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.{:03}.jsonl.gz", self.prefix, index))
    }

    fn close_current(&mut self) -> Result<(), SinkError> {
        if let Some(encoder) = self.current.take() {
            encoder.finish()?.flush()?;
        }
        Ok(())
    }

    fn writer(&mut self) -> Result<&mut GzEncoder<BufWriter<File>>, SinkError> {
        if self.in_current >= self.per_file {
            self.close_current()?;
            self.in_current = 0;
        }
        let encoder = match self.current.take() {
            Some(encoder) => encoder,
            None => {
                let file = File::create(self.file_path(self.files))?;
                self.files += 1;
                GzEncoder::new(BufWriter::new(file), Compression::default())
            }
        };
        Ok(self.current.insert(encoder))
    }
}

impl ExampleSink for JsonLinesSink {
    fn write(&mut self, tokens: &[Token], candidates: &[usize], gold: usize) -> Result<(), SinkError> {
        check_example(candidates, gold)?;

        let features = self.descriptor.prepare_tokens(tokens);
        if features.is_empty() {
            debug!(gold, "example has no features left, skipped");
            self.skipped += 1;
            return Ok(());
        }

        let line = serde_json::to_string(&ExampleLine {
            tokens: &features,
            possible_senses: candidates,
            sense: gold,
        })?;
        let out = self.writer()?;
        writeln!(out, "{}", line)?;
        self.in_current += 1;
        self.written += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<u64, SinkError> {
        self.close_current()?;
        info!(
            dir = %self.dir.display(),
            prefix = %self.prefix,
            examples = self.written,
            skipped = self.skipped,
            files = self.files,
            "example file set closed"
        );
        Ok(self.written)
    }
}
