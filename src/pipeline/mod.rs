//! Pipeline orchestration
//!
//! - [`build`]: dump → knowledge base + token shards (the `prepare` run)
//! - [`export`]: knowledge base + token shards → example files
//! - [`shards`]: gzip TSV token shards
//! - [`join`]: paragraph stream ⋈ example-info stream
//! - [`sink`]: example writers
//! - [`reorder`]: correlation-id ordering for out-of-order workers
//!
//! Stages talk over bounded tokio channels. A stage's input is closed only
//! after every upstream worker has joined, and a failing stage aborts the
//! whole run.

pub mod build;
pub mod export;
pub mod join;
pub mod reorder;
pub mod shards;
pub mod sink;

pub use build::{run_build, BuildInputs, BuildStats};
pub use export::{run_export, ExportStats};
pub use join::InfoJoin;
pub use reorder::ReorderBuffer;
pub use shards::{shard_of, shard_path, ShardReader, ShardWriter};
pub use sink::{check_example, ExampleSink, JsonLinesSink, SinkError};

use crate::category::CategoryError;
use crate::config::ConfigError;
use crate::corpus::CorpusError;
use crate::partition::PartitionError;
use crate::storage::{ParagraphKey, StorageError};
use crate::tokenize::DescriptorError;
use thiserror::Error;

/// Errors that abort a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Corpus error: {0}")]
    Corpus(#[from] CorpusError),

    #[error("Category error: {0}")]
    Category(#[from] CategoryError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Partition error: {0}")]
    Partition(#[from] PartitionError),

    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stage {0} stopped early")]
    StageClosed(String),

    #[error("worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("example infos out of order: {next:?} after {previous:?}")]
    JoinOrder {
        previous: ParagraphKey,
        next: ParagraphKey,
    },

    #[error("malformed token shard line {line}: {reason}")]
    MalformedShard { line: u64, reason: String },
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Keep the first root cause; a closed channel is only a symptom of another
/// stage failing.
pub(crate) fn first_failure(errors: Vec<PipelineError>) -> Option<PipelineError> {
    let (closed, causes): (Vec<_>, Vec<_>) = errors
        .into_iter()
        .partition(|e| matches!(e, PipelineError::StageClosed(_)));
    causes.into_iter().next().or_else(|| closed.into_iter().next())
}
