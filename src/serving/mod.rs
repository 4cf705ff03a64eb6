//! Serving: free text → `(start, end, sense URL)` spans
//!
//! Text is split into paragraphs, tokenized in parallel, matched against the
//! phrase index and scored once per segment. Scoring is pluggable through
//! [`Scorer`]; [`PriorScorer`] ranks by sense id so the engine works without
//! a trained model.

pub mod cache;
pub mod disambiguator;
pub mod scorer;

pub use cache::{sense_url, SenseUrlCache};
pub use disambiguator::{format_spans, into_segments, split_input_paragraphs, DisambiguatedSpan, Disambiguator};
pub use scorer::{check_ranking, PriorScorer, Scorer};

use crate::storage::StorageError;
use crate::tokenize::TokenizationError;

#[derive(Debug, thiserror::Error)]
pub enum ServingError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Tokenization error: {0}")]
    Tokenization(#[from] TokenizationError),

    #[error("scorer failed: {0}")]
    Scorer(String),

    #[error("scorer left out candidate sense {0}")]
    MissingCandidate(usize),

    #[error("scorer ranked sense {0} twice")]
    DuplicateCandidate(usize),

    #[error("scorer ranked sense {0}, which is not a candidate")]
    UnknownCandidate(usize),

    #[error("disambiguator is shut down")]
    Closed,

    #[error("worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type ServingResult<T> = Result<T, ServingError>;
