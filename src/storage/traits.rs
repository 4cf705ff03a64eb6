//! Storage error type and the read-side lookup trait used by serving

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("knowledge base build is {0}, rebuild it before use")]
    IncompleteBuild(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Where a sense points, enough to build its URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenseLocation {
    /// Normalized article title
    pub article_title: String,
    /// Heading text of the target section
    pub section_title: Option<String>,
}

/// A group with at least two senses, under every title it is known by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousGroup {
    pub group_id: usize,
    /// Canonical title first, then alternatives
    pub titles: Vec<String>,
    /// Ascending
    pub sense_ids: Vec<usize>,
}

/// Read access needed to answer disambiguation queries
///
/// Implementations must be thread-safe (Send + Sync): serving workers
/// share one instance.
pub trait SenseLookup: Send + Sync {
    /// Groups that can be ambiguous in text
    fn ambiguous_groups(&self) -> StorageResult<Vec<AmbiguousGroup>>;

    /// Article and section a sense id points to
    fn sense_location(&self, sense_id: usize) -> StorageResult<Option<SenseLocation>>;
}
