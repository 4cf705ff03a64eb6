//! Knowledge base storage
//!
//! Everything the build produces lives in one SQLite database behind
//! `KnowledgeBase`. Serving only needs the `SenseLookup` view of it.

mod records;
mod sqlite;
mod traits;

pub use records::{
    ArticleRecord, Dataset, ExampleInfo, KnowledgeBaseStats, PageBatch, ParagraphKey,
    ParagraphRecord, RawLinkRecord, SectionRecord,
};
pub use sqlite::{BuildState, KnowledgeBase, LinkResolution};
pub use traits::{AmbiguousGroup, SenseLocation, SenseLookup, StorageError, StorageResult};
