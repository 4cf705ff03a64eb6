//! Category graph and disambiguation-page detection
//!
//! Disambiguation pages are the articles reachable from the seed category
//! (`Disambiguation_pages`) over subcategory edges. The category tables come
//! from the `page` and `categorylinks` SQL dumps.

pub mod graph;
pub mod sqldump;

pub use graph::CategoryGraph;
pub use sqldump::{
    import_categories, import_category_links, insert_rows, open_sql_dump, LinkImport, SqlValue,
};

/// Errors while importing category dumps
#[derive(Debug, thiserror::Error)]
pub enum CategoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed SQL dump line {line}: {reason}")]
    Sql { line: u64, reason: String },
}

pub type CategoryResult<T> = Result<T, CategoryError>;
